/*!
 * Progress bars for file transfer passes
 */

use indicatif::{ProgressBar, ProgressStyle};

/// A per-file counter bar, or a hidden one when progress is off
pub fn file_bar(total_files: u64, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(total_files);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}
