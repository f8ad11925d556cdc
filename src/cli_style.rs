/*!
 * Console styling for the remotebuild binary
 *
 * Everything here writes to stderr: stdout belongs to the remote build's
 * relayed output.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use std::time::Duration;

use crate::pipeline::{PipelineReport, Step, StepObserver};
use crate::report::TransferReport;

// ============================================================================
// THEME COLORS
// ============================================================================

pub struct Theme;

impl Theme {
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Bold cyan
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const ARROW_RIGHT: &'static str = "→";
}

// ============================================================================
// STEP BANNERS
// ============================================================================

/// Banner text for a step, e.g. `[3] Uploading source tree`
pub fn step_title(step: Step) -> String {
    let action = match step {
        Step::Connect => "Connecting",
        Step::PrepareBuildDir => "Preparing remote build directory",
        Step::Upload => "Uploading source tree",
        Step::Configure => "Configuring",
        Step::Build => "Building",
        Step::Retrieve => "Retrieving artifacts",
    };
    format!("[{}] {}", step.number(), action)
}

/// Prints a banner as each step starts
#[derive(Debug, Default, Clone, Copy)]
pub struct BannerObserver;

impl StepObserver for BannerObserver {
    fn step_started(&self, step: Step) {
        eprintln!("{} {}", Theme::header(step_title(step)), Theme::muted("..."));
    }
}

// ============================================================================
// TABLES
// ============================================================================

fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

/// Two-column summary of a finished run
pub fn summary_table(report: &PipelineReport) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Build Summary"), Cell::new("")]);

    let state = report
        .final_state()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "idle".to_string());
    table.add_row(vec![
        Cell::new("Final State"),
        Cell::new(state).fg(Color::Green).add_attribute(Attribute::Bold),
    ]);

    add_transfer_rows(&mut table, "Uploaded", &report.upload);

    if !report.upload.skipped.is_empty() {
        table.add_row(vec![
            Cell::new("Skipped"),
            Cell::new(report.upload.skipped.len().to_string()).fg(Color::Yellow),
        ]);
    }

    add_transfer_rows(&mut table, "Artifacts", &report.download);

    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(report.elapsed)),
    ]);

    table
}

fn add_transfer_rows(table: &mut Table, label: &str, report: &TransferReport) {
    table.add_row(vec![
        Cell::new(label),
        Cell::new(format!(
            "{} file(s), {} ({})",
            report.transferred.len(),
            format_bytes(report.bytes),
            report.status()
        )),
    ]);

    if !report.failures.is_empty() {
        table.add_row(vec![
            Cell::new(format!("{} Failed", label)),
            Cell::new(report.failures.len().to_string())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
        ]);
    }
}

/// One row per failed item, in the order the failures happened
pub fn failure_table(report: &TransferReport) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Path"), header_cell("Error")]);
    for failure in &report.failures {
        table.add_row(vec![
            Cell::new(failure.path.display().to_string()),
            Cell::new(&failure.error).fg(Color::Red),
        ]);
    }
    table
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    } else {
        format!(
            "{}h {}m",
            (secs / 3600.0).floor(),
            ((secs % 3600.0) / 60.0).floor()
        )
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    eprintln!(
        "{} {}",
        Theme::success(Icons::SUCCESS),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", Theme::primary(Icons::INFO), message);
}
