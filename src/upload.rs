/*!
 * Tree mirroring: recreate a local directory's file layout under a remote root
 */

use glob::Pattern as GlobPattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use crate::config::{BuildSettings, ConfigError, DEFAULT_FILE_MODE};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::pipeline::Step;
use crate::progress::file_bar;
use crate::remote::{RemoteHost, RemotePath, TransferError};
use crate::report::{SkipReason, TransferReport};
use crate::toolchain::mkdir_command;

/// Options for one upload pass
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Mode every uploaded file is created with
    pub file_mode: i32,
    /// Glob patterns; see [`ExcludeSet`]
    pub exclude: Vec<String>,
    pub show_progress: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            file_mode: DEFAULT_FILE_MODE,
            exclude: Vec::new(),
            show_progress: false,
        }
    }
}

impl UploadOptions {
    pub fn from_settings(build: &BuildSettings) -> Self {
        Self {
            file_mode: build.file_mode,
            exclude: build.exclude.clone(),
            show_progress: build.show_progress,
        }
    }
}

/// Compiled exclude patterns
///
/// A pattern containing `/` is matched against the whole relative path; one
/// without is matched against each entry's own name, at any depth. A matching
/// directory prunes its subtree.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    by_path: Vec<GlobPattern>,
    by_name: Vec<GlobPattern>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> std::result::Result<Self, ConfigError> {
        let mut set = Self::default();
        for raw in patterns {
            let pattern = raw.trim().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let compiled = GlobPattern::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("exclude pattern '{}': {}", raw, e))
            })?;
            if pattern.contains('/') {
                set.by_path.push(compiled);
            } else {
                set.by_name.push(compiled);
            }
        }
        Ok(set)
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let normalized = relative.to_string_lossy().replace('\\', "/");
        if self.by_path.iter().any(|p| p.matches(&normalized)) {
            return true;
        }
        match relative.file_name().and_then(|n| n.to_str()) {
            Some(name) => self.by_name.iter().any(|p| p.matches(name)),
            None => false,
        }
    }
}

/// A regular file scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub local: PathBuf,
    /// Path relative to the source root
    pub relative: PathBuf,
}

/// Walk `root` and list the regular files to upload
///
/// Symlinks are not followed and, like special files and excluded entries,
/// land in the report's `skipped`. Unreadable entries are recorded as
/// failures; the walk continues past them.
pub fn plan_upload(root: &Path, exclude: &ExcludeSet) -> (Vec<PlannedFile>, TransferReport) {
    let mut files = Vec::new();
    let mut report = TransferReport::new();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
                    .unwrap_or_default();
                report.record_failure(path, e);
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        if exclude.is_excluded(&relative) {
            if file_type.is_dir() {
                walker.skip_current_dir();
            }
            report.record_skip(relative, SkipReason::Excluded);
            continue;
        }

        if file_type.is_dir() {
            continue;
        }

        if file_type.is_symlink() {
            report.record_skip(relative, SkipReason::Symlink);
        } else if file_type.is_file() {
            files.push(PlannedFile {
                local: entry.path().to_path_buf(),
                relative,
            });
        } else {
            report.record_skip(relative, SkipReason::SpecialFile);
        }
    }

    (files, report)
}

/// Mirror every regular file under `local_root` to `remote_root`
///
/// Each file's remote parent directory is created with `mkdir -p` before the
/// file is transferred; each distinct directory is created once per pass. The
/// pass is best-effort: per-file failures (including a non-zero `mkdir`) are
/// collected in the returned report. Failures of the executor itself, and
/// interruptions, end the pass with an error.
pub async fn upload_tree(
    host: &dyn RemoteHost,
    local_root: &Path,
    remote_root: &RemotePath,
    options: &UploadOptions,
    ctx: &RunContext,
) -> Result<TransferReport> {
    if !local_root.is_dir() {
        return Err(Error::SourceNotFound(local_root.to_path_buf()));
    }

    let started = Instant::now();
    let exclude = ExcludeSet::new(&options.exclude)?;
    let (files, mut report) = plan_upload(local_root, &exclude);

    tracing::info!(
        "Uploading {} file(s) from {} to {}:{}",
        files.len(),
        local_root.display(),
        host.endpoint(),
        remote_root
    );

    let bar = file_bar(files.len() as u64, options.show_progress);
    let mut created: HashSet<RemotePath> = HashSet::new();

    for file in &files {
        ctx.check().map_err(|reason| Error::Interrupted {
            step: Step::Upload,
            reason,
        })?;

        let remote = remote_root.join_local(&file.relative);
        let parent = remote.parent().unwrap_or_else(|| remote_root.clone());

        if !created.contains(&parent) {
            let status = host
                .exec(&mkdir_command(&parent), ctx)
                .await
                .map_err(|e| Error::from_exec(Step::Upload, e))?;
            if !status.success() {
                report.record_failure(
                    &file.relative,
                    format!("mkdir -p {} failed with {}", parent, status),
                );
                bar.inc(1);
                continue;
            }
            created.insert(parent);
        }

        bar.set_message(file.relative.display().to_string());
        match host.upload(&file.local, &remote, options.file_mode, ctx).await {
            Ok(bytes) => {
                tracing::debug!("Uploaded {} ({} bytes)", remote, bytes);
                report.record_success(&file.relative, bytes);
            }
            Err(TransferError::Interrupted(reason)) => {
                bar.abandon();
                return Err(Error::Interrupted {
                    step: Step::Upload,
                    reason,
                });
            }
            Err(e) => report.record_failure(&file.relative, e),
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    report.duration = started.elapsed();
    Ok(report)
}
