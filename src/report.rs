/*!
 * Outcome records for best-effort transfer passes
 */

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Overall result of one transfer pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Nothing was requested
    Skipped,
    /// Every item transferred
    Complete,
    /// Some items transferred, some failed
    Partial,
    /// Items were requested and none transferred
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Skipped => write!(f, "skipped"),
            TransferStatus::Complete => write!(f, "complete"),
            TransferStatus::Partial => write!(f, "partial"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One item that could not be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Why an item was deliberately not transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Symlink,
    SpecialFile,
    Excluded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Symlink => write!(f, "symbolic link"),
            SkipReason::SpecialFile => write!(f, "special file"),
            SkipReason::Excluded => write!(f, "excluded"),
        }
    }
}

/// Ordered record of a best-effort pass over many files
///
/// Failures are kept in the order they happened so the caller can print a
/// complete report after the pass and decide how severe it was.
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    pub transferred: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub failures: Vec<TransferFailure>,
    pub bytes: u64,
    pub duration: Duration,
}

impl TransferReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, path: impl Into<PathBuf>, bytes: u64) {
        self.transferred.push(path.into());
        self.bytes += bytes;
    }

    pub fn record_failure(&mut self, path: impl Into<PathBuf>, error: impl fmt::Display) {
        let path = path.into();
        tracing::warn!("Transfer failed for {}: {}", path.display(), error);
        self.failures.push(TransferFailure {
            path,
            error: error.to_string(),
        });
    }

    pub fn record_skip(&mut self, path: impl Into<PathBuf>, reason: SkipReason) {
        let path = path.into();
        tracing::debug!("Skipping {} ({})", path.display(), reason);
        self.skipped.push((path, reason));
    }

    pub fn attempted(&self) -> usize {
        self.transferred.len() + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn status(&self) -> TransferStatus {
        match (self.transferred.is_empty(), self.failures.is_empty()) {
            (true, true) => TransferStatus::Skipped,
            (false, true) => TransferStatus::Complete,
            (false, false) => TransferStatus::Partial,
            (true, false) => TransferStatus::Failed,
        }
    }
}
