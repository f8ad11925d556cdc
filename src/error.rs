/*!
 * Error types for remotebuild
 */

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::Interrupted;
use crate::pipeline::Step;
use crate::remote::{ConnectError, ExecError};
use crate::report::TransferReport;

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_COMMAND: i32 = 3;

#[derive(Error, Debug)]
pub enum Error {
    /// Settings missing or invalid; raised before any network activity
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session could not be established
    #[error("cannot establish session with {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: ConnectError,
    },

    /// A remote command could not be run to completion
    #[error("{step} failed: {source}")]
    Exec {
        step: Step,
        #[source]
        source: ExecError,
    },

    /// A remote command ran and exited non-zero
    #[error("{step} failed: remote command exited with status {code}")]
    CommandFailed { step: Step, code: i32 },

    /// The source tree could not be mirrored completely
    #[error("upload incomplete: {} of {} file(s) failed", .report.failures.len(), .report.attempted())]
    UploadIncomplete { report: TransferReport },

    /// Local source root is missing or not a directory
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Local filesystem failure while a step was running
    #[error("{step} failed: {source}")]
    LocalIo {
        step: Step,
        #[source]
        source: io::Error,
    },

    #[error("{step} {reason}")]
    Interrupted { step: Step, reason: Interrupted },
}

impl Error {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandFailed { .. } => EXIT_COMMAND,
            _ => EXIT_FATAL,
        }
    }

    /// The pipeline step this error is attributed to, if any
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::Connect { .. } => Some(Step::Connect),
            Error::Exec { step, .. }
            | Error::CommandFailed { step, .. }
            | Error::Interrupted { step, .. }
            | Error::LocalIo { step, .. } => Some(*step),
            Error::UploadIncomplete { .. } | Error::SourceNotFound(_) => Some(Step::Upload),
            Error::Config(_) | Error::Io(_) => None,
        }
    }

    /// Attribute an executor failure to a step, keeping interruptions distinct
    pub fn from_exec(step: Step, source: ExecError) -> Self {
        match source {
            ExecError::Interrupted(reason) => Error::Interrupted { step, reason },
            source => Error::Exec { step, source },
        }
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Connect { .. } => ErrorCategory::Connection,
            Error::Exec { .. } | Error::CommandFailed { .. } => ErrorCategory::RemoteExecution,
            Error::UploadIncomplete { .. } => ErrorCategory::Transfer,
            Error::SourceNotFound(_) => ErrorCategory::Validation,
            Error::Io(_) | Error::LocalIo { .. } => ErrorCategory::IoError,
            Error::Interrupted { .. } => ErrorCategory::Interrupted,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid settings
    Configuration,
    /// Session establishment (network, host key, authentication)
    Connection,
    /// Remote command could not run, or exited non-zero
    RemoteExecution,
    /// Per-file transfer failures
    Transfer,
    /// Path validation errors
    Validation,
    /// Local I/O errors
    IoError,
    /// Cancelled or deadline exceeded
    Interrupted,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::RemoteExecution => write!(f, "remote-execution"),
            ErrorCategory::Transfer => write!(f, "transfer"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Interrupted => write!(f, "interrupted"),
        }
    }
}
