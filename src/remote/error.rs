//! Error types for remote session operations
//!
//! Three classes, matching the three things that can go wrong against a host:
//! establishing the session, running a command on it, and moving a single file.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::context::Interrupted;

/// Failure to establish a session (shell + file-transfer connections)
///
/// Callers treat every variant the same way (log and abort); the variants only
/// exist so the diagnostic says which phase broke.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Host name did not resolve to any address
    #[error("could not resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// TCP connection failed
    #[error("TCP connection to {endpoint} failed: {source}")]
    Tcp {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// SSH protocol handshake failed
    #[error("SSH handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: ssh2::Error,
    },

    /// Remote host identity was rejected by the configured policy
    #[error("host key verification failed for {endpoint}: {reason}")]
    HostKey { endpoint: String, reason: String },

    /// Private key unreadable, unparsable, or rejected by the server
    #[error("authentication as '{user}' with key {key} failed: {message}")]
    Auth {
        user: String,
        key: PathBuf,
        message: String,
    },

    /// SFTP subsystem could not be started
    #[error("failed to open SFTP channel: {0}")]
    Sftp(#[source] ssh2::Error),

    /// Session could not be allocated
    #[error("failed to create SSH session: {0}")]
    Session(#[source] ssh2::Error),

    #[error("connection attempt {0}")]
    Interrupted(Interrupted),

    #[error("connection task failed: {0}")]
    Join(String),
}

/// Failure to run a remote command to completion
///
/// A command that ran and exited non-zero is NOT an `ExecError`; that outcome is
/// reported through [`CommandStatus`](super::CommandStatus).
#[derive(Error, Debug)]
pub enum ExecError {
    /// Execution context (SSH channel) could not be opened
    #[error("failed to open execution channel: {0}")]
    ChannelOpen(String),

    /// Channel opened but the command could not be started
    #[error("failed to start command '{command}': {message}")]
    Start { command: String, message: String },

    /// Relaying stdin/stdout/stderr broke mid-command
    #[error("stream relay failed: {0}")]
    Stream(#[from] io::Error),

    #[error("command {0}")]
    Interrupted(Interrupted),

    #[error("execution task failed: {0}")]
    Join(String),
}

impl ExecError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecError::Interrupted(_))
    }
}

/// Failure to transfer one file
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("remote file {path}: {message}")]
    Remote { path: String, message: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("transfer {0}")]
    Interrupted(Interrupted),

    #[error("transfer task failed: {0}")]
    Join(String),
}

impl TransferError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TransferError::Interrupted(_))
    }
}
