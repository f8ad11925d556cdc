//! Remote host abstraction
//!
//! The pipeline only ever talks to a host through [`RemoteHost`]: run a command
//! with live stream relay, push a file, pull a file. [`SshSession`] is the real
//! implementation; tests substitute an in-process fake.
//!
//! # Example
//!
//! ```no_run
//! use remotebuild::context::RunContext;
//! use remotebuild::remote::{Connector, RemoteHost, SshConnector};
//! use remotebuild::config::{ConnectionSettings, HostKeyPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConnectionSettings::new("build01", "dev", "/home/dev/.ssh/id_ed25519", "out")
//!         .with_host_key_policy(HostKeyPolicy::AcceptAny);
//!     let ctx = RunContext::new();
//!     let host = SshConnector::default().connect(&settings, &ctx).await?;
//!     let status = host.exec("uname -a", &ctx).await?;
//!     println!("exit {}", status.code);
//!     host.close();
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod path;
pub mod relay;
mod ssh;

use async_trait::async_trait;
use std::fmt;
use std::path::Path;

use crate::config::ConnectionSettings;
use crate::context::RunContext;

pub use error::{ConnectError, ExecError, TransferError};
pub use path::{shell_quote, RemotePath};
pub use ssh::{SshConnector, SshSession};

/// Exit status of a remote command that ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub code: i32,
}

impl CommandStatus {
    /// Reported when the server never sent an exit status
    pub const UNKNOWN: CommandStatus = CommandStatus { code: -1 };

    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit status {}", self.code)
    }
}

/// An open session on a build host
///
/// Implementations own both the shell and the file-transfer connection. The
/// pipeline driver is the only holder; nothing keeps a reference past the call
/// it was passed into.
#[async_trait]
pub trait RemoteHost: Send + Sync {
    /// `user@host:port`, for diagnostics
    fn endpoint(&self) -> &str;

    /// Run one command in a fresh execution context and relay its streams live
    async fn exec(&self, command: &str, ctx: &RunContext) -> Result<CommandStatus, ExecError>;

    /// Stream a local file to `remote`, creating or truncating it with `mode`
    async fn upload(
        &self,
        local: &Path,
        remote: &RemotePath,
        mode: i32,
        ctx: &RunContext,
    ) -> Result<u64, TransferError>;

    /// Stream `remote` into a local file, creating or truncating it
    async fn download(
        &self,
        remote: &RemotePath,
        local: &Path,
        ctx: &RunContext,
    ) -> Result<u64, TransferError>;

    /// Release both connections. Idempotent.
    fn close(&self);
}

/// Opens sessions; the seam the pipeline uses to acquire a [`RemoteHost`]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        ctx: &RunContext,
    ) -> Result<Box<dyn RemoteHost>, ConnectError>;
}
