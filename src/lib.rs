/*!
 * remotebuild - build a CMake project on a remote host over SSH
 *
 * One run mirrors a local source tree to the host, configures and builds it
 * in `<remote-dir>/build` with live output relay, and copies the requested
 * artifacts back:
 * - Two SSH connections per run (shell and SFTP) sharing one private key
 * - Explicit host key policy: known_hosts, pinned fingerprint, or accept-any
 * - Best-effort transfers with an ordered failure report
 * - Cancellation and per-command deadlines
 */

pub mod cli_style;
pub mod commands;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod report;
pub mod toolchain;
pub mod upload;

// Re-export commonly used types
pub use config::{BuildSettings, ConnectionSettings, FileConfig, HostKeyPolicy};
pub use context::{Interrupted, RunContext};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineReport, PipelineState, Step, StepObserver};
pub use remote::{CommandStatus, Connector, RemoteHost, RemotePath, SshConnector};
pub use report::{TransferReport, TransferStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
