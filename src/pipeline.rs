/*!
 * Pipeline driver: connect, prepare, upload, configure, build, retrieve
 *
 * Steps run strictly in order and each one completes before the next starts.
 * The first fatal step moves the pipeline to `Failed(step)`; the session is
 * released on every exit path.
 */

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{BuildSettings, ConnectionSettings};
use crate::context::RunContext;
use crate::download::download_artifacts;
use crate::error::{Error, Result, EXIT_PARTIAL, EXIT_SUCCESS};
use crate::remote::{ConnectError, Connector, RemoteHost, RemotePath};
use crate::report::TransferReport;
use crate::toolchain::{build_dir, mkdir_command, Toolchain};
use crate::upload::{upload_tree, UploadOptions};

/// One macro-step of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    PrepareBuildDir,
    Upload,
    Configure,
    Build,
    Retrieve,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Connect,
        Step::PrepareBuildDir,
        Step::Upload,
        Step::Configure,
        Step::Build,
        Step::Retrieve,
    ];

    /// 1-based position, for banners
    pub fn number(&self) -> usize {
        match self {
            Step::Connect => 1,
            Step::PrepareBuildDir => 2,
            Step::Upload => 3,
            Step::Configure => 4,
            Step::Build => 5,
            Step::Retrieve => 6,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Connect => write!(f, "connect"),
            Step::PrepareBuildDir => write!(f, "build directory setup"),
            Step::Upload => write!(f, "upload"),
            Step::Configure => write!(f, "configure"),
            Step::Build => write!(f, "build"),
            Step::Retrieve => write!(f, "artifact retrieval"),
        }
    }
}

/// Driver state; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connected,
    TreeUploaded,
    Configured,
    Built,
    ArtifactsRetrieved,
    Done,
    Failed(Step),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Connected => write!(f, "connected"),
            PipelineState::TreeUploaded => write!(f, "tree uploaded"),
            PipelineState::Configured => write!(f, "configured"),
            PipelineState::Built => write!(f, "built"),
            PipelineState::ArtifactsRetrieved => write!(f, "artifacts retrieved"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed(step) => write!(f, "failed at {}", step),
        }
    }
}

/// Receives progress notifications from the driver
pub trait StepObserver: Send + Sync {
    fn step_started(&self, _step: Step) {}
    fn state_changed(&self, _state: PipelineState) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {}

/// What a completed run did
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Every state entered, in order
    pub states: Vec<PipelineState>,
    pub upload: TransferReport,
    pub download: TransferReport,
    pub elapsed: Duration,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            upload: TransferReport::new(),
            download: TransferReport::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn final_state(&self) -> Option<PipelineState> {
        self.states.last().copied()
    }

    /// Partial when any artifact could not be retrieved
    pub fn exit_code(&self) -> i32 {
        if self.download.is_clean() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }
}

/// Sequences one remote build
pub struct Pipeline {
    connection: ConnectionSettings,
    build: BuildSettings,
    toolchain: Toolchain,
    observer: Box<dyn StepObserver>,
}

impl Pipeline {
    pub fn new(connection: ConnectionSettings, build: BuildSettings) -> Self {
        let toolchain = Toolchain::from_settings(&build);
        Self {
            connection,
            build,
            toolchain,
            observer: Box::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn StepObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn connection(&self) -> &ConnectionSettings {
        &self.connection
    }

    pub fn build_settings(&self) -> &BuildSettings {
        &self.build
    }

    /// Run every step against a session obtained from `connector`
    pub async fn run(&self, connector: &dyn Connector, ctx: &RunContext) -> Result<PipelineReport> {
        let started = Instant::now();
        // Checked before the pipeline starts; no state is entered for it
        if !self.build.src.is_dir() {
            return Err(Error::SourceNotFound(self.build.src.clone()));
        }

        let mut report = PipelineReport::new();
        self.enter(&mut report, PipelineState::Idle);

        self.observer.step_started(Step::Connect);
        let endpoint = self.connection.endpoint();
        tracing::info!(
            "Connecting to {} (host key policy: {})",
            endpoint,
            self.connection.host_key_policy
        );

        let host = match connector.connect(&self.connection, ctx).await {
            Ok(host) => host,
            Err(e) => {
                self.enter(&mut report, PipelineState::Failed(Step::Connect));
                return Err(match e {
                    ConnectError::Interrupted(reason) => Error::Interrupted {
                        step: Step::Connect,
                        reason,
                    },
                    source => Error::Connect { endpoint, source },
                });
            }
        };
        self.enter(&mut report, PipelineState::Connected);

        let mut current = Step::PrepareBuildDir;
        let outcome = self
            .run_steps(host.as_ref(), ctx, &mut report, &mut current)
            .await;
        host.close();
        report.elapsed = started.elapsed();

        match outcome {
            Ok(()) => Ok(report),
            Err(e) => {
                let step = e.step().unwrap_or(current);
                self.enter(&mut report, PipelineState::Failed(step));
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        host: &dyn RemoteHost,
        ctx: &RunContext,
        report: &mut PipelineReport,
        current: &mut Step,
    ) -> Result<()> {
        let remote_root = RemotePath::new(&self.build.remote_dir);
        let build_dir = build_dir(&remote_root);

        self.run_command(host, Step::PrepareBuildDir, &mkdir_command(&build_dir), ctx)
            .await?;

        *current = Step::Upload;
        self.observer.step_started(Step::Upload);
        let upload = upload_tree(
            host,
            &self.build.src,
            &remote_root,
            &UploadOptions::from_settings(&self.build),
            ctx,
        )
        .await?;
        if !upload.is_clean() {
            return Err(Error::UploadIncomplete { report: upload });
        }
        tracing::info!(
            "Uploaded {} file(s), {} bytes in {:.2?}",
            upload.transferred.len(),
            upload.bytes,
            upload.duration
        );
        report.upload = upload;
        self.enter(report, PipelineState::TreeUploaded);

        *current = Step::Configure;
        let configure = self.toolchain.configure_command(&build_dir);
        self.run_command(host, Step::Configure, &configure, ctx).await?;
        self.enter(report, PipelineState::Configured);

        *current = Step::Build;
        let build = self.toolchain.build_command(&build_dir);
        self.run_command(host, Step::Build, &build, ctx).await?;
        self.enter(report, PipelineState::Built);

        *current = Step::Retrieve;
        self.observer.step_started(Step::Retrieve);
        report.download = download_artifacts(
            host,
            &build_dir,
            &self.connection.target_dir,
            &self.build.artifacts,
            ctx,
        )
        .await?;
        self.enter(report, PipelineState::ArtifactsRetrieved);
        self.enter(report, PipelineState::Done);
        Ok(())
    }

    /// Run one remote command under the per-command timeout
    async fn run_command(
        &self,
        host: &dyn RemoteHost,
        step: Step,
        command: &str,
        ctx: &RunContext,
    ) -> Result<()> {
        self.observer.step_started(step);
        tracing::info!("{}: {}", step, command);

        let command_ctx = ctx.with_optional_timeout(self.build.command_timeout);
        let status = host
            .exec(command, &command_ctx)
            .await
            .map_err(|e| Error::from_exec(step, e))?;

        if !status.success() {
            return Err(Error::CommandFailed {
                step,
                code: status.code,
            });
        }
        Ok(())
    }

    fn enter(&self, report: &mut PipelineReport, state: PipelineState) {
        tracing::debug!("Pipeline state: {}", state);
        report.states.push(state);
        self.observer.state_changed(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_and_numbers() {
        let numbers: Vec<_> = Step::ALL.iter().map(Step::number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Done.to_string(), "done");
        assert_eq!(
            PipelineState::Failed(Step::PrepareBuildDir).to_string(),
            "failed at build directory setup"
        );
        assert!(PipelineState::Failed(Step::Build).is_terminal());
        assert!(!PipelineState::Built.is_terminal());
    }

    #[test]
    fn test_report_exit_code() {
        let mut report = PipelineReport::new();
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        report.download.record_success("a.bin", 1);
        report.download.record_failure("b.bin", "no such file");
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn test_pipeline_uses_settings_toolchain() {
        crate::logging::init_test_logging();
        let connection = ConnectionSettings::new("h", "u", "/k", "/out");
        let mut build = BuildSettings::new("/src", "/srv/proj");
        build.jobs = Some(2);
        let pipeline = Pipeline::new(connection, build);
        let dir = RemotePath::new("/srv/proj/build");
        assert_eq!(
            pipeline.toolchain.build_command(&dir),
            "cd /srv/proj/build && cmake --build . -- -j2"
        );
        assert_eq!(pipeline.build_settings().remote_dir, "/srv/proj");
    }
}
