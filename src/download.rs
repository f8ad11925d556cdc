/*!
 * Artifact retrieval from the remote build directory
 */

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::pipeline::Step;
use crate::remote::{RemoteHost, RemotePath, TransferError};
use crate::report::TransferReport;

/// Local destination for one artifact: `<target>/<basename(name)>`
pub fn local_destination(target_dir: &Path, name: &str) -> Option<PathBuf> {
    RemotePath::new(name)
        .file_name()
        .map(|base| target_dir.join(base))
}

/// Copy each named artifact from `build_dir` into `target_dir`
///
/// An empty list touches nothing and yields a `Skipped` report. Otherwise the
/// target directory is created if missing and every artifact is attempted;
/// per-artifact failures are collected in order. Only an interruption ends
/// the pass early.
pub async fn download_artifacts(
    host: &dyn RemoteHost,
    build_dir: &RemotePath,
    target_dir: &Path,
    artifacts: &[String],
    ctx: &RunContext,
) -> Result<TransferReport> {
    let mut report = TransferReport::new();
    if artifacts.is_empty() {
        tracing::info!("No artifacts requested; skipping retrieval");
        return Ok(report);
    }

    let started = Instant::now();
    std::fs::create_dir_all(target_dir).map_err(|source| Error::LocalIo {
        step: Step::Retrieve,
        source,
    })?;

    for name in artifacts {
        ctx.check().map_err(|reason| Error::Interrupted {
            step: Step::Retrieve,
            reason,
        })?;

        let Some(local) = local_destination(target_dir, name) else {
            report.record_failure(name, "artifact name has no file component");
            continue;
        };
        let remote = build_dir.join(name);

        match host.download(&remote, &local, ctx).await {
            Ok(bytes) => {
                tracing::info!("Retrieved {} -> {} ({} bytes)", remote, local.display(), bytes);
                report.record_success(name, bytes);
            }
            Err(TransferError::Interrupted(reason)) => {
                return Err(Error::Interrupted {
                    step: Step::Retrieve,
                    reason,
                });
            }
            Err(e) => report.record_failure(name, e),
        }
    }

    report.duration = started.elapsed();
    Ok(report)
}
