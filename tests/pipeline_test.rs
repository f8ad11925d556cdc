/*!
 * End-to-end pipeline runs against an in-process host
 */

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use common::{Event, FakeConnector, HostState};
use remotebuild::config::{BuildSettings, ConfigError, ConnectionSettings, HostKeyPolicy};
use remotebuild::context::RunContext;
use remotebuild::error::{Error, EXIT_COMMAND, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
use remotebuild::pipeline::{Pipeline, PipelineState, Step, StepObserver};

fn connection(target: &Path) -> ConnectionSettings {
    ConnectionSettings::new("fake", "builder", "/keys/id_ed25519", target)
        .with_host_key_policy(HostKeyPolicy::AcceptAny)
}

fn source_tree(root: &Path) {
    std::fs::write(root.join("a.txt"), "hello").unwrap();
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("sub").join("b.txt"), "world").unwrap();
}

#[derive(Default, Clone)]
struct Recorder {
    steps: Arc<Mutex<Vec<Step>>>,
    states: Arc<Mutex<Vec<PipelineState>>>,
}

impl StepObserver for Recorder {
    fn step_started(&self, step: Step) {
        self.steps.lock().unwrap().push(step);
    }

    fn state_changed(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }
}

#[tokio::test]
async fn test_full_run_mirrors_tree_and_retrieves_artifact() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    std::fs::create_dir_all(state.local("/srv/proj/build")).unwrap();
    std::fs::write(state.local("/srv/proj/build/out.bin"), "X").unwrap();

    let mut build = BuildSettings::new(src.path(), "/srv/proj");
    build.artifacts = vec!["out.bin".to_string()];
    let pipeline = Pipeline::new(connection(target.path()), build);

    let report = pipeline
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(state.local("/srv/proj/a.txt")).unwrap(),
        "hello"
    );
    assert_eq!(
        std::fs::read_to_string(state.local("/srv/proj/sub/b.txt")).unwrap(),
        "world"
    );
    assert_eq!(
        std::fs::read_to_string(target.path().join("out.bin")).unwrap(),
        "X"
    );

    assert_eq!(
        report.states,
        vec![
            PipelineState::Idle,
            PipelineState::Connected,
            PipelineState::TreeUploaded,
            PipelineState::Configured,
            PipelineState::Built,
            PipelineState::ArtifactsRetrieved,
            PipelineState::Done,
        ]
    );
    assert_eq!(report.exit_code(), EXIT_SUCCESS);
    assert_eq!(report.upload.transferred.len(), 2);
    assert!(state.is_closed());
}

#[tokio::test]
async fn test_remote_commands_follow_templates() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    std::fs::write(src.path().join("CMakeLists.txt"), "project(x)").unwrap();

    let state = HostState::new(remote.path());
    let mut build = BuildSettings::new(src.path(), "/srv/proj");
    build.build_type = "Debug".to_string();
    build.cmake_args = "-DFOO=ON".to_string();

    Pipeline::new(connection(target.path()), build)
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(
        state.commands(),
        vec![
            "mkdir -p /srv/proj/build".to_string(),
            "mkdir -p /srv/proj".to_string(),
            "cd /srv/proj/build && cmake .. -DCMAKE_BUILD_TYPE=Debug -DFOO=ON".to_string(),
            "cd /srv/proj/build && cmake --build . -- -j$(nproc)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_parent_directory_created_before_file() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .run(&FakeConnector::new(state.clone()), &RunContext::new())
    .await
    .unwrap();

    let events = state.events();
    let mkdir_sub = events
        .iter()
        .position(|e| *e == Event::Exec("mkdir -p /srv/proj/sub".to_string()))
        .unwrap();
    let upload_b = events
        .iter()
        .position(|e| *e == Event::Upload("/srv/proj/sub/b.txt".to_string()))
        .unwrap();
    assert!(mkdir_sub < upload_b);
}

#[tokio::test]
async fn test_empty_artifact_list_reaches_done_without_touching_target() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target_root = tempdir().unwrap();
    let target = target_root.path().join("artifacts");
    source_tree(src.path());

    let state = HostState::new(remote.path());
    let report = Pipeline::new(connection(&target), BuildSettings::new(src.path(), "/srv/proj"))
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.final_state(), Some(PipelineState::Done));
    assert!(!target.exists());
    assert!(!state
        .events()
        .iter()
        .any(|e| matches!(e, Event::Download(_))));
}

#[tokio::test]
async fn test_build_failure_is_attributed_and_session_released() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    *state.build_exit.lock().unwrap() = 2;

    let mut build = BuildSettings::new(src.path(), "/srv/proj");
    build.artifacts = vec!["out.bin".to_string()];
    let err = Pipeline::new(connection(target.path()), build)
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::CommandFailed {
            step: Step::Build,
            code: 2
        }
    ));
    assert_eq!(err.exit_code(), EXIT_COMMAND);
    assert!(state.is_closed());
    assert!(!state
        .events()
        .iter()
        .any(|e| matches!(e, Event::Download(_))));
}

#[tokio::test]
async fn test_configure_failure_stops_before_build() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    *state.configure_exit.lock().unwrap() = 1;

    let err = Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .run(&FakeConnector::new(state.clone()), &RunContext::new())
    .await
    .unwrap_err();

    assert_eq!(err.step(), Some(Step::Configure));
    assert!(!state.commands().iter().any(|c| c.contains("--build")));
    assert!(state.is_closed());
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    let err = Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .run(&FakeConnector::refusing(state.clone()), &RunContext::new())
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Connect { .. }));
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert!(err.to_string().contains("builder@fake:22"));
    assert!(state.events().is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_fatal_after_full_pass() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    state
        .reject_uploads
        .lock()
        .unwrap()
        .push("/srv/proj/a.txt".to_string());

    let err = Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .run(&FakeConnector::new(state.clone()), &RunContext::new())
    .await
    .unwrap_err();

    match err {
        Error::UploadIncomplete { ref report } => {
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.transferred.len(), 1);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    // sub/b.txt was still attempted after a.txt failed
    assert!(state
        .events()
        .contains(&Event::Upload("/srv/proj/sub/b.txt".to_string())));
    assert!(!state.commands().iter().any(|c| c.contains("CMAKE_BUILD_TYPE")));
    assert!(state.is_closed());
}

#[tokio::test]
async fn test_missing_artifact_yields_partial_exit() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    std::fs::create_dir_all(state.local("/srv/proj/build")).unwrap();
    std::fs::write(state.local("/srv/proj/build/app"), "ELF").unwrap();

    let mut build = BuildSettings::new(src.path(), "/srv/proj");
    build.artifacts = vec!["app".to_string(), "libmissing.so".to_string()];
    let report = Pipeline::new(connection(target.path()), build)
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap();

    assert_eq!(report.final_state(), Some(PipelineState::Done));
    assert_eq!(report.exit_code(), EXIT_PARTIAL);
    assert_eq!(report.download.failures.len(), 1);
    assert!(target.path().join("app").is_file());
}

#[tokio::test]
async fn test_cancelled_run_fails_at_current_step() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    let ctx = RunContext::new();
    ctx.cancel();

    let err = Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .run(&FakeConnector::new(state.clone()), &ctx)
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Interrupted {
            step: Step::PrepareBuildDir,
            ..
        }
    ));
    assert!(state.is_closed());
}

#[tokio::test]
async fn test_observer_sees_every_step_in_order() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    source_tree(src.path());

    let state = HostState::new(remote.path());
    let recorder = Recorder::default();
    Pipeline::new(
        connection(target.path()),
        BuildSettings::new(src.path(), "/srv/proj"),
    )
    .with_observer(Box::new(recorder.clone()))
    .run(&FakeConnector::new(state), &RunContext::new())
    .await
    .unwrap();

    assert_eq!(*recorder.steps.lock().unwrap(), Step::ALL.to_vec());
}

#[test]
fn test_missing_remote_dir_stops_before_connecting() {
    let err = BuildSettings::require(Some("./src"), Some("")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(ref names) if names == &vec!["remote-dir"]));

    let err = BuildSettings::require(None, None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "src, remote-dir must be specified via flags or config"
    );
}

#[tokio::test]
async fn test_missing_source_stops_before_connecting() {
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    let state = HostState::new(remote.path());

    let recorder = Recorder::default();

    let err = Pipeline::new(
        connection(target.path()),
        BuildSettings::new(remote.path().join("nope"), "/srv/proj"),
    )
    .with_observer(Box::new(recorder.clone()))
    .run(&FakeConnector::new(state.clone()), &RunContext::new())
    .await
    .unwrap_err();

    assert!(matches!(err, Error::SourceNotFound(_)));
    assert_eq!(state.connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(recorder.states.lock().unwrap().is_empty());
    assert!(recorder.steps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unwritable_target_fails_at_retrieve() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    let local = tempdir().unwrap();
    source_tree(src.path());

    // The target path is taken by a regular file
    let target = local.path().join("out");
    std::fs::write(&target, "occupied").unwrap();

    let state = HostState::new(remote.path());
    std::fs::create_dir_all(state.local("/srv/proj/build")).unwrap();
    std::fs::write(state.local("/srv/proj/build/app"), "ELF").unwrap();

    let mut build = BuildSettings::new(src.path(), "/srv/proj");
    build.artifacts = vec!["app".to_string()];
    let recorder = Recorder::default();
    let err = Pipeline::new(connection(&target), build)
        .with_observer(Box::new(recorder.clone()))
        .run(&FakeConnector::new(state.clone()), &RunContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.step(), Some(Step::Retrieve));
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert_eq!(
        recorder.states.lock().unwrap().last(),
        Some(&PipelineState::Failed(Step::Retrieve))
    );
    assert!(state.is_closed());
}
