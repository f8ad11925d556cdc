/*!
 * Tree upload and artifact retrieval against an in-process host
 */

mod common;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use walkdir::WalkDir;

use common::{fake_host, Event, HostState};
use remotebuild::context::RunContext;
use remotebuild::download::download_artifacts;
use remotebuild::error::Error;
use remotebuild::remote::RemotePath;
use remotebuild::report::{SkipReason, TransferStatus};
use remotebuild::upload::{upload_tree, UploadOptions};

/// Relative path -> contents for every regular file under `root`
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_remote_tree_matches_local_tree() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    for (path, body) in [
        ("CMakeLists.txt", "project(demo)"),
        ("src/main.cpp", "int main() {}"),
        ("src/util/math.hpp", "#pragma once"),
        ("include/demo/api.h", ""),
        ("docs/deep/er/notes.md", "n"),
    ] {
        let full = src.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, body).unwrap();
    }
    std::fs::create_dir_all(src.path().join("empty")).unwrap();

    let state = HostState::new(remote.path());
    let report = upload_tree(
        &fake_host(&state),
        src.path(),
        &RemotePath::new("/home/dev/demo"),
        &UploadOptions::default(),
        &RunContext::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status(), TransferStatus::Complete);
    assert_eq!(report.transferred.len(), 5);
    assert_eq!(
        snapshot(&state.local("/home/dev/demo")),
        snapshot(src.path())
    );
}

#[tokio::test]
async fn test_each_directory_created_once() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("lib")).unwrap();
    for name in ["a.c", "b.c", "c.c"] {
        std::fs::write(src.path().join("lib").join(name), name).unwrap();
    }

    let state = HostState::new(remote.path());
    upload_tree(
        &fake_host(&state),
        src.path(),
        &RemotePath::new("/p"),
        &UploadOptions::default(),
        &RunContext::new(),
    )
    .await
    .unwrap();

    let mkdirs: Vec<_> = state
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("mkdir -p"))
        .collect();
    assert_eq!(mkdirs, vec!["mkdir -p /p/lib".to_string()]);
}

#[tokio::test]
async fn test_excluded_paths_are_not_uploaded() {
    let src = tempdir().unwrap();
    let remote = tempdir().unwrap();
    std::fs::create_dir_all(src.path().join(".git/objects")).unwrap();
    std::fs::write(src.path().join(".git/objects/pack"), "x").unwrap();
    std::fs::write(src.path().join("main.c"), "int main;").unwrap();
    std::fs::write(src.path().join("main.o"), "obj").unwrap();

    let state = HostState::new(remote.path());
    let options = UploadOptions {
        exclude: vec![".git".to_string(), "*.o".to_string()],
        ..UploadOptions::default()
    };
    let report = upload_tree(
        &fake_host(&state),
        src.path(),
        &RemotePath::new("/p"),
        &options,
        &RunContext::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.transferred, vec![PathBuf::from("main.c")]);
    assert_eq!(
        report.skipped,
        vec![
            (PathBuf::from(".git"), SkipReason::Excluded),
            (PathBuf::from("main.o"), SkipReason::Excluded),
        ]
    );
    assert!(!state.local("/p/.git").exists());
}

#[tokio::test]
async fn test_upload_of_missing_source_fails() {
    let remote = tempdir().unwrap();
    let state = HostState::new(remote.path());

    let err = upload_tree(
        &fake_host(&state),
        &remote.path().join("does-not-exist"),
        &RemotePath::new("/p"),
        &UploadOptions::default(),
        &RunContext::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::SourceNotFound(_)));
    assert!(state.events().is_empty());
}

#[tokio::test]
async fn test_artifacts_land_under_base_name() {
    let remote = tempdir().unwrap();
    let target = tempdir().unwrap();
    let state = HostState::new(remote.path());
    std::fs::create_dir_all(state.local("/p/build/bin")).unwrap();
    std::fs::write(state.local("/p/build/bin/tool"), "T").unwrap();
    std::fs::write(state.local("/p/build/out.bin"), "X").unwrap();

    let artifacts = vec!["bin/tool".to_string(), "out.bin".to_string()];
    let report = download_artifacts(
        &fake_host(&state),
        &RemotePath::new("/p/build"),
        target.path(),
        &artifacts,
        &RunContext::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status(), TransferStatus::Complete);
    assert_eq!(std::fs::read_to_string(target.path().join("tool")).unwrap(), "T");
    assert_eq!(std::fs::read_to_string(target.path().join("out.bin")).unwrap(), "X");
    assert_eq!(
        state.events(),
        vec![
            Event::Download("/p/build/bin/tool".to_string()),
            Event::Download("/p/build/out.bin".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_target_directory_created_when_missing() {
    let remote = tempdir().unwrap();
    let local = tempdir().unwrap();
    let target = local.path().join("nested").join("out");
    let state = HostState::new(remote.path());
    std::fs::create_dir_all(state.local("/p/build")).unwrap();
    std::fs::write(state.local("/p/build/app"), "A").unwrap();

    download_artifacts(
        &fake_host(&state),
        &RemotePath::new("/p/build"),
        &target,
        &["app".to_string()],
        &RunContext::new(),
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(target.join("app")).unwrap(), "A");
}
