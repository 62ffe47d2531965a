use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;
use tooci_core::config::RepositoryConfig;
use tooci_core::gateway::MockToolGateway;
use tooci_core::helm::{ChartRecord, HelmTool};
use tooci_core::record::RecordStore;
use tooci_core::repository::Repository;
use tooci_core::version::Outcome;
use tooci_core::{ErrorKind, MirrorError};

fn subcommand(argv: &[String]) -> Option<&str> {
    argv.get(1).map(String::as_str)
}

fn destination(argv: &[String]) -> PathBuf {
    let i = argv
        .iter()
        .position(|a| a == "--destination")
        .expect("fetch should pass --destination");
    PathBuf::from(&argv[i + 1])
}

/// Remembers the fetch destination so tests can check it is gone afterwards.
type WorkDir = Arc<Mutex<Option<PathBuf>>>;

fn remember(work_dir: &WorkDir, argv: &[String]) -> PathBuf {
    let dest = destination(argv);
    *work_dir.lock().unwrap() = Some(dest.clone());
    dest
}

fn assert_work_dir_removed(work_dir: &WorkDir) {
    let dir = work_dir
        .lock()
        .unwrap()
        .clone()
        .expect("fetch should have run");
    assert!(!dir.exists(), "working directory left behind: {}", dir.display());
}

fn write_package(path: &Path, files: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn demo_repository(records_dir: &Path, processors: Vec<String>) -> Repository {
    let config = RepositoryConfig {
        source: "https://example.invalid/charts".to_string(),
        processors,
        ..Default::default()
    };
    let mut repo = Repository::new(
        "demo",
        &config,
        Some("registry.example.com/mirror"),
        RecordStore::new(records_dir),
    )
    .unwrap();
    repo.ingest(vec![ChartRecord {
        name: "demo-tooci/app".to_string(),
        version: "1.0.0".to_string(),
        app_version: "1.0".to_string(),
        description: "Demo app".to_string(),
    }])
    .unwrap();
    repo
}

#[tokio::test]
async fn test_process_is_idempotent() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let work_dir = WorkDir::default();
    let fetched = work_dir.clone();
    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .times(1)
        .returning(move |argv, timeout| {
            assert!(timeout.is_some(), "fetch must be time-bounded");
            std::fs::write(remember(&fetched, argv).join("app-1.0.0.tgz"), b"package").unwrap();
            Ok(String::new())
        });
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("push"))
        .times(1)
        .returning(|argv, _| {
            assert_eq!(argv[3], "oci://registry.example.com/mirror/demo");
            assert!(argv[2].ends_with("app-1.0.0.tgz"), "pushed {}", argv[2]);
            Ok(String::new())
        });
    let helm = HelmTool::new(Arc::new(mock));

    assert_eq!(version.process(&helm).await.unwrap(), Outcome::Processed);
    assert!(version.is_recorded());
    assert_work_dir_removed(&work_dir);
    // A second pass must not touch the gateway at all.
    assert_eq!(version.process(&helm).await.unwrap(), Outcome::Skipped);
}

#[tokio::test]
async fn test_record_contents_after_processing() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let mut mock = MockToolGateway::new();
    mock.expect_run().returning(|argv, _| {
        if subcommand(argv) == Some("fetch") {
            std::fs::write(destination(argv).join("app-1.0.0.tgz"), b"package").unwrap();
        }
        Ok(String::new())
    });
    version
        .process(&HelmTool::new(Arc::new(mock)))
        .await
        .unwrap();

    let store = RecordStore::new(records.path());
    let record = store.read(&version.record_key).unwrap();
    assert_eq!(record.chart_target, "demo/app");
    assert_eq!(record.source, "https://example.invalid/charts");
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.app_version, "1.0");
    assert_eq!(record.description, "Demo app");
    assert_eq!(record.oci_target, "registry.example.com/mirror/demo");
    assert_eq!(
        record.oci_target_version,
        "registry.example.com/mirror/demo/app:1.0.0"
    );
    assert!(records
        .path()
        .join("info/demo/app--1.0.0.json")
        .is_file());
}

#[cfg(unix)]
#[test]
fn test_records_are_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let path = RecordStore::new(records.path())
        .write(&version.record_key, &version.record())
        .unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644, "record mode {:o}", mode & 0o777);
}

#[tokio::test]
async fn test_two_staged_packages_fail_without_push() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let work_dir = WorkDir::default();
    let fetched = work_dir.clone();
    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .times(1)
        .returning(move |argv, _| {
            let dest = remember(&fetched, argv);
            std::fs::write(dest.join("app-1.0.0.tgz"), b"one").unwrap();
            std::fs::write(dest.join("app-1.0.0-extra.tgz"), b"two").unwrap();
            Ok(String::new())
        });
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("push"))
        .never();
    let helm = HelmTool::new(Arc::new(mock));

    let err = version.process(&helm).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invariant);
    assert!(err.to_string().contains("found 2"), "got: {err}");
    assert!(!version.is_recorded());
    assert_work_dir_removed(&work_dir);
}

#[tokio::test]
async fn test_empty_fetch_is_an_invariant_error() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .times(1)
        .returning(|_, _| Ok(String::new()));
    let helm = HelmTool::new(Arc::new(mock));

    let err = version.process(&helm).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invariant);
    assert!(!version.is_recorded());
}

#[tokio::test]
async fn test_push_failure_leaves_no_record() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec![]);
    let version = repo.all_versions()[0];

    let work_dir = WorkDir::default();
    let fetched = work_dir.clone();
    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .returning(move |argv, _| {
            std::fs::write(remember(&fetched, argv).join("app-1.0.0.tgz"), b"package").unwrap();
            Ok(String::new())
        });
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("push"))
        .times(1)
        .returning(|argv, _| {
            Err(MirrorError::Tool {
                argv: argv.to_vec(),
                exit_code: Some(1),
                stderr: "unauthorized".to_string(),
            })
        });
    let helm = HelmTool::new(Arc::new(mock));

    let err = version.process(&helm).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tool);
    assert!(err.to_string().contains("unauthorized"), "got: {err}");
    assert!(!version.is_recorded());
    assert_work_dir_removed(&work_dir);
}

#[tokio::test]
async fn test_transforms_rewrite_package_before_push() {
    let records = tempdir().unwrap();
    let repo = demo_repository(
        records.path(),
        vec![
            "check_chart_descriptors".to_string(),
            "strip_chart_tests".to_string(),
        ],
    );
    let version = repo.all_versions()[0];

    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .times(1)
        .returning(|argv, _| {
            write_package(
                &destination(argv).join("app-1.0.0.tgz"),
                &[
                    ("app/Chart.yaml", "name: app\nversion: 1.0.0\n"),
                    ("app/templates/deployment.yaml", "kind: Deployment\n"),
                    ("app/templates/tests/test-connection.yaml", "kind: Pod\n"),
                ],
            );
            Ok(String::new())
        });
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("push"))
        .times(1)
        .returning(|argv, _| {
            let file = File::open(&argv[2]).unwrap();
            let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
            let names: Vec<String> = archive
                .entries()
                .unwrap()
                .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(
                names,
                vec!["app/Chart.yaml", "app/templates/deployment.yaml"]
            );
            Ok(String::new())
        });
    let helm = HelmTool::new(Arc::new(mock));

    assert_eq!(version.process(&helm).await.unwrap(), Outcome::Processed);
}

#[tokio::test]
async fn test_failed_transform_stops_before_push() {
    let records = tempdir().unwrap();
    let repo = demo_repository(records.path(), vec!["check_chart_descriptors".to_string()]);
    let version = repo.all_versions()[0];

    let mut mock = MockToolGateway::new();
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("fetch"))
        .times(1)
        .returning(|argv, _| {
            write_package(
                &destination(argv).join("app-1.0.0.tgz"),
                &[("app/values.yaml", "replicas: 1\n")],
            );
            Ok(String::new())
        });
    mock.expect_run()
        .withf(|argv, _| subcommand(argv) == Some("push"))
        .never();
    let helm = HelmTool::new(Arc::new(mock));

    let err = version.process(&helm).await.unwrap_err();
    assert!(
        matches!(err, MirrorError::Transform { ref name, .. } if name == "check_chart_descriptors")
    );
    assert!(!version.is_recorded());
}
