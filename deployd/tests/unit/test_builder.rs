//! Image builder tests

use std::path::Path;
use std::sync::Arc;

use deployd::daemon::memory::{Faults, InMemoryRuntime, UNTAGGED};
use deployd::daemon::ContainerRuntime;
use deployd::deploy::build_log::{BuildAttempt, BuildLogSink};
use deployd::deploy::builder::{check_build_descriptor, package_context, ImageBuilder};
use deployd::deploy::identity::AppId;
use deployd::errors::DeployError;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

struct Fixture {
    runtime: Arc<InMemoryRuntime>,
    builder: ImageBuilder,
    checkout: TempDir,
    logs_dir: TempDir,
}

fn fixture() -> Fixture {
    let runtime = Arc::new(InMemoryRuntime::new());
    let logs = tempfile::tempdir().unwrap();
    let checkout = tempfile::tempdir().unwrap();
    let builder = ImageBuilder::new(
        runtime.clone() as Arc<dyn ContainerRuntime>,
        BuildLogSink::new(logs.path()),
    );
    Fixture {
        runtime,
        builder,
        checkout,
        logs_dir: logs,
    }
}

fn write_dockerfile(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), "FROM scratch\nCOPY . /app\n").unwrap();
}

fn attempt() -> BuildAttempt {
    BuildAttempt::new(AppId::parse("demo").unwrap())
}

#[tokio::test]
async fn test_build_tags_image_and_logs_output() {
    let f = fixture();
    write_dockerfile(f.checkout.path(), "Dockerfile");
    std::fs::write(f.checkout.path().join("main.py"), "print('hi')\n").unwrap();

    let report = assert_ok!(f.builder.build(f.checkout.path(), &attempt()).await);
    assert_eq!(report.tag, "demo");
    assert!(report.bytes_logged > 0);

    let log = std::fs::read_to_string(&report.log_path).unwrap();
    assert!(log.contains("Successfully tagged demo:latest"));
    assert_eq!(log.len() as u64, report.bytes_logged);

    let images = f.runtime.images().await;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].repo_tags, vec!["demo:latest".to_string()]);
}

#[tokio::test]
async fn test_rebuild_leaves_previous_image_untagged() {
    let f = fixture();
    write_dockerfile(f.checkout.path(), "Dockerfile");

    f.builder.build(f.checkout.path(), &attempt()).await.unwrap();
    f.builder.build(f.checkout.path(), &attempt()).await.unwrap();

    let images = f.runtime.images().await;
    assert_eq!(images.len(), 2);
    assert_eq!(
        images
            .iter()
            .filter(|i| i.repo_tags == vec![UNTAGGED.to_string()])
            .count(),
        1
    );
}

#[tokio::test]
async fn test_missing_dockerfile_fails_before_daemon_call() {
    let f = fixture();

    let err = assert_err!(f.builder.build(f.checkout.path(), &attempt()).await);
    assert!(matches!(err, DeployError::PreconditionFailed(_)));
    assert!(f.runtime.calls().await.is_empty());
}

#[tokio::test]
async fn test_dockerfile_must_be_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("Dockerfile")).unwrap();

    let err = assert_err!(check_build_descriptor(dir.path(), "Dockerfile").await);
    assert!(matches!(err, DeployError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_custom_dockerfile_name() {
    let f = fixture();
    write_dockerfile(f.checkout.path(), "Containerfile");
    let builder = ImageBuilder::new(
        f.runtime.clone() as Arc<dyn ContainerRuntime>,
        BuildLogSink::new(f.logs_dir.path()),
    )
    .with_dockerfile("Containerfile");

    assert_ok!(builder.build(f.checkout.path(), &attempt()).await);
    assert_err!(f.builder.build(f.checkout.path(), &attempt()).await);
}

#[tokio::test]
async fn test_transport_failure_is_logged() {
    let f = fixture();
    write_dockerfile(f.checkout.path(), "Dockerfile");
    f.runtime
        .set_faults(Faults {
            build_transport: Some("daemon unreachable".to_string()),
            ..Default::default()
        })
        .await;
    let attempt = attempt();

    let err = assert_err!(f.builder.build(f.checkout.path(), &attempt).await);
    assert!(matches!(err, DeployError::BuildTransportFailed(_)));

    let log = std::fs::read_to_string(f.builder.logs().path_for(&attempt)).unwrap();
    assert!(log.contains("daemon unreachable"));
    assert!(log.ends_with('\n'));
}

#[tokio::test]
async fn test_error_record_fails_build_after_full_copy() {
    let f = fixture();
    write_dockerfile(f.checkout.path(), "Dockerfile");
    f.runtime
        .set_faults(Faults {
            build_error_record: Some("The command '/bin/sh -c make' returned a non-zero code: 2".to_string()),
            ..Default::default()
        })
        .await;
    let attempt = attempt();

    let err = assert_err!(f.builder.build(f.checkout.path(), &attempt).await);
    match err {
        DeployError::BuildFailed(message) => assert!(message.contains("non-zero code: 2")),
        other => panic!("unexpected error: {other}"),
    }

    let log = std::fs::read_to_string(f.builder.logs().path_for(&attempt)).unwrap();
    assert!(log.contains("Step 1/1"));
    assert!(log.contains("errorDetail"));
    assert!(f.runtime.images().await.is_empty());
}

#[tokio::test]
async fn test_context_contains_checkout_files() {
    let dir = tempfile::tempdir().unwrap();
    write_dockerfile(dir.path(), "Dockerfile");
    std::fs::create_dir(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src").join("app.py"), "pass\n").unwrap();

    let context = package_context(dir.path()).await.unwrap();
    let mut archive = tar::Archive::new(std::io::Cursor::new(context.to_vec()));
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect();

    assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
    assert!(names.iter().any(|n| n.ends_with("src/app.py")));
}
