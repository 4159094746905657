use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use davstress::body::SizeDistribution;
use davstress::config::{Config, ConfigSecret};
use davstress::error::ConfigurationError;
use davstress::http::HttpRemote;
use davstress::identity::{Assignment, IdentitySpace};
use davstress::scenario::{self, RunLimit, Scenario};
use davstress::task::{UploadBody, UploadTask};
use davstress_test::server::TestServer;
use secrecy::SecretBox;

const PASSWORD: &str = "test_password1234!";

fn identities(password: &str) -> Arc<IdentitySpace> {
    let password = SecretBox::new(Box::new(ConfigSecret::from(password)));
    Arc::new(IdentitySpace::new("locust_user", 30, password, Assignment::RoundRobin).unwrap())
}

fn scenario(server: &TestServer, password: &str) -> Result<Scenario, ConfigurationError> {
    let small = UploadTask::new(
        "1kb_file",
        UploadBody::Generated(SizeDistribution::Fixed(1024)),
    );
    let kept = UploadTask::new(
        "kept_file_{n}",
        UploadBody::Generated(SizeDistribution::Fixed(10)),
    )
    .variants(3)
    .delete_after_upload(false);

    Scenario::builder()
        .task("upload_1kb", 10, Arc::new(small))
        .task("upload_kept", 5, Arc::new(kept))
        .pacing(Duration::ZERO, Duration::from_millis(5))
        .users(3)
        .identities(identities(password))
        .seed(42)
        .build(Arc::new(HttpRemote::new(server.url("/"))))
}

#[tokio::test]
async fn uploads_and_cleans_up() {
    davstress_test::tracing::init();
    let server = TestServer::new(PASSWORD).await;

    let summary = scenario(&server, PASSWORD)
        .unwrap()
        .run(RunLimit::Iterations(40))
        .await;

    assert_eq!(summary.total_completed(), 40);
    assert_eq!(summary.total_failures(), 0);
    assert!(!summary.aborted);
    assert!(summary.timeout.is_none());

    let small = summary.completed("upload_1kb");
    let kept = summary.completed("upload_kept");
    assert_eq!(server.puts(), 40);
    assert_eq!(server.deletes(), small);
    assert_eq!(server.bytes_received(), small * 1024 + kept * 10);

    // Only files of the task without cleanup remain, at most one per user and variant.
    let stored = server.stored_files();
    assert!(!stored.is_empty());
    assert!(stored.len() <= 9);
    for path in &stored {
        assert!(path.starts_with("remote.php/dav/files/locust_user"));
        assert!(path.contains("/kept_file_"));
        assert_eq!(server.file_size(path), Some(10));
    }
}

#[tokio::test]
async fn failing_deletes_are_counted_per_task() {
    davstress_test::tracing::init();
    let server = TestServer::failing_deletes(PASSWORD).await;

    let summary = scenario(&server, PASSWORD)
        .unwrap()
        .run(RunLimit::Iterations(30))
        .await;

    assert_eq!(summary.total_completed(), 30);
    assert!(summary.completed("upload_1kb") > 0);
    assert_eq!(
        summary.failures("upload_1kb"),
        summary.completed("upload_1kb")
    );
    assert_eq!(summary.failures("upload_kept"), 0);
    assert!(!summary.aborted);

    // The uploads themselves went through.
    assert_eq!(server.puts(), 30);
}

#[tokio::test]
async fn wrong_password_fails_every_task() {
    davstress_test::tracing::init();
    let server = TestServer::new(PASSWORD).await;

    let summary = scenario(&server, "wrong")
        .unwrap()
        .run(RunLimit::Iterations(12))
        .await;

    assert_eq!(summary.total_completed(), 12);
    assert_eq!(summary.total_failures(), 12);
    assert_eq!(server.puts(), 0);
    assert_eq!(server.deletes(), 0);
}

#[tokio::test]
async fn runs_from_configuration_file() {
    davstress_test::tracing::init();
    let server = TestServer::new("secret").await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
remote: {remote}
users: 2
iterations: 10
seed: 7
pacing:
  min: 0s
  max: 0s
identities:
  prefix: bench
  size: 4
  password: secret
tasks:
  - name: upload_text
    weight: 1
    file_name: test_file.txt
    body:
      type: generated
      size: 4KiB
"#,
        remote = server.url("/")
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    let remote = HttpRemote::new(&config.remote);
    let scenario = scenario::configure(&config, Arc::new(remote)).unwrap();
    let limit = RunLimit::from_options(config.duration, config.iterations);

    let summary = scenario.run(limit).await;

    assert_eq!(summary.completed("upload_text"), 10);
    assert_eq!(summary.total_failures(), 0);
    assert_eq!(server.puts(), 10);
    assert_eq!(server.deletes(), 10);
    assert_eq!(server.bytes_received(), 10 * 4096);
    assert!(server.stored_files().is_empty());
}

fn file_scenario(server: &TestServer, path: PathBuf) -> Scenario {
    let upload = UploadTask::new("test_locust_file.txt", UploadBody::File(path));

    Scenario::builder()
        .task("upload_text", 1, Arc::new(upload))
        .pacing(Duration::ZERO, Duration::ZERO)
        .users(2)
        .identities(identities(PASSWORD))
        .seed(1)
        .build(Arc::new(HttpRemote::new(server.url("/"))))
        .unwrap()
}

#[tokio::test]
async fn streams_files_from_disk() {
    davstress_test::tracing::init();
    let server = TestServer::new(PASSWORD).await;

    let contents = b"locust file contents\n".repeat(4096);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&contents).unwrap();
    file.flush().unwrap();

    let upload = UploadTask::new("test_locust_file.txt", UploadBody::File(file.path().into()))
        .delete_after_upload(false);
    let scenario = Scenario::builder()
        .task("upload_text", 1, Arc::new(upload))
        .pacing(Duration::ZERO, Duration::ZERO)
        .users(2)
        .identities(identities(PASSWORD))
        .build(Arc::new(HttpRemote::new(server.url("/"))))
        .unwrap();

    let summary = scenario.run(RunLimit::Iterations(6)).await;

    assert_eq!(summary.completed("upload_text"), 6);
    assert_eq!(summary.total_failures(), 0);
    assert_eq!(server.puts(), 6);
    assert_eq!(server.bytes_received(), 6 * contents.len() as u64);
    for user in ["locust_user0", "locust_user1"] {
        let path = format!("/remote.php/dav/files/{user}/test_locust_file.txt");
        assert_eq!(server.file_size(&path), Some(contents.len() as u64));
    }

    // The same file uploads and deletes cleanly on the next run.
    let summary = file_scenario(&server, file.path().into())
        .run(RunLimit::Iterations(4))
        .await;
    assert_eq!(summary.total_failures(), 0);
    assert_eq!(server.puts(), 10);
    assert_eq!(server.bytes_received(), 10 * contents.len() as u64);
}

#[tokio::test]
async fn missing_file_fails_without_uploading() {
    davstress_test::tracing::init();
    let server = TestServer::new(PASSWORD).await;
    let dir = tempfile::tempdir().unwrap();

    let summary = file_scenario(&server, dir.path().join("does-not-exist"))
        .run(RunLimit::Iterations(8))
        .await;

    assert_eq!(summary.completed("upload_text"), 8);
    assert_eq!(summary.failures("upload_text"), 8);
    assert!(!summary.aborted);
    assert!(summary.timeout.is_none());
    assert_eq!(server.puts(), 0);
    assert_eq!(server.deletes(), 0);
}
