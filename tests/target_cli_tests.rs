//! CLI-driven destinations run against stand-in executables
#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{create_source_repository, local_repository, TestEnvironment};
use orgbackup::targets::dat::DatConfig;
use orgbackup::targets::gittorrent::GitTorrentConfig;
use orgbackup::targets::{DatTarget, GitTorrentTarget};
use orgbackup::{BackupTarget, SyncMethod};

const TIMEOUT: Duration = Duration::from_secs(5);
const DAT_KEY: &str = "778f8d955175c92e4ced5e4f5563f69bfec0c86cc6f670352c457943666fe639";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let script = dir.join(name);
    std::fs::write(&script, format!("#!/bin/sh\n{}", body)).expect("Failed to write script");
    let mut permissions = std::fs::metadata(&script).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&script, permissions).unwrap();
    script
}

/// `git-torrent` that writes its last argument as the torrent file
fn fake_git_torrent(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "git-torrent",
        r#"case "$1" in
  --version) echo "git-torrent 0.3.1" ;;
  create)
    for last; do :; done
    echo "d8:announce" > "$last"
    ;;
  *) exit 1 ;;
esac
"#,
    )
}

/// `dat` that logs each subcommand and prints a key for `keys`
fn fake_dat(dir: &Path, log: &Path) -> PathBuf {
    write_script(
        dir,
        "dat",
        &format!(
            r#"echo "$1" >> "{log}"
case "$1" in
  --version) echo "13.13.1" ;;
  init|commit) ;;
  add) [ -f README ] || exit 2 ;;
  keys) echo "dat://{key}" ;;
  *) exit 1 ;;
esac
"#,
            log = log.display(),
            key = DAT_KEY
        ),
    )
}

fn gittorrent_config(tracker: &str, binary: &Path) -> GitTorrentConfig {
    GitTorrentConfig {
        enabled: true,
        tracker_url: tracker.to_string(),
        port: 6882,
        binary: binary.display().to_string(),
    }
}

#[tokio::test]
async fn test_gittorrent_connection_check_requires_tracker() {
    let env = TestEnvironment::new(&[]);
    let binary = fake_git_torrent(env.temp_dir.path());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/announce"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let reachable = GitTorrentTarget::new(gittorrent_config(&server.uri(), &binary), TIMEOUT).unwrap();
    assert!(reachable.test_connection().await);

    let unreachable = GitTorrentTarget::new(
        gittorrent_config("http://127.0.0.1:1", &binary),
        Duration::from_secs(1),
    )
    .unwrap();
    assert!(!unreachable.test_connection().await);
}

#[tokio::test]
async fn test_gittorrent_uploads_torrent_to_tracker() {
    let env = TestEnvironment::new(&[]);
    let source = env.temp_dir.path().join("svc");
    create_source_repository(&source);
    let binary = fake_git_torrent(env.temp_dir.path());

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let target = GitTorrentTarget::new(gittorrent_config(&server.uri(), &binary), TIMEOUT).unwrap();
    let result = target
        .backup_repository(&local_repository("svc", &source, false))
        .await
        .unwrap();

    assert_eq!(result.method, SyncMethod::GittorrentBundle);
    assert_eq!(result.remote_id.as_deref(), Some("svc.torrent"));
    assert_eq!(result.location, Some(format!("{}/announce", server.uri())));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"torrent\""));
    assert!(body.contains("filename=\"svc.torrent\""));
    assert!(body.contains("d8:announce"));
}

#[tokio::test]
async fn test_gittorrent_tracker_rejection_fails_task() {
    let env = TestEnvironment::new(&[]);
    let source = env.temp_dir.path().join("svc");
    create_source_repository(&source);
    let binary = fake_git_torrent(env.temp_dir.path());

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(413).set_body_string("torrent too large"))
        .mount(&server)
        .await;

    let target = GitTorrentTarget::new(gittorrent_config(&server.uri(), &binary), TIMEOUT).unwrap();
    let err = target
        .backup_repository(&local_repository("svc", &source, false))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("torrent too large"));
}

#[tokio::test]
async fn test_dat_archive_is_created_from_working_tree() {
    let env = TestEnvironment::new(&[]);
    let source = env.temp_dir.path().join("svc");
    create_source_repository(&source);
    let log = env.temp_dir.path().join("dat.log");
    let binary = fake_dat(env.temp_dir.path(), &log);

    let target = DatTarget::new(DatConfig {
        enabled: true,
        binary: binary.display().to_string(),
    });
    assert!(target.test_connection().await);

    let result = target
        .backup_repository(&local_repository("svc", &source, false))
        .await
        .unwrap();

    assert_eq!(result.method, SyncMethod::DatArchive);
    assert_eq!(result.remote_id.as_deref(), Some(DAT_KEY));
    assert_eq!(result.location, Some(format!("dat://{}", DAT_KEY)));

    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
        calls.lines().collect::<Vec<_>>(),
        vec!["--version", "init", "add", "commit", "keys"]
    );
}

#[tokio::test]
async fn test_dat_missing_key_fails_task() {
    let env = TestEnvironment::new(&[]);
    let source = env.temp_dir.path().join("svc");
    create_source_repository(&source);
    let binary = write_script(env.temp_dir.path(), "dat", "echo \"no archive\"\n");

    let target = DatTarget::new(DatConfig {
        enabled: true,
        binary: binary.display().to_string(),
    });
    let err = target
        .backup_repository(&local_repository("svc", &source, false))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Could not read Dat archive key"));
}
