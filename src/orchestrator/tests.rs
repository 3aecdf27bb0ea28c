//! Orchestrator tests against a scripted fake steam client.
//!
//! The fake binary is a shell script, so this module is unix-only (the
//! integration suite exercises the same paths end-to-end over HTTP).
#![cfg(unix)]

use super::WorkshopDownloader;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::scraper::MetadataFetcher;
use crate::types::{ItemId, JobId, JobState, WorkshopItem};
use async_trait::async_trait;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Stub fetcher returning canned metadata without any HTTP.
struct StubFetcher {
    app_id: u32,
    valid: bool,
}

#[async_trait]
impl MetadataFetcher for StubFetcher {
    async fn fetch(&self, item_id: ItemId) -> Result<WorkshopItem> {
        Ok(WorkshopItem {
            item_id,
            app_id: self.app_id,
            title: format!("stub item {item_id}"),
            author: Some("stub author".into()),
            preview_url: None,
            declared_size: Some(2048),
            valid: self.valid,
        })
    }
}

/// Behaviors the fake steam client can be scripted with.
enum FakeBehavior {
    /// Print success markers and create canonical content for item 123
    Success,
    /// Sleep forever (until killed)
    Hang,
    /// Prompt for a second factor on every invocation
    SecondFactor,
    /// Fail transiently on the first run, succeed afterwards
    FlakyOnce,
}

fn write_fake_steamcmd(dir: &TempDir, behavior: FakeBehavior) -> PathBuf {
    let path = dir.path().join("steamcmd");
    let counter = dir.path().join("invocations");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(
        file,
        r#"n=$(cat "{counter}" 2>/dev/null || echo 0); n=$((n+1)); echo "$n" > "{counter}"
prev=""
for arg in "$@"; do
  if [ "$prev" = "+force_install_dir" ]; then install_dir="$arg"; fi
  prev="$arg"
done"#,
        counter = counter.display()
    )
    .unwrap();

    let success_block = r#"echo "Loading Steam API...OK"
echo "Logged in OK"
echo "Downloading item 123 ..."
echo "downloading update (1024 of 2048 KB)..."
if [ -n "$install_dir" ]; then
  mkdir -p "$install_dir/steamapps/workshop/content/480/123"
  head -c 4096 /dev/zero > "$install_dir/steamapps/workshop/content/480/123/mod.bin"
fi
echo "Success. Downloaded item 123."
exit 0"#;

    match behavior {
        FakeBehavior::Success => writeln!(file, "{success_block}").unwrap(),
        FakeBehavior::Hang => writeln!(file, "echo 'Logged in OK'\nsleep 600").unwrap(),
        FakeBehavior::SecondFactor => {
            writeln!(file, "echo 'Steam Guard code required for account'\nexit 5").unwrap()
        }
        FakeBehavior::FlakyOnce => writeln!(
            file,
            r#"if [ "$n" -le 1 ]; then
  echo "ERROR! Download item 123 failed (Failure)."
  exit 1
fi
{success_block}"#
        )
        .unwrap(),
    }

    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn test_config(dir: &TempDir, binary: PathBuf) -> Config {
    let mut config = Config::default();
    config.download.download_root = dir.path().join("downloads");
    config.steam.steamcmd_path = Some(binary);
    config.steam.fetch_timeout = Duration::from_secs(30);
    config.steam.verify_timeout = Duration::from_secs(10);
    config.processing.retry.base_delay = Duration::from_millis(20);
    config.processing.retry.jitter = false;
    config.processing.archive.min_size = 64;
    config
}

async fn downloader_with(
    dir: &TempDir,
    behavior: FakeBehavior,
    mutate: impl FnOnce(&mut Config),
) -> WorkshopDownloader {
    let binary = write_fake_steamcmd(dir, behavior);
    let mut config = test_config(dir, binary);
    mutate(&mut config);
    let fetcher = Arc::new(StubFetcher {
        app_id: config.steam.app_id,
        valid: true,
    });
    WorkshopDownloader::new(config, fetcher).await.unwrap()
}

const ITEM_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=123";

async fn wait_for_terminal(downloader: &WorkshopDownloader, id: JobId) -> JobState {
    for _ in 0..600 {
        if let Some(snap) = downloader.status(id) {
            if snap.state.is_terminal() {
                return snap.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn happy_path_runs_to_completed_with_full_progress() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Success, |_| {}).await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    assert_eq!(receipt.item_id, ItemId(123));
    assert_eq!(receipt.status_path, format!("/api/v1/downloads/{}", receipt.job_id));

    // Immediately after submit the snapshot exists with zero progress
    let snap = downloader.status(receipt.job_id).unwrap();
    assert!(snap.progress == 0 || snap.state != JobState::Starting);

    let state = wait_for_terminal(&downloader, receipt.job_id).await;
    assert_eq!(state, JobState::Completed);

    let snap = downloader.status(receipt.job_id).unwrap();
    assert_eq!(snap.progress, 100);
    assert!(snap.download_url.is_some());
    let archive_size = snap.archive_size.unwrap();
    assert!(archive_size >= 64);

    let archive_path = downloader
        .registry
        .with_job(receipt.job_id, |j| j.archive_path.clone())
        .unwrap()
        .unwrap();
    assert!(archive_path.is_file());
    assert_eq!(std::fs::metadata(&archive_path).unwrap().len(), archive_size);
}

#[tokio::test]
async fn capacity_cap_rejects_with_occupancy_and_creates_no_record() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Hang, |c| {
        c.download.max_concurrent_downloads = 1;
    })
    .await;

    let first = downloader.submit(ITEM_URL).await.unwrap();
    let err = downloader.submit(ITEM_URL).await.unwrap_err();
    match err {
        Error::CapacityExhausted { current, max } => {
            assert_eq!(current, 1);
            assert_eq!(max, 1);
        }
        other => panic!("expected CapacityExhausted, got {other:?}"),
    }

    assert_eq!(downloader.jobs().len(), 1, "rejected submission must not create a record");
    assert_eq!(downloader.occupancy(), (1, 1));

    downloader.cleanup(first.job_id).await.unwrap();
}

#[tokio::test]
async fn invalid_url_is_rejected_without_a_record() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Success, |_| {}).await;

    let err = downloader.submit("https://example.com/nothing-here").await.unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
    assert!(downloader.jobs().is_empty());
}

#[tokio::test]
async fn invalid_item_is_rejected() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_steamcmd(&dir, FakeBehavior::Success);
    let config = test_config(&dir, binary);
    let fetcher = Arc::new(StubFetcher {
        app_id: config.steam.app_id,
        valid: false,
    });
    let downloader = WorkshopDownloader::new(config, fetcher).await.unwrap();

    let err = downloader.submit(ITEM_URL).await.unwrap_err();
    assert!(matches!(err, Error::InvalidItem(_)));
    assert!(downloader.jobs().is_empty());
}

#[tokio::test]
async fn wrong_application_is_rejected() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_steamcmd(&dir, FakeBehavior::Success);
    let config = test_config(&dir, binary);
    let fetcher = Arc::new(StubFetcher {
        app_id: config.steam.app_id + 1,
        valid: true,
    });
    let downloader = WorkshopDownloader::new(config, fetcher).await.unwrap();

    let err = downloader.submit(ITEM_URL).await.unwrap_err();
    match err {
        Error::WrongApplication { expected, actual } => {
            assert_eq!(expected, 480);
            assert_eq!(actual, 481);
        }
        other => panic!("expected WrongApplication, got {other:?}"),
    }
    assert!(downloader.jobs().is_empty());
}

#[tokio::test]
async fn second_factor_fails_the_job_and_keeps_session_invalid() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::SecondFactor, |c| {
        c.steam.username = Some("someuser".into());
        c.steam.password = Some("hunter2".into());
    })
    .await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    let state = wait_for_terminal(&downloader, receipt.job_id).await;
    assert_eq!(state, JobState::Error);

    let snap = downloader.status(receipt.job_id).unwrap();
    assert_eq!(snap.last_error.as_deref(), Some("second_factor_required"));
    assert_eq!(
        downloader.steam().session_state(),
        crate::session::SessionState::Invalid
    );

    // Error branch disposed the scratch tree
    assert!(downloader
        .registry
        .with_job(receipt.job_id, |j| j.workspace.is_none())
        .unwrap());
}

#[tokio::test]
async fn transient_failure_recovers_on_the_second_attempt() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::FlakyOnce, |_| {}).await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    let state = wait_for_terminal(&downloader, receipt.job_id).await;
    assert_eq!(state, JobState::Completed);

    let snap = downloader.status(receipt.job_id).unwrap();
    assert_eq!(snap.attempt, 2, "one failed attempt then success");
    assert_eq!(snap.progress, 100);
}

#[tokio::test]
async fn cleanup_is_idempotent_and_unknown_ids_are_not_found() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Hang, |_| {}).await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    downloader.cleanup(receipt.job_id).await.unwrap();
    let snap = downloader.status(receipt.job_id).unwrap();
    assert_eq!(snap.state, JobState::Cleaned);

    // Second call: success, no side effect
    downloader.cleanup(receipt.job_id).await.unwrap();
    assert_eq!(downloader.status(receipt.job_id).unwrap().state, JobState::Cleaned);

    // Unknown id
    let err = downloader.cleanup(JobId(9999)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn sweeper_reaps_a_frozen_job_as_timeout() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Hang, |c| {
        c.download.job_timeout = Duration::from_millis(50);
    })
    .await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reaped = downloader.sweep_once().await;
    assert!(reaped >= 1);

    let state = wait_for_terminal(&downloader, receipt.job_id).await;
    assert_eq!(state, JobState::Error);
    let snap = downloader.status(receipt.job_id).unwrap();
    assert_eq!(snap.last_error.as_deref(), Some("timeout"));

    // Workspace gone from disk
    let ws_path = downloader.workspaces.path_for(receipt.job_id);
    assert!(!ws_path.exists());

    // A second sweep does not double-fail the job
    downloader.sweep_once().await;
    assert_eq!(
        downloader.status(receipt.job_id).unwrap().last_error.as_deref(),
        Some("timeout")
    );
}

#[tokio::test]
async fn workspace_is_absent_after_error_paths() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::SecondFactor, |c| {
        c.steam.username = Some("someuser".into());
        c.steam.password = Some("hunter2".into());
    })
    .await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    wait_for_terminal(&downloader, receipt.job_id).await;

    let ws_path = downloader.workspaces.path_for(receipt.job_id);
    assert!(!ws_path.exists(), "error path must dispose the workspace tree");
}

#[tokio::test]
async fn shutdown_refuses_new_submissions_and_cancels_running_jobs() {
    let dir = TempDir::new().unwrap();
    let downloader = downloader_with(&dir, FakeBehavior::Hang, |_| {}).await;

    let receipt = downloader.submit(ITEM_URL).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    downloader.shutdown().await.unwrap();

    let err = downloader.submit(ITEM_URL).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));

    // The hung job was cancelled and its tree removed
    let ws_path = downloader.workspaces.path_for(receipt.job_id);
    assert!(!ws_path.exists());
}

#[tokio::test]
async fn startup_sweep_clears_residual_workspaces() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("downloads");
    std::fs::create_dir_all(root.join("17")).unwrap();
    std::fs::write(root.join("17/partial.bin"), b"left over").unwrap();

    let downloader = downloader_with(&dir, FakeBehavior::Success, |_| {}).await;
    assert!(!root.join("17").exists(), "previous run's residue must be swept");
    drop(downloader);
}
