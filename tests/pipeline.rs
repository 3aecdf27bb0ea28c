//! End-to-end pipeline scenarios over the HTTP surface.
//!
//! Each test stands up a `WorkshopDownloader` against a scripted fake
//! steam client and drives it through the axum router, polling status the
//! way a real front-end would.
#![cfg(unix)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{
    test_config, write_fake_steamcmd, FakeBehavior, StubFetcher, ITEM_URL,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use workshop_dl::{api, Config, WorkshopDownloader};

async fn setup(
    dir: &TempDir,
    behavior: FakeBehavior,
    mutate: impl FnOnce(&mut Config),
) -> (axum::Router, Arc<WorkshopDownloader>) {
    let binary = write_fake_steamcmd(dir, behavior);
    let mut config = test_config(dir, binary);
    mutate(&mut config);
    let fetcher = Arc::new(StubFetcher {
        app_id: config.steam.app_id,
        valid: true,
    });
    let downloader = Arc::new(
        WorkshopDownloader::new(config.clone(), fetcher)
            .await
            .expect("downloader construction"),
    );
    let router = api::create_router(downloader.clone(), Arc::new(config));
    (router, downloader)
}

async fn json_of(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn submit(app: &axum::Router, url: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/downloads")
                .header("content-type", "application/json")
                .body(Body::from(format!(r#"{{"url":"{url}"}}"#)))
                .expect("request"),
        )
        .await
        .expect("response")
}

async fn status_json(app: &axum::Router, job_id: u64) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/downloads/{job_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    json_of(response).await
}

/// Poll status until the job is terminal, asserting progress monotonicity
/// within each attempt along the way. Returns the final snapshot.
async fn poll_to_terminal(app: &axum::Router, job_id: u64) -> serde_json::Value {
    let mut last_progress: i64 = -1;
    let mut last_attempt: i64 = 0;
    for _ in 0..600 {
        let snap = status_json(app, job_id).await;
        let state = snap["state"].as_str().expect("state").to_string();
        let progress = snap["progress"].as_i64().expect("progress");
        let attempt = snap["attempt"].as_i64().expect("attempt");

        if attempt == last_attempt {
            assert!(
                progress >= last_progress,
                "progress went backwards within attempt {attempt}: {last_progress} -> {progress}"
            );
        }
        last_progress = progress;
        last_attempt = attempt;

        if matches!(state.as_str(), "completed" | "error" | "cleaned") {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

// --- Scenario 1: happy path, anonymous ---

#[tokio::test]
async fn happy_path_anonymous_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (app, downloader) = setup(&dir, FakeBehavior::Success, |_| {}).await;

    let response = submit(&app, ITEM_URL).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let receipt = json_of(response).await;
    let job_id = receipt["job_id"].as_u64().expect("job_id");
    assert_eq!(receipt["item_id"], 123);
    assert_eq!(
        receipt["status_path"],
        format!("/api/v1/downloads/{job_id}")
    );

    let terminal = poll_to_terminal(&app, job_id).await;
    assert_eq!(terminal["state"], "completed");
    assert_eq!(terminal["progress"], 100);
    assert_eq!(
        terminal["download_url"],
        format!("/api/v1/downloads/{job_id}/file")
    );
    assert!(terminal["archive_size"].as_u64().expect("size") >= 512);

    // Fetch the archive
    let fetched = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/downloads/{job_id}/file"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(fetched.headers()["content-type"], "application/zip");
    let body = axum::body::to_bytes(fetched.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(!body.is_empty());
    assert_eq!(&body[..2], b"PK", "delivered bytes must be a ZIP archive");

    // After full delivery the workspace is disposed
    let ws = downloader
        .get_config()
        .download
        .download_root
        .join(job_id.to_string());
    for _ in 0..100 {
        if !ws.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!ws.exists(), "workspace must be absent after delivery");
}

// --- Scenario 2: capacity cap ---

#[tokio::test]
async fn capacity_cap_rejects_the_second_submission() {
    let dir = TempDir::new().unwrap();
    let (app, _downloader) = setup(&dir, FakeBehavior::Hang, |c| {
        c.download.max_concurrent_downloads = 1;
    })
    .await;

    let first = submit(&app, ITEM_URL).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = submit(&app, ITEM_URL).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_of(second).await;
    assert_eq!(body["error"]["code"], "capacity_exhausted");
    assert_eq!(body["error"]["details"]["current"], 1);
    assert_eq!(body["error"]["details"]["max"], 1);

    // No second job record exists
    let listing = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/downloads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let jobs = json_of(listing).await;
    assert_eq!(jobs.as_array().expect("array").len(), 1);
}

// --- Scenario 3: wrong application ---

#[tokio::test]
async fn wrong_application_is_rejected_without_a_job() {
    let dir = TempDir::new().unwrap();
    let binary = write_fake_steamcmd(&dir, FakeBehavior::Success);
    let config = test_config(&dir, binary);
    let fetcher = Arc::new(StubFetcher {
        app_id: 4000, // differs from the configured 480
        valid: true,
    });
    let downloader = Arc::new(
        WorkshopDownloader::new(config.clone(), fetcher).await.unwrap(),
    );
    let app = api::create_router(downloader.clone(), Arc::new(config));

    let response = submit(&app, ITEM_URL).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_of(response).await;
    assert_eq!(body["error"]["code"], "wrong_application");
    assert_eq!(body["error"]["details"]["expected_app_id"], 480);
    assert_eq!(body["error"]["details"]["actual_app_id"], 4000);

    assert!(downloader.jobs().is_empty());
}

// --- Scenario 4: second factor required ---

#[tokio::test]
async fn second_factor_required_fails_the_job() {
    let dir = TempDir::new().unwrap();
    let (app, downloader) = setup(&dir, FakeBehavior::SecondFactor, |c| {
        c.steam.username = Some("someuser".into());
        c.steam.password = Some("hunter2".into());
    })
    .await;

    let response = submit(&app, ITEM_URL).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let job_id = json_of(response).await["job_id"].as_u64().unwrap();

    let terminal = poll_to_terminal(&app, job_id).await;
    assert_eq!(terminal["state"], "error");
    assert_eq!(terminal["last_error"], "second_factor_required");
    assert_eq!(
        downloader.steam().session_state(),
        workshop_dl::session::SessionState::Invalid
    );
}

// --- Scenario 5: transient failure recovers ---

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let dir = TempDir::new().unwrap();
    let (app, _downloader) = setup(&dir, FakeBehavior::FlakyOnce, |_| {}).await;

    let response = submit(&app, ITEM_URL).await;
    let job_id = json_of(response).await["job_id"].as_u64().unwrap();

    let terminal = poll_to_terminal(&app, job_id).await;
    assert_eq!(terminal["state"], "completed");
    assert_eq!(terminal["attempt"], 2, "one failed attempt, then success");
    assert_eq!(terminal["progress"], 100);
}

// --- Scenario 6: stale job sweep ---

#[tokio::test]
async fn stale_job_is_swept_to_timeout() {
    let dir = TempDir::new().unwrap();
    let (app, downloader) = setup(&dir, FakeBehavior::Hang, |c| {
        c.download.job_timeout = Duration::from_millis(50);
    })
    .await;

    let response = submit(&app, ITEM_URL).await;
    let job_id = json_of(response).await["job_id"].as_u64().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let reaped = downloader.sweep_once().await;
    assert!(reaped >= 1);

    let terminal = poll_to_terminal(&app, job_id).await;
    assert_eq!(terminal["state"], "error");
    assert_eq!(terminal["last_error"], "timeout");

    let ws = downloader
        .get_config()
        .download
        .download_root
        .join(job_id.to_string());
    assert!(!ws.exists(), "sweeper must dispose the workspace");
}

// --- cleanup over HTTP ---

#[tokio::test]
async fn delete_cancels_and_cleans_a_running_job() {
    let dir = TempDir::new().unwrap();
    let (app, _downloader) = setup(&dir, FakeBehavior::Hang, |_| {}).await;

    let response = submit(&app, ITEM_URL).await;
    let job_id = json_of(response).await["job_id"].as_u64().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/downloads/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    let snap = status_json(&app, job_id).await;
    assert_eq!(snap["state"], "cleaned");

    // Idempotent
    let again = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/downloads/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
}
