//! Per-job pipeline: the state machine from admission to terminal state
//!
//! Phases:
//! 1. Starting → Preparing: allocate the workspace
//! 2. Preparing → Downloading: session check, then the steam client with
//!    the bounded retry loop (retries stay inside Downloading)
//! 3. Downloading → CreatingArchive: verified content is packaged
//! 4. CreatingArchive → Completed: archive registered for delivery
//!
//! Any failure records its stable code, disposes the workspace, and
//! leaves the job in Error for the sweeper to age out.

use super::WorkshopDownloader;
use crate::error::JobError;
use crate::retry::with_retry;
use crate::steamcmd::FetchOutcome;
use crate::types::{AdapterEvent, ItemId, JobId, JobState};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Download-phase progress band: attempt start
const PROGRESS_DOWNLOAD_START: u8 = 10;
/// Download-phase progress band: tick ceiling
const PROGRESS_DOWNLOAD_CAP: u8 = 55;
/// Download-phase progress band: adapter completion
const PROGRESS_DOWNLOAD_DONE: u8 = 60;
/// Archive-phase progress band: phase entry
const PROGRESS_ARCHIVE_START: u8 = 65;
/// Archive-phase progress band: build floor
const PROGRESS_ARCHIVE_FLOOR: u8 = 70;
/// Archive-phase progress band: last entry written
const PROGRESS_ARCHIVE_ENTRIES_DONE: u8 = 95;

/// Everything a job task needs; the task owns its context
pub(crate) struct JobContext {
    pub(crate) downloader: WorkshopDownloader,
    pub(crate) id: JobId,
    pub(crate) item_id: ItemId,
    pub(crate) cancel: CancellationToken,
}

/// Run the pipeline for one admitted job, holding its slot permit for the
/// whole run.
pub(crate) async fn run_job(ctx: JobContext, permit: tokio::sync::OwnedSemaphorePermit) {
    let _permit = permit;
    let id = ctx.id;

    if let Err(error) = run_pipeline(&ctx).await {
        let code = error.code();
        ctx.downloader.registry.fail(id, code);
        ctx.downloader.logs.error(
            super::LOG_SOURCE,
            format!("job {id} failed: {error} ({code})"),
        );

        // Failure branch disposes the workspace; the Error record itself
        // stays for status callers until the sweeper ages it out.
        if let Some(path) = ctx.downloader.registry.take_workspace(id) {
            if let Err(e) = ctx.downloader.workspaces.dispose(&path).await {
                tracing::warn!(job_id = id.0, error = %e, "failed to dispose workspace after error");
            }
        }
    }

    ctx.downloader.remove_from_active(id).await;
}

async fn run_pipeline(ctx: &JobContext) -> Result<(), JobError> {
    let downloader = &ctx.downloader;
    let registry = &downloader.registry;
    let id = ctx.id;

    // Phase 1: workspace
    registry.set_state(id, JobState::Preparing);
    let workspace = downloader
        .workspaces
        .allocate(id)
        .await
        .map_err(|e| JobError::Internal {
            detail: format!("workspace allocation failed: {e}"),
        })?;
    registry.set_workspace(id, workspace.clone());

    // Session-aware first attempt: anonymous mode skips this entirely
    downloader.steam.ensure_session(&ctx.cancel).await?;

    // Phase 2: steam client with retries inside the Downloading state
    registry.set_state(id, JobState::Downloading);
    let retry_config = downloader.config.processing.retry.clone();
    let content = with_retry(
        &retry_config,
        |attempt| run_fetch_attempt(ctx, workspace.clone(), attempt),
        |attempt| {
            registry.begin_attempt(id, attempt);
            downloader.logs.warn(
                super::LOG_SOURCE,
                format!("job {id} starting attempt {attempt}"),
            );
        },
    )
    .await?;

    registry.set_progress(id, PROGRESS_DOWNLOAD_DONE);

    // Phase 3: archive build
    registry.set_state(id, JobState::CreatingArchive);
    registry.set_progress(id, PROGRESS_ARCHIVE_START);
    let archive_path = workspace.join(format!("{}.zip", ctx.item_id));
    let size = run_archive_build(ctx, content, archive_path.clone()).await?;

    // Phase 4: register and complete
    registry.register_archive(id, archive_path, size);
    registry.set_state(id, JobState::Completed);
    registry.set_progress(id, 100);
    downloader.logs.success(
        super::LOG_SOURCE,
        format!("job {id} completed ({size} bytes)"),
    );
    Ok(())
}

/// One invocation of the steam client, mapping its outcome onto the retry
/// taxonomy and its events onto the Downloading progress band.
async fn run_fetch_attempt(
    ctx: &JobContext,
    workspace: PathBuf,
    attempt: u32,
) -> Result<PathBuf, JobError> {
    let downloader = &ctx.downloader;
    let registry = downloader.registry.clone();
    let id = ctx.id;

    // Stale partial output would defeat the post-run content check
    if attempt > 1 {
        downloader
            .workspaces
            .dispose(&workspace)
            .await
            .map_err(|e| JobError::Internal {
                detail: format!("workspace reset failed: {e}"),
            })?;
        downloader
            .workspaces
            .allocate(id)
            .await
            .map_err(|e| JobError::Internal {
                detail: format!("workspace reset failed: {e}"),
            })?;
    }

    registry.set_progress(id, PROGRESS_DOWNLOAD_START);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel::<AdapterEvent>();
    let logs = downloader.logs.clone();
    let consumer = tokio::spawn(async move {
        // Each download marker bumps progress by 2 up to the cap; output
        // lines are mirrored onto the log bus for the admin stream.
        let mut ticks: u32 = 0;
        while let Some(event) = events_rx.recv().await {
            match event {
                AdapterEvent::DownloadTick => {
                    ticks += 1;
                    let bumped = u32::from(PROGRESS_DOWNLOAD_START) + ticks * 2;
                    let progress = bumped.min(u32::from(PROGRESS_DOWNLOAD_CAP)) as u8;
                    registry.set_progress(id, progress);
                }
                AdapterEvent::OutputLine(line) => {
                    logs.publish(crate::logbus::LogLevel::Debug, "steamcmd", line, None);
                }
            }
        }
    });

    let outcome = downloader
        .steam
        .fetch(&workspace, ctx.item_id, &ctx.cancel, &events_tx)
        .await;
    drop(events_tx);
    consumer.await.ok();

    match outcome? {
        FetchOutcome::ContentWritten(path) => Ok(path),
        FetchOutcome::NeedsSecondFactor(kind) => Err(JobError::SecondFactorRequired { kind }),
        FetchOutcome::SessionExpired => Err(JobError::SessionExpired),
        FetchOutcome::AccessDenied => Err(JobError::AccessDenied),
        FetchOutcome::NotFound => Err(JobError::ItemNotFound),
        FetchOutcome::TransientFailure(detail) => Err(JobError::Transient { detail }),
        FetchOutcome::Timeout => Err(JobError::Timeout {
            phase: "download".into(),
        }),
    }
}

/// Drive the blocking archive build under its deadline, mapping entry
/// progress onto the CreatingArchive band.
async fn run_archive_build(
    ctx: &JobContext,
    source: PathBuf,
    output: PathBuf,
) -> Result<u64, JobError> {
    let downloader = &ctx.downloader;
    let registry = downloader.registry.clone();
    let id = ctx.id;
    let archive_config = downloader.config.processing.archive.clone();

    registry.set_progress(id, PROGRESS_ARCHIVE_FLOOR);
    let progress_registry = registry.clone();
    let build = tokio::task::spawn_blocking(move || {
        crate::archive::build_archive(
            &source,
            &output,
            archive_config.min_size,
            archive_config.max_size,
            move |done, total| {
                let span =
                    u32::from(PROGRESS_ARCHIVE_ENTRIES_DONE - PROGRESS_ARCHIVE_FLOOR);
                let scaled = (done as u64 * u64::from(span) / total.max(1) as u64) as u32;
                let progress = (u32::from(PROGRESS_ARCHIVE_FLOOR) + scaled)
                    .min(u32::from(PROGRESS_ARCHIVE_ENTRIES_DONE))
                    as u8;
                progress_registry.set_progress(id, progress);
            },
        )
    });

    tokio::select! {
        result = build => match result {
            Ok(build_result) => build_result,
            Err(e) => Err(JobError::Internal {
                detail: format!("archive task panicked: {e}"),
            }),
        },
        _ = tokio::time::sleep(downloader.config.processing.archive.build_timeout) => {
            Err(JobError::Timeout { phase: "archive".into() })
        }
        _ = ctx.cancel.cancelled() => Err(JobError::Cancelled),
    }
}
