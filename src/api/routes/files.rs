//! Archive delivery: streaming the produced ZIP with byte-range support
//!
//! Successful whole-file delivery schedules workspace disposal and, after
//! a short grace, drops the job record. Range requests never trigger
//! disposal — a partial download may be resumed.

use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{JobId, JobState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Outcome of parsing a `Range` header against a known file size
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ByteRange {
    /// No usable range; serve the whole file
    Full,
    /// Serve `[start, end]` inclusive
    Partial(u64, u64),
    /// Syntactically a range but not satisfiable for this file
    Unsatisfiable,
}

/// Parse a single-range `Range` header. Malformed headers and multi-range
/// requests fall back to a full response, per the usual HTTP semantics;
/// a well-formed range past the end of the file is unsatisfiable.
pub(crate) fn parse_range(header: Option<&str>, size: u64) -> ByteRange {
    let Some(value) = header else {
        return ByteRange::Full;
    };
    let Some(spec) = value.strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return ByteRange::Full;
    };

    match (start_str.is_empty(), end_str.is_empty()) {
        // "bytes=-N": the last N bytes
        (true, false) => match end_str.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(suffix) if size > 0 => {
                let start = size.saturating_sub(suffix);
                ByteRange::Partial(start, size - 1)
            }
            Ok(_) => ByteRange::Unsatisfiable,
            Err(_) => ByteRange::Full,
        },
        // "bytes=N-": from N to the end
        (false, true) => match start_str.parse::<u64>() {
            Ok(start) if start < size => ByteRange::Partial(start, size - 1),
            Ok(_) => ByteRange::Unsatisfiable,
            Err(_) => ByteRange::Full,
        },
        // "bytes=N-M"
        (false, false) => match (start_str.parse::<u64>(), end_str.parse::<u64>()) {
            (Ok(start), Ok(end)) => {
                if start > end {
                    ByteRange::Full
                } else if start >= size {
                    ByteRange::Unsatisfiable
                } else {
                    ByteRange::Partial(start, end.min(size - 1))
                }
            }
            _ => ByteRange::Full,
        },
        (true, true) => ByteRange::Full,
    }
}

/// GET /downloads/:id/file - Stream the produced archive
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}/file",
    tag = "downloads",
    params(("id" = u64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Full archive stream", content_type = "application/zip"),
        (status = 206, description = "Partial archive stream", content_type = "application/zip"),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Job is not completed"),
        (status = 416, description = "Requested range not satisfiable")
    )
)]
pub async fn fetch_archive(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let id = JobId(id);
    let Some(snapshot) = state.downloader.status(id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(format!("job {id}"))),
        )
            .into_response();
    };
    if snapshot.state != JobState::Completed {
        return (
            StatusCode::CONFLICT,
            Json(ApiError::new(
                "invalid_state",
                format!("job {id} is {} (archive only available when completed)", snapshot.state),
            )),
        )
            .into_response();
    }

    let Some(archive_path) = state
        .downloader
        .registry
        .with_job(id, |job| job.archive_path.clone())
        .flatten()
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(format!("archive for job {id}"))),
        )
            .into_response();
    };

    let mut file = match tokio::fs::File::open(&archive_path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(job_id = id.0, error = %e, "archive file missing at delivery time");
            return (
                StatusCode::NOT_FOUND,
                Json(ApiError::not_found(format!("archive for job {id}"))),
            )
                .into_response();
        }
    };
    let metadata = match file.metadata().await {
        Ok(m) => m,
        Err(e) => {
            return crate::error::Error::Io(e).into_response();
        }
    };
    let size = metadata.len();
    let mtime_millis = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let etag = format!("\"{size}-{mtime_millis}\"");

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    match parse_range(range_header, size) {
        ByteRange::Unsatisfiable => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),

        ByteRange::Partial(start, end) => {
            if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
                return crate::error::Error::Io(e).into_response();
            }
            let length = end - start + 1;
            let stream = ReaderStream::new(file.take(length));
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, "application/zip")
                .header(header::CONTENT_LENGTH, length)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::ETAG, etag)
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }

        ByteRange::Full => {
            // The trailer stream only runs once the file hit EOF, which is
            // the "successful whole-file delivery" signal for disposal.
            let downloader = state.downloader.clone();
            let tail = futures::stream::once(async move {
                downloader.schedule_post_delivery_cleanup(id);
                Ok::<_, std::io::Error>(axum::body::Bytes::new())
            });
            let stream = ReaderStream::new(file).chain(tail);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/zip")
                .header(header::CONTENT_LENGTH, size)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::ETAG, etag)
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.zip\"", snapshot.item_id),
                )
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}
