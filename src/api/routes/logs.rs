//! WebSocket log stream
//!
//! Authenticated observers connect at a fixed path with their session
//! token in the query string. Unauthorized connects are rejected before
//! the upgrade. Accepted subscribers get a burst of the most recent
//! records, then live records in publish order, with periodic heartbeat
//! pings. Slow subscribers that lag off the end of the broadcast buffer
//! are dropped rather than back-pressuring publishers.

use crate::api::{auth, AppState};
use crate::error::ApiError;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

/// Connect-time query parameters for the log stream
#[derive(Debug, Deserialize)]
pub struct LogStreamQuery {
    /// Observer session token
    pub token: Option<String>,
}

/// GET /logs/stream - WebSocket upgrade for the live log channel
pub async fn log_stream(
    State(state): State<AppState>,
    Query(query): Query<LogStreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !auth::verify_observer_token(
        &state.config.server.api.observer_token,
        query.token.as_deref(),
    ) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::unauthorized("observer token required")),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_log_socket(socket, state))
}

async fn handle_log_socket(mut socket: WebSocket, state: AppState) {
    let bus = state.downloader.logs().clone();

    // Replay burst before entering live mode
    for record in bus.recent(state.config.logging.replay_count) {
        let Ok(json) = serde_json::to_string(&record) else {
            continue;
        };
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let mut live = bus.subscribe();
    let mut heartbeat = tokio::time::interval(state.config.logging.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            received = live.recv() => {
                match received {
                    Ok(record) => {
                        let Ok(json) = serde_json::to_string(&record) else {
                            continue;
                        };
                        if socket.send(Message::Text(json)).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "log subscriber lagged, dropping it");
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: axum::extract::ws::close_code::POLICY,
                                reason: "subscriber too slow".into(),
                            })))
                            .await;
                        return;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
            _ = state.downloader.shutdown_token.cancelled() => break,
        }
    }

    // Normal closure on shutdown
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: axum::extract::ws::close_code::NORMAL,
            reason: "shutting down".into(),
        })))
        .await;
}
