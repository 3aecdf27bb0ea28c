//! External-client adapter for the steam command-line tool
//!
//! Wraps invocations of `steamcmd`, parses its interleaved output into
//! structured events, classifies outcomes, and manages credential-less
//! reuse of the saved session so jobs don't re-prompt for a second factor.
//!
//! The adapter owns the [`SteamSession`] and the process handle; the
//! orchestrator only ever sees [`FetchOutcome`] values and
//! [`AdapterEvent`]s flowing over a channel.

mod classify;
mod process;

pub use classify::{FetchOutcome, Marker, OutputScan, MARKERS};
pub use process::{run_streaming, RunEnd};

use crate::config::SteamConfig;
use crate::error::{Error, JobError, Result};
use crate::logbus::{LogBus, LogLevel};
use crate::session::{SessionState, SteamSession};
use crate::types::{AdapterEvent, ItemId};
use crate::workspace;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Symbolic source tag used on the log bus
const LOG_SOURCE: &str = "steamcmd";

/// Adapter over the external steam client
pub struct SteamCmd {
    binary: PathBuf,
    config: SteamConfig,
    session: Mutex<SteamSession>,
    /// One-shot second-factor code for session bootstrap, consumed on first use
    bootstrap_code: Mutex<Option<String>>,
    logs: LogBus,
}

impl SteamCmd {
    /// Create an adapter, resolving the client binary from the explicit
    /// config path or from PATH.
    pub fn new(config: SteamConfig, logs: LogBus) -> Result<Self> {
        let binary = match &config.steamcmd_path {
            Some(path) => path.clone(),
            None if config.search_path => {
                which::which("steamcmd").map_err(|_| Error::Config {
                    message: "steamcmd not found in PATH".into(),
                    key: Some("steamcmd_path".into()),
                })?
            }
            None => {
                return Err(Error::Config {
                    message: "no steamcmd path configured and PATH search disabled".into(),
                    key: Some("steamcmd_path".into()),
                });
            }
        };

        let session = SteamSession::new(config.username.clone());
        let bootstrap_code = config.guard_code.clone();
        Ok(Self {
            binary,
            config,
            session: Mutex::new(session),
            bootstrap_code: Mutex::new(bootstrap_code),
            logs,
        })
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.session
            .lock()
            .map(|s| s.state())
            .unwrap_or(SessionState::Invalid)
    }

    /// Whether the session was verified within the caching window.
    pub fn session_is_fresh(&self) -> bool {
        self.session
            .lock()
            .map(|s| s.is_fresh(self.config.session_cache_window, Utc::now()))
            .unwrap_or(false)
    }

    /// Whether credentials are configured at all.
    pub fn credentialed(&self) -> bool {
        self.config.username.is_some()
    }

    /// Make sure a usable session exists before the first fetch attempt.
    ///
    /// Anonymous mode skips the machinery entirely. In credentialed mode:
    /// a fresh session is used as-is; a stale one is re-probed with the
    /// short verify run; and only if that fails is a full password login
    /// attempted, consuming the configured bootstrap code if present. A
    /// second-factor prompt at that point fails the job — it cannot be
    /// answered mid-pipeline.
    pub async fn ensure_session(&self, cancel: &CancellationToken) -> std::result::Result<(), JobError> {
        if !self.credentialed() {
            return Ok(());
        }
        if self.session_is_fresh() {
            return Ok(());
        }

        if self.verify_session(cancel).await? {
            return Ok(());
        }

        let code = self
            .bootstrap_code
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        self.authenticate(code.as_deref(), cancel).await
    }

    /// Probe the saved session with a short login-and-quit run.
    ///
    /// Returns true only when a login success marker is observed and no
    /// second-factor prompt appears within the verify deadline.
    pub async fn verify_session(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, JobError> {
        let Some(username) = self.config.username.clone() else {
            return Ok(false);
        };

        self.logs.info(LOG_SOURCE, "verifying saved steam session");
        let args = vec![
            "+@ShutdownOnFailedCommand".to_string(),
            "1".to_string(),
            "+login".to_string(),
            username,
            "+quit".to_string(),
        ];

        let mut scan = OutputScan::new();
        let end = run_streaming(
            &self.binary,
            &args,
            None,
            self.config.verify_timeout,
            cancel,
            |line| {
                scan.observe(line);
            },
        )
        .await
        .map_err(|e| JobError::Internal {
            detail: format!("failed to run steamcmd: {e}"),
        })?;

        if end == RunEnd::Cancelled {
            return Err(JobError::Cancelled);
        }

        let ok = matches!(end, RunEnd::Exited(true))
            && scan.saw_login_ok()
            && scan.second_factor().is_none()
            && !scan.saw_session_expired();

        if let Ok(mut session) = self.session.lock() {
            if ok {
                session.mark_verified(Utc::now());
            } else {
                session.invalidate();
            }
        }

        if ok {
            self.logs.success(LOG_SOURCE, "saved steam session is valid");
        } else {
            self.logs.warn(LOG_SOURCE, "saved steam session is not usable");
        }
        Ok(ok)
    }

    /// Perform a full credentialed login, optionally answering the second
    /// factor with `code`. Used once per session bootstrap.
    pub async fn authenticate(
        &self,
        code: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), JobError> {
        let (Some(username), Some(password)) =
            (self.config.username.clone(), self.config.password.clone())
        else {
            return Err(JobError::SessionExpired);
        };

        self.logs.info(LOG_SOURCE, "performing credentialed steam login");
        let mut args = vec![
            "+@ShutdownOnFailedCommand".to_string(),
            "1".to_string(),
            "+login".to_string(),
            username,
            password,
        ];
        if let Some(code) = code {
            args.push(code.to_string());
        }
        args.push("+quit".to_string());

        let mut scan = OutputScan::new();
        let end = run_streaming(
            &self.binary,
            &args,
            None,
            self.config.verify_timeout,
            cancel,
            |line| {
                scan.observe(line);
            },
        )
        .await
        .map_err(|e| JobError::Internal {
            detail: format!("failed to run steamcmd: {e}"),
        })?;

        if end == RunEnd::Cancelled {
            return Err(JobError::Cancelled);
        }

        if let Some(kind) = scan.second_factor() {
            if let Ok(mut session) = self.session.lock() {
                session.invalidate();
            }
            self.logs.error(
                LOG_SOURCE,
                format!("steam login requires a second factor ({kind})"),
            );
            return Err(JobError::SecondFactorRequired { kind });
        }
        if scan.saw_session_expired() || !scan.saw_login_ok() {
            if let Ok(mut session) = self.session.lock() {
                session.invalidate();
            }
            self.logs.error(LOG_SOURCE, "steam login rejected");
            return Err(JobError::SessionExpired);
        }

        if let Ok(mut session) = self.session.lock() {
            session.mark_verified(Utc::now());
        }
        self.logs.success(LOG_SOURCE, "steam login succeeded");
        Ok(())
    }

    /// Fetch one workshop item into `workspace`.
    ///
    /// Runs the client under the fetch deadline, streams output lines and
    /// download ticks to `events`, and classifies the result. The cached
    /// credential store is reused: in credentialed mode the login carries
    /// no password argument. Re-auth signals observed mid-fetch invalidate
    /// the session for subsequent jobs.
    pub async fn fetch(
        &self,
        workspace: &Path,
        item: ItemId,
        cancel: &CancellationToken,
        events: &tokio::sync::mpsc::UnboundedSender<AdapterEvent>,
    ) -> std::result::Result<FetchOutcome, JobError> {
        let mut args = vec![
            "+@ShutdownOnFailedCommand".to_string(),
            "1".to_string(),
            "+force_install_dir".to_string(),
            workspace.display().to_string(),
            "+login".to_string(),
        ];
        match &self.config.username {
            Some(username) => args.push(username.clone()),
            None => args.push("anonymous".to_string()),
        }
        args.extend([
            "+workshop_download_item".to_string(),
            self.config.app_id.to_string(),
            item.to_string(),
            "validate".to_string(),
            "+quit".to_string(),
        ]);

        self.logs.publish(
            LogLevel::Info,
            LOG_SOURCE,
            format!("fetching item {item}"),
            Some(serde_json::json!({ "item_id": item.get(), "app_id": self.config.app_id })),
        );

        let mut scan = OutputScan::new();
        let end = run_streaming(
            &self.binary,
            &args,
            Some(workspace),
            self.config.fetch_timeout,
            cancel,
            |line| {
                let marker = scan.observe(line);
                if marker == Some(Marker::DownloadActivity) {
                    events.send(AdapterEvent::DownloadTick).ok();
                }
                events.send(AdapterEvent::OutputLine(line.to_string())).ok();
            },
        )
        .await
        .map_err(|e| JobError::Internal {
            detail: format!("failed to run steamcmd: {e}"),
        })?;

        if end == RunEnd::Cancelled {
            return Err(JobError::Cancelled);
        }

        // Session bookkeeping from observed markers
        if scan.saw_session_expired() || scan.second_factor().is_some() {
            if let Ok(mut session) = self.session.lock() {
                session.invalidate();
            }
        } else if scan.saw_login_ok() && self.credentialed() {
            if let Ok(mut session) = self.session.lock() {
                session.mark_verified(Utc::now());
            }
        }

        let (exit_success, timed_out) = match end {
            RunEnd::Exited(success) => (success, false),
            RunEnd::TimedOut => (false, true),
            RunEnd::Cancelled => unreachable!("handled above"),
        };

        // Filesystem verification; a timed-out run never counts as written
        let content = if timed_out {
            None
        } else {
            workspace::find_content(workspace, self.config.app_id, item)
        };

        let outcome = scan.outcome(exit_success, timed_out, content);
        match &outcome {
            FetchOutcome::ContentWritten(path) => {
                self.logs.success(
                    LOG_SOURCE,
                    format!("item {item} content written to {}", path.display()),
                );
            }
            other => {
                self.logs.warn(LOG_SOURCE, format!("fetch of item {item} ended: {other:?}"));
            }
        }
        Ok(outcome)
    }
}
