//! Output classification for the steam client
//!
//! The steam client reports everything through interleaved text output, so
//! its lines are a protocol. All recognized markers live in one table here
//! and nowhere else; the adapter feeds every line through [`OutputScan`]
//! and derives the final [`FetchOutcome`] from the accumulated flags, the
//! exit status, and the mandatory filesystem check.

use crate::types::SecondFactorKind;
use std::path::PathBuf;

/// Classified result of one steam client invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content landed on disk at the given directory
    ContentWritten(PathBuf),
    /// The client prompted for a second factor
    NeedsSecondFactor(SecondFactorKind),
    /// The saved session is no longer accepted
    SessionExpired,
    /// The account cannot access the item
    AccessDenied,
    /// The item does not exist
    NotFound,
    /// Retry-eligible failure; detail comes from the first matching line
    TransientFailure(String),
    /// The invocation hit its deadline without a more specific signal
    Timeout,
}

/// Marker classes recognized in client output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// Steam Guard email code prompt
    SecondFactorEmail,
    /// Mobile authenticator code prompt
    SecondFactorMobile,
    /// Credential or session rejection
    SessionExpired,
    /// Subscription/access failure
    AccessDenied,
    /// Item missing from the workshop
    NotFound,
    /// Retry-eligible tool failure
    Transient,
    /// Login success signal
    LoginOk,
    /// Download activity (drives the progress heuristic)
    DownloadActivity,
}

/// The substring → marker table. A line classifies as its first match in
/// table order, so the specific availability markers precede the generic
/// `ERROR!` prefix: "ERROR! ... (No subscription)" is an access failure,
/// not a transient one. Cross-line precedence is applied separately in
/// [`OutputScan::outcome`].
pub const MARKERS: &[(&str, Marker)] = &[
    ("Steam Guard code", Marker::SecondFactorEmail),
    ("Two-factor code", Marker::SecondFactorMobile),
    ("Invalid Password", Marker::SessionExpired),
    ("Login Failure", Marker::SessionExpired),
    ("No subscription", Marker::AccessDenied),
    ("Access Denied", Marker::AccessDenied),
    ("Item not found", Marker::NotFound),
    ("ERROR!", Marker::Transient),
    ("failed (Failure)", Marker::Transient),
    ("Logged in OK", Marker::LoginOk),
    ("Waiting for client config...OK", Marker::LoginOk),
    ("Loading Steam API...OK", Marker::LoginOk),
];

/// Accumulated observations from one invocation's output.
#[derive(Debug, Default)]
pub struct OutputScan {
    second_factor: Option<SecondFactorKind>,
    session_expired: bool,
    access_denied: bool,
    not_found: bool,
    transient_detail: Option<String>,
    login_ok: bool,
    download_ticks: u32,
}

impl OutputScan {
    /// Fresh scan with no observations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line through the marker table.
    ///
    /// Returns the marker that matched, if any. The first transient line
    /// is kept verbatim as the failure detail.
    pub fn observe(&mut self, line: &str) -> Option<Marker> {
        let mut matched = None;
        for (needle, marker) in MARKERS {
            if line.contains(needle) {
                matched = Some(*marker);
                match marker {
                    Marker::SecondFactorEmail => {
                        self.second_factor.get_or_insert(SecondFactorKind::Email);
                    }
                    Marker::SecondFactorMobile => {
                        self.second_factor.get_or_insert(SecondFactorKind::Mobile);
                    }
                    Marker::SessionExpired => self.session_expired = true,
                    Marker::AccessDenied => self.access_denied = true,
                    Marker::NotFound => self.not_found = true,
                    Marker::Transient => {
                        if self.transient_detail.is_none() {
                            self.transient_detail = Some(line.trim().to_string());
                        }
                    }
                    Marker::LoginOk => self.login_ok = true,
                    Marker::DownloadActivity => {}
                }
                break;
            }
        }

        // Download activity is a heuristic on top of the hard markers; the
        // client's verbosity varies, so any "downloading" mention counts.
        if matched.is_none() && line.to_ascii_lowercase().contains("downloading") {
            self.download_ticks += 1;
            return Some(Marker::DownloadActivity);
        }

        matched
    }

    /// Whether a second-factor prompt was seen, and which kind.
    pub fn second_factor(&self) -> Option<SecondFactorKind> {
        self.second_factor
    }

    /// Whether a credential/session rejection was seen.
    pub fn saw_session_expired(&self) -> bool {
        self.session_expired
    }

    /// Whether a login success marker was seen.
    pub fn saw_login_ok(&self) -> bool {
        self.login_ok
    }

    /// Number of download-activity lines observed.
    pub fn download_ticks(&self) -> u32 {
        self.download_ticks
    }

    /// Derive the invocation outcome.
    ///
    /// Precedence: second-factor prompt > session expired > access or
    /// availability failure > transient > success. The filesystem check is
    /// mandatory and supersedes textual success: `content` carries the
    /// verified non-empty content directory, or None when the expected
    /// paths are absent or empty.
    ///
    /// `timed_out` marks a deadline kill; it only produces [`FetchOutcome::Timeout`]
    /// when no stronger marker was observed before the kill.
    pub fn outcome(
        &self,
        exit_success: bool,
        timed_out: bool,
        content: Option<PathBuf>,
    ) -> FetchOutcome {
        if let Some(kind) = self.second_factor {
            return FetchOutcome::NeedsSecondFactor(kind);
        }
        if self.session_expired {
            return FetchOutcome::SessionExpired;
        }
        if self.access_denied {
            return FetchOutcome::AccessDenied;
        }
        if self.not_found {
            return FetchOutcome::NotFound;
        }
        if timed_out {
            return FetchOutcome::Timeout;
        }
        if let Some(detail) = &self.transient_detail {
            return FetchOutcome::TransientFailure(detail.clone());
        }
        match content {
            Some(path) => FetchOutcome::ContentWritten(path),
            None if !exit_success => {
                FetchOutcome::TransientFailure("client exited with failure status".into())
            }
            None => {
                // Textual success but nothing on disk
                FetchOutcome::TransientFailure("expected content path absent or empty".into())
            }
        }
    }
}
