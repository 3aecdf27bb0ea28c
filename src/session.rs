//! Steam session state
//!
//! The external steam client keeps its own credential store on disk; this
//! module only tracks what we know about it. The session is a value with
//! explicit transitions (Unknown → Verified → Invalid) rather than a
//! boolean scattered across call sites.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// What we currently know about the saved steam session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not probed yet this process lifetime
    Unknown,
    /// A login succeeded without a second-factor prompt at the given time
    Verified {
        /// When the successful login was observed
        at: DateTime<Utc>,
    },
    /// A re-auth signal or credential error was observed
    Invalid,
}

/// Process-wide session tracker owned by the steam client adapter
#[derive(Clone, Debug)]
pub struct SteamSession {
    /// Account the session belongs to; None in anonymous mode
    pub username: Option<String>,
    state: SessionState,
}

impl SteamSession {
    /// Create a session tracker in the Unknown state.
    pub fn new(username: Option<String>) -> Self {
        Self {
            username,
            state: SessionState::Unknown,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether credentials exist at all.
    pub fn credentialed(&self) -> bool {
        self.username.is_some()
    }

    /// Whether the session was verified within the caching window.
    ///
    /// A fresh session lets fetches run without a password argument and
    /// without a verify probe.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.state {
            SessionState::Verified { at } => {
                let age = now.signed_duration_since(at);
                age >= chrono::TimeDelta::zero()
                    && age.to_std().map(|d| d <= window).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Record a successful login without a second-factor prompt.
    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.state = SessionState::Verified { at: now };
    }

    /// Record a re-auth signal observed mid-operation.
    pub fn invalidate(&mut self) {
        self.state = SessionState::Invalid;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_unknown_and_stale() {
        let session = SteamSession::new(Some("user".into()));
        assert_eq!(session.state(), SessionState::Unknown);
        assert!(!session.is_fresh(Duration::from_secs(1800), Utc::now()));
    }

    #[test]
    fn verified_session_is_fresh_within_window() {
        let mut session = SteamSession::new(Some("user".into()));
        let now = Utc::now();
        session.mark_verified(now);
        assert!(session.is_fresh(Duration::from_secs(1800), now));
        assert!(session.is_fresh(
            Duration::from_secs(1800),
            now + chrono::TimeDelta::seconds(1799)
        ));
    }

    #[test]
    fn verified_session_goes_stale_past_window() {
        let mut session = SteamSession::new(Some("user".into()));
        let now = Utc::now();
        session.mark_verified(now);
        assert!(!session.is_fresh(
            Duration::from_secs(1800),
            now + chrono::TimeDelta::seconds(1801)
        ));
    }

    #[test]
    fn invalidation_is_sticky_until_reverified() {
        let mut session = SteamSession::new(Some("user".into()));
        let now = Utc::now();
        session.mark_verified(now);
        session.invalidate();
        assert_eq!(session.state(), SessionState::Invalid);
        assert!(!session.is_fresh(Duration::from_secs(1800), now));

        session.mark_verified(now);
        assert!(session.is_fresh(Duration::from_secs(1800), now));
    }

    #[test]
    fn anonymous_session_has_no_credentials() {
        let session = SteamSession::new(None);
        assert!(!session.credentialed());
    }
}
