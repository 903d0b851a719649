//! Per-endpoint session state.
//!
//! A [`SessionState`] is published through a `tokio::sync::watch` channel
//! held by a [`StateHandle`]. Only the owning session writes to it, and
//! once the status is terminal the handle refuses further updates until
//! the next [`StateHandle::begin`] or [`StateHandle::reset`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Syncing,
    Uploading,
    Downloading,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Complete | SessionStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting
                | SessionStatus::Syncing
                | SessionStatus::Uploading
                | SessionStatus::Downloading
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Upload and download are sub-phases of a round and return to
    /// `Syncing`; nothing leaves a terminal status.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        if self == next {
            return !self.is_terminal();
        }
        match self {
            Idle => next == Connecting,
            Connecting => matches!(next, Syncing | Error),
            Syncing => matches!(next, Uploading | Downloading | Complete | Error),
            Uploading => matches!(next, Downloading | Syncing | Complete | Error),
            Downloading => matches!(next, Syncing | Complete | Error),
            Complete | Error => false,
        }
    }
}

/// Finer-grained progress marker shown alongside the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Init,
    Initiating,
    Reconciling,
    Uploading,
    Downloading,
    Done,
}

/// Observable state of one endpoint session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub url: String,
    pub status: SessionStatus,
    pub phase: SyncPhase,
    pub message: String,
    pub have_count: u64,
    pub need_count: u64,
    pub total_processed: u64,
    pub round_count: u64,
    /// Unix ms.
    pub start_time: Option<u64>,
    /// Unix ms.
    pub end_time: Option<u64>,
    pub error: Option<String>,
    pub subscription_id: Option<String>,
}

impl SessionState {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status: SessionStatus::Idle,
            phase: SyncPhase::Init,
            message: "Ready to sync".to_string(),
            have_count: 0,
            need_count: 0,
            total_processed: 0,
            round_count: 0,
            start_time: None,
            end_time: None,
            error: None,
            subscription_id: None,
        }
    }

    /// Back to idle, keeping the url.
    pub fn reset(&mut self) {
        *self = Self::new(&self.url);
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Terminal transitions stamp `end_time`. Returns whether the move
    /// happened.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                url = %self.url,
                from = ?self.status,
                to = ?next,
                "rejected state transition"
            );
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(now_millis());
        }
        true
    }

    /// Raise the have/need tallies. Counts never decrease.
    pub fn record_counts(&mut self, have: u64, need: u64) {
        self.have_count = self.have_count.max(have);
        self.need_count = self.need_count.max(need);
    }

    pub fn is_syncing(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time between start and end, once both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(Duration::from_millis(end.saturating_sub(start))),
            _ => None,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Shared, watchable cell holding one endpoint's [`SessionState`].
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateHandle {
    pub fn new(url: &str) -> Self {
        let (tx, _) = watch::channel(SessionState::new(url));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Start a new attempt: reset, then move to `Connecting`.
    pub fn begin(&self, subscription_id: &str) {
        self.tx.send_modify(|state| {
            state.reset();
            state.transition(SessionStatus::Connecting);
            state.phase = SyncPhase::Init;
            state.message = "Connecting...".to_string();
            state.subscription_id = Some(subscription_id.to_string());
            state.start_time = Some(now_millis());
        });
    }

    /// Apply `f` unless the state is already terminal.
    ///
    /// Returns whether `f` ran.
    pub fn update(&self, f: impl FnOnce(&mut SessionState)) -> bool {
        self.tx.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            f(state);
            true
        })
    }

    /// Move to `Error` with `reason`, unless already terminal.
    pub fn fail(&self, reason: &str) -> bool {
        self.update(|state| {
            state.message = format!("Error: {reason}");
            state.error = Some(reason.to_string());
            state.transition(SessionStatus::Error);
        })
    }

    /// Discard everything but the url.
    pub fn reset(&self) {
        self.tx.send_modify(SessionState::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = SessionState::new("wss://relay");
        for next in [
            SessionStatus::Connecting,
            SessionStatus::Syncing,
            SessionStatus::Uploading,
            SessionStatus::Downloading,
            SessionStatus::Syncing,
            SessionStatus::Complete,
        ] {
            assert!(state.transition(next), "to {next:?}");
        }
        assert!(state.end_time.is_some());
    }

    #[test]
    fn test_no_backward_or_post_terminal_transitions() {
        let mut state = SessionState::new("wss://relay");
        assert!(!state.transition(SessionStatus::Syncing));
        assert!(state.transition(SessionStatus::Connecting));
        assert!(!state.transition(SessionStatus::Idle));
        assert!(state.transition(SessionStatus::Error));
        assert!(!state.transition(SessionStatus::Complete));
        assert!(!state.transition(SessionStatus::Error));
        assert_eq!(state.status, SessionStatus::Error);
    }

    #[test]
    fn test_counts_monotone() {
        let mut state = SessionState::new("wss://relay");
        state.record_counts(3, 1);
        state.record_counts(2, 4);
        assert_eq!((state.have_count, state.need_count), (3, 4));
    }

    #[test]
    fn test_handle_freezes_after_terminal() {
        let handle = StateHandle::new("wss://relay");
        let mut rx = handle.subscribe();

        handle.begin("neg-1");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, SessionStatus::Connecting);

        assert!(handle.update(|s| {
            s.transition(SessionStatus::Error);
            s.error = Some("boom".into());
        }));
        assert!(!handle.update(|s| s.message = "late".into()));

        let snap = handle.snapshot();
        assert_eq!(snap.error.as_deref(), Some("boom"));
        assert_ne!(snap.message, "late");

        handle.reset();
        assert_eq!(handle.snapshot(), SessionState::new("wss://relay"));
    }

    #[test]
    fn test_fail_is_terminal_and_sticky() {
        let handle = StateHandle::new("wss://relay");
        handle.begin("neg-2");
        assert!(handle.fail("task panicked"));
        assert!(!handle.fail("second reason"));

        let snap = handle.snapshot();
        assert_eq!(snap.status, SessionStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("task panicked"));
        assert_eq!(snap.message, "Error: task panicked");
        assert!(snap.end_time.is_some());
    }

    #[test]
    fn test_duration_and_is_syncing() {
        let mut state = SessionState::new("wss://relay");
        assert!(!state.is_syncing());
        state.transition(SessionStatus::Connecting);
        assert!(state.is_syncing());
        state.start_time = Some(1_000);
        state.end_time = Some(1_250);
        assert_eq!(state.duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
