//! Aggregate progress and run reports.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use negsync_proto::{SessionReport, SessionStatus};

/// Progress across every endpoint of one run.
///
/// Each session contributes exactly once, when it settles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalProgress {
    pub total_endpoints: usize,
    /// Settled sessions, successful or not.
    pub completed_endpoints: usize,
    pub error_count: usize,
    /// Sum of have counts over successful sessions.
    pub total_have: u64,
    /// Sum of need counts over successful sessions.
    pub total_need: u64,
    /// Unix ms.
    pub start_time: Option<u64>,
    /// Unix ms.
    pub end_time: Option<u64>,
}

impl GlobalProgress {
    /// Progress for a run over `total_endpoints` that starts now.
    pub fn started(total_endpoints: usize) -> Self {
        Self {
            total_endpoints,
            start_time: Some(now_millis()),
            ..Self::default()
        }
    }

    /// Fold in one settled session.
    pub fn record(&mut self, report: &SessionReport) {
        self.completed_endpoints += 1;
        if report.status == SessionStatus::Complete {
            self.total_have += report.have.len() as u64;
            self.total_need += report.need.len() as u64;
        } else {
            self.error_count += 1;
        }
        self.stamp_if_finished();
    }

    /// Fold in a session that ended without a report.
    pub fn record_failure(&mut self) {
        self.completed_endpoints += 1;
        self.error_count += 1;
        self.stamp_if_finished();
    }

    fn stamp_if_finished(&mut self) {
        if self.is_finished() && self.end_time.is_none() {
            self.end_time = Some(now_millis());
        }
    }

    /// Settled share of endpoints, 0 to 100.
    pub fn percent(&self) -> u8 {
        if self.total_endpoints == 0 {
            return 0;
        }
        ((self.completed_endpoints.min(self.total_endpoints) * 100) / self.total_endpoints) as u8
    }

    pub fn successful(&self) -> usize {
        self.completed_endpoints.saturating_sub(self.error_count)
    }

    pub fn is_finished(&self) -> bool {
        self.total_endpoints > 0 && self.completed_endpoints >= self.total_endpoints
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(Duration::from_millis(end.saturating_sub(start))),
            _ => None,
        }
    }
}

/// Outcome of a full run or a single-endpoint run.
#[derive(Debug)]
pub struct SyncRunReport {
    /// One report per endpoint, in configuration order.
    pub sessions: Vec<SessionReport>,
    pub progress: GlobalProgress,
}

impl SyncRunReport {
    pub fn is_success(&self) -> bool {
        self.sessions.iter().all(SessionReport::is_success)
    }

    pub fn session(&self, url: &str) -> Option<&SessionReport> {
        self.sessions.iter().find(|s| s.url == url)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SessionReport> {
        self.sessions.iter().filter(|s| !s.is_success())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
