//! The sync orchestrator: fans one attempt out to every endpoint.
//!
//! Sessions run as independent tasks. A session's failure is settled into
//! its own state and report and never cancels a sibling. Global progress is
//! written only here, once per settled session.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use negsync_core::{AuthorKey, FilterSet};
use negsync_proto::{
    EndpointSession, SessionReport, SessionServices, SessionState, SessionStatus, StateHandle,
    SyncError,
};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::progress::{GlobalProgress, SyncRunReport};

/// Clears the running flag when dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sync attempts across the configured endpoints.
///
/// Owns every endpoint's [`StateHandle`] and the [`GlobalProgress`] cell.
/// Both are observable through watch channels and survive between runs
/// until [`SyncOrchestrator::clear_states`].
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    services: SessionServices,
    identity: RwLock<Option<AuthorKey>>,
    running: AtomicBool,
    states: Mutex<BTreeMap<String, StateHandle>>,
    progress: watch::Sender<GlobalProgress>,
}

impl SyncOrchestrator {
    /// Create an orchestrator. The configured author, if any, becomes the
    /// initial identity.
    pub fn new(config: OrchestratorConfig, services: SessionServices) -> Result<Self> {
        config.validate()?;
        let identity = config.author_key()?;
        let (progress, _) = watch::channel(GlobalProgress::default());
        Ok(Self {
            config,
            services,
            identity: RwLock::new(identity),
            running: AtomicBool::new(false),
            states: Mutex::new(BTreeMap::new()),
            progress,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Set the user whose records are synced from the next run on.
    pub fn set_identity(&self, author: AuthorKey) {
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(author);
    }

    pub fn identity(&self) -> Option<AuthorKey> {
        *self.identity.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Runs
    // ─────────────────────────────────────────────────────────────────────────

    /// Sync every configured endpoint concurrently.
    ///
    /// Returns once every session has settled. Fails with
    /// [`Error::AlreadyRunning`] without starting anything if a run is in
    /// progress.
    pub async fn start_sync(&self) -> Result<SyncRunReport> {
        let _guard = self.acquire()?;
        if self.config.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        let endpoints = self.config.endpoints.clone();
        self.run(&endpoints).await
    }

    /// Sync one endpoint, configured or not.
    pub async fn sync_one(&self, url: &str) -> Result<SyncRunReport> {
        let _guard = self.acquire()?;
        self.run(&[url.to_string()]).await
    }

    fn acquire(&self) -> Result<RunGuard<'_>> {
        RunGuard::acquire(&self.running).ok_or_else(|| {
            warn!("sync already in progress, ignoring request");
            Error::AlreadyRunning
        })
    }

    async fn run(&self, endpoints: &[String]) -> Result<SyncRunReport> {
        let author = self.identity().ok_or(Error::NoIdentity)?;
        let filters = FilterSet::wallet(author);

        let mut seen = HashSet::new();
        let endpoints: Vec<&String> = endpoints.iter().filter(|u| seen.insert(*u)).collect();

        self.progress
            .send_replace(GlobalProgress::started(endpoints.len()));
        info!(endpoints = endpoints.len(), author = %author, "sync run started");

        let mut sessions = JoinSet::new();
        let mut spawned = HashMap::with_capacity(endpoints.len());
        for url in &endpoints {
            let state = self.state_handle(url);
            let session = EndpointSession::new(
                url,
                filters.clone(),
                self.config.sync.clone(),
                self.services.clone(),
            )
            .with_state(state.clone());
            let task = sessions.spawn(session.run());
            spawned.insert(task.id(), (url.to_string(), state));
        }

        let mut reports = Vec::with_capacity(endpoints.len());
        while let Some(joined) = sessions.join_next_with_id().await {
            let report = match joined {
                Ok((_, report)) => report,
                Err(e) => match spawned.remove(&e.id()) {
                    Some((url, state)) => {
                        error!(url = %url, error = %e, "session task failed");
                        failed_report(url, &state, &e)
                    }
                    None => {
                        error!(error = %e, "unknown session task failed");
                        self.progress.send_modify(GlobalProgress::record_failure);
                        continue;
                    }
                },
            };
            self.progress.send_modify(|p| p.record(&report));
            reports.push(report);
        }

        reports.sort_by_key(|r| endpoints.iter().position(|u| **u == r.url));
        let progress = self.progress();
        info!(
            completed = progress.completed_endpoints,
            errors = progress.error_count,
            have = progress.total_have,
            need = progress.total_need,
            "sync run finished"
        );
        Ok(SyncRunReport {
            sessions: reports,
            progress,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drop all endpoint states and zero the progress.
    ///
    /// Refused with [`Error::AlreadyRunning`] while a run is in progress.
    /// Existing subscribers see their endpoint reset to idle.
    pub fn clear_states(&self) -> Result<()> {
        let _guard = self.acquire()?;
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in states.values() {
            handle.reset();
        }
        states.clear();
        self.progress.send_replace(GlobalProgress::default());
        Ok(())
    }

    pub fn progress(&self) -> GlobalProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<GlobalProgress> {
        self.progress.subscribe()
    }

    /// Watch one endpoint's state. The endpoint need not have run yet.
    pub fn subscribe(&self, url: &str) -> watch::Receiver<SessionState> {
        self.state_handle(url).subscribe()
    }

    pub fn session_state(&self, url: &str) -> Option<SessionState> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(url).map(StateHandle::snapshot)
    }

    /// Snapshots of every known endpoint, keyed by url.
    pub fn session_states(&self) -> BTreeMap<String, SessionState> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .iter()
            .map(|(url, handle)| (url.clone(), handle.snapshot()))
            .collect()
    }

    fn state_handle(&self, url: &str) -> StateHandle {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(url.to_string())
            .or_insert_with(|| StateHandle::new(url))
            .clone()
    }
}

/// Settle an endpoint whose task ended without a report.
fn failed_report(url: String, state: &StateHandle, e: &JoinError) -> SessionReport {
    let error = SyncError::Task(e.to_string());
    state.fail(&error.to_string());
    let snap = state.snapshot();
    SessionReport {
        url,
        subscription_id: snap.subscription_id.clone().unwrap_or_default(),
        status: SessionStatus::Error,
        have: Vec::new(),
        need: Vec::new(),
        round_count: snap.round_count,
        duration: snap.duration().unwrap_or(Duration::ZERO),
        error: Some(error),
    }
}
