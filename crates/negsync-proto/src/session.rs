//! Endpoint session: the reconciliation state machine for one endpoint.
//!
//! ```text
//! Idle -> Connecting -> Syncing ─┬─> (Uploading) -> (Downloading) ─┬─> Syncing ...
//!              │                 │                                 └─> Complete
//!              └─> Error <───────┴── ERR frame / engine failure / watchdog
//! ```
//!
//! Rounds are strictly sequential: one outbound frame per inbound `MSG`,
//! sent only after that round's upload and download sub-phases settle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use negsync_core::{DigestSet, FilterSet, Record, RecordId};
use negsync_store::{InsertResult, RecordStore, RecordStoreExt};

use crate::config::SyncConfig;
use crate::connection::{RelayConnection, Subscription};
use crate::engine::{EngineFactory, ReconciliationEngine};
use crate::error::{Result, SyncError, TimeoutKind};
use crate::messages::{generate_subscription_id, NegFrame};
use crate::records::RecordTransport;
use crate::state::{SessionStatus, StateHandle, SyncPhase};
use crate::transport::Connector;

/// Collaborators a session runs against.
#[derive(Clone)]
pub struct SessionServices {
    pub connector: Arc<dyn Connector>,
    pub store: Arc<dyn RecordStore>,
    pub records: Arc<dyn RecordTransport>,
    pub engines: Arc<dyn EngineFactory>,
}

/// Running union of the have/need ids reported across rounds.
///
/// Ids keep first-seen order. An id reported again in a later round is not
/// counted twice.
#[derive(Debug, Default, Clone)]
pub struct DeltaAccumulator {
    have: Vec<RecordId>,
    need: Vec<RecordId>,
    have_seen: HashSet<RecordId>,
    need_seen: HashSet<RecordId>,
}

impl DeltaAccumulator {
    /// Fold in one round. Returns the ids not seen in earlier rounds.
    pub fn absorb(
        &mut self,
        have: Vec<RecordId>,
        need: Vec<RecordId>,
    ) -> (Vec<RecordId>, Vec<RecordId>) {
        let fresh_have: Vec<_> = have
            .into_iter()
            .filter(|id| self.have_seen.insert(*id))
            .collect();
        let fresh_need: Vec<_> = need
            .into_iter()
            .filter(|id| self.need_seen.insert(*id))
            .collect();
        self.have.extend_from_slice(&fresh_have);
        self.need.extend_from_slice(&fresh_need);
        (fresh_have, fresh_need)
    }

    pub fn have(&self) -> &[RecordId] {
        &self.have
    }

    pub fn need(&self) -> &[RecordId] {
        &self.need
    }
}

/// Final outcome of one session.
#[derive(Debug)]
pub struct SessionReport {
    pub url: String,
    pub subscription_id: String,
    /// `Complete` or `Error`.
    pub status: SessionStatus,
    /// Ids the endpoint lacked, deduplicated.
    pub have: Vec<RecordId>,
    /// Ids missing locally, deduplicated.
    pub need: Vec<RecordId>,
    pub round_count: u64,
    pub duration: Duration,
    pub error: Option<SyncError>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Complete
    }
}

/// One sync attempt against one endpoint.
pub struct EndpointSession {
    url: String,
    subscription_id: String,
    filters: FilterSet,
    config: SyncConfig,
    services: SessionServices,
    state: StateHandle,
}

impl EndpointSession {
    /// Create a session with a fresh subscription id.
    pub fn new(url: &str, filters: FilterSet, config: SyncConfig, services: SessionServices) -> Self {
        let subscription_id = generate_subscription_id(&config.subscription_prefix);
        Self {
            url: url.to_string(),
            subscription_id,
            filters,
            config,
            services,
            state: StateHandle::new(url),
        }
    }

    /// Publish state through an existing handle instead of a private one.
    pub fn with_state(mut self, state: StateHandle) -> Self {
        self.state = state;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Run the session to a terminal state.
    ///
    /// Never fails: errors are captured in the report and in the published
    /// state.
    pub async fn run(self) -> SessionReport {
        let started = Instant::now();
        self.state.begin(&self.subscription_id);
        info!(url = %self.url, sub_id = %self.subscription_id, "starting sync");

        let mut deltas = DeltaAccumulator::default();
        let mut rounds = 0u64;
        let result = self.connect_and_reconcile(&mut deltas, &mut rounds).await;

        let (have, need) = (deltas.have.len() as u64, deltas.need.len() as u64);
        let status = match &result {
            Ok(()) => {
                self.state.update(|s| {
                    s.record_counts(have, need);
                    s.phase = SyncPhase::Done;
                    s.message = format!("Sync complete: {have} uploaded, {need} downloaded");
                    s.transition(SessionStatus::Complete);
                });
                info!(
                    url = %self.url,
                    rounds,
                    have,
                    need,
                    elapsed = ?started.elapsed(),
                    "sync complete"
                );
                SessionStatus::Complete
            }
            Err(e) => {
                self.state.fail(&e.to_string());
                error!(url = %self.url, rounds, error = %e, "sync failed");
                SessionStatus::Error
            }
        };

        SessionReport {
            url: self.url,
            subscription_id: self.subscription_id,
            status,
            have: deltas.have,
            need: deltas.need,
            round_count: rounds,
            duration: started.elapsed(),
            error: result.err(),
        }
    }

    async fn connect_and_reconcile(
        &self,
        deltas: &mut DeltaAccumulator,
        rounds: &mut u64,
    ) -> Result<()> {
        let connect_timeout = self.config.connect_timeout;
        let link = timeout(connect_timeout, self.services.connector.connect(&self.url))
            .await
            .map_err(|_| SyncError::Timeout {
                kind: TimeoutKind::Connect,
                after: connect_timeout,
            })??;
        debug!(url = %self.url, "connected");

        let mut conn = RelayConnection::spawn(&self.url, link);

        let sync_timeout = self.config.sync_timeout;
        let result = match timeout(sync_timeout, self.reconcile(&conn, deltas, rounds)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url = %self.url, after = ?sync_timeout, "watchdog fired");
                Err(SyncError::Timeout {
                    kind: TimeoutKind::Sync,
                    after: sync_timeout,
                })
            }
        };

        conn.unsubscribe(&self.subscription_id);
        conn.close().await;
        result
    }

    async fn reconcile(
        &self,
        conn: &RelayConnection,
        deltas: &mut DeltaAccumulator,
        rounds: &mut u64,
    ) -> Result<()> {
        self.state.update(|s| {
            s.transition(SessionStatus::Syncing);
            s.phase = SyncPhase::Init;
            s.message = "Fetching local records...".to_string();
        });

        let local = self.local_records().await;
        let digest = DigestSet::from_records(local.values());
        let found = digest.len();
        debug!(url = %self.url, records = found, "digest set sealed");
        self.state.update(|s| {
            s.phase = SyncPhase::Initiating;
            s.message = format!("Found {found} local records");
        });

        let mut engine = self
            .services
            .engines
            .create(digest, self.config.frame_size_limit)?;
        let initial = engine.initiate().await?;

        let mut inbox = conn.subscribe(&self.subscription_id);
        conn.send(&NegFrame::Open {
            subscription_id: self.subscription_id.clone(),
            filter: self.filters.combined(),
            message: initial,
        })?;
        self.state.update(|s| {
            s.phase = SyncPhase::Reconciling;
            s.message = "Starting reconciliation...".to_string();
        });

        self.round_loop(conn, &mut inbox, engine.as_mut(), &local, deltas, rounds)
            .await
    }

    async fn round_loop(
        &self,
        conn: &RelayConnection,
        inbox: &mut Subscription,
        engine: &mut dyn ReconciliationEngine,
        local: &HashMap<RecordId, Record>,
        deltas: &mut DeltaAccumulator,
        rounds: &mut u64,
    ) -> Result<()> {
        loop {
            let frame = inbox
                .recv()
                .await
                .ok_or_else(|| SyncError::Connection("connection closed by peer".into()))?;

            let message = match frame {
                NegFrame::Msg { message, .. } => message,
                NegFrame::Err { reason, .. } => return Err(SyncError::Protocol(reason)),
                other => {
                    debug!(url = %self.url, frame = other.type_tag(), "ignoring unexpected frame");
                    continue;
                }
            };

            *rounds += 1;
            let round = *rounds;
            self.state.update(|s| {
                s.round_count = round;
                s.message = format!("Reconciliation round {round}");
            });

            let outcome = engine.reconcile(message).await?;
            let (have, need) = deltas.absorb(outcome.have, outcome.need);
            let (have_total, need_total) = (deltas.have.len() as u64, deltas.need.len() as u64);
            debug!(
                url = %self.url,
                round,
                new_have = have.len(),
                new_need = need.len(),
                finished = outcome.next.is_none(),
                "round reconciled"
            );
            self.state.update(|s| s.record_counts(have_total, need_total));

            if !have.is_empty() {
                self.upload(&have, local).await;
            }
            if !need.is_empty() {
                if let Err(e) = self.download(&need).await {
                    warn!(url = %self.url, error = %e, "download incomplete, continuing");
                }
            }

            match outcome.next {
                Some(next) => {
                    conn.send(&NegFrame::Msg {
                        subscription_id: self.subscription_id.clone(),
                        message: next,
                    })?;
                    self.state.update(|s| {
                        s.transition(SessionStatus::Syncing);
                        s.phase = SyncPhase::Reconciling;
                    });
                }
                None => {
                    conn.send(&NegFrame::Close {
                        subscription_id: self.subscription_id.clone(),
                    })?;
                    return Ok(());
                }
            }
        }
    }

    /// Local records selected by the filter set, keyed by id.
    ///
    /// Only records the combined filter matches take part: that is the set
    /// the endpoint evaluates on its side.
    async fn local_records(&self) -> HashMap<RecordId, Record> {
        let combined = self.filters.combined();
        self.services
            .store
            .fetch_local_records(&self.filters)
            .await
            .into_iter()
            .filter(|r| combined.matches(r))
            .map(|r| (r.id, r))
            .collect()
    }

    async fn upload(&self, ids: &[RecordId], local: &HashMap<RecordId, Record>) {
        let count = ids.len();
        self.state.update(|s| {
            s.transition(SessionStatus::Uploading);
            s.phase = SyncPhase::Uploading;
            s.message = format!("Uploading {count} records...");
        });

        for id in ids {
            match local.get(id) {
                Some(record) => match self.services.records.publish(&self.url, record).await {
                    Ok(()) => debug!(url = %self.url, id = %id, "uploaded"),
                    Err(e) => warn!(url = %self.url, id = %id, error = %e, "upload failed, skipping"),
                },
                None => warn!(url = %self.url, id = %id, "record not found locally, skipping"),
            }
            self.state.update(|s| s.total_processed += 1);
        }
    }

    /// Fetch `ids` and store what arrives.
    ///
    /// A fetch error or the soft deadline ends the download early. Either is
    /// returned for logging; records that arrived before it are kept.
    async fn download(&self, ids: &[RecordId]) -> Result<usize> {
        let target = ids.len();
        self.state.update(|s| {
            s.transition(SessionStatus::Downloading);
            s.phase = SyncPhase::Downloading;
            s.message = format!("Downloading {target} records...");
        });

        let wanted: HashSet<RecordId> = ids.iter().copied().collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetch = self.services.records.fetch(&self.url, ids, tx);
        tokio::pin!(fetch);
        let deadline = tokio::time::sleep(self.config.fetch_timeout);
        tokio::pin!(deadline);

        let mut received = 0usize;
        let outcome = loop {
            tokio::select! {
                biased;
                Some(record) = rx.recv() => {
                    self.ingest(record, &wanted, &mut received, target).await;
                }
                result = &mut fetch => break result,
                _ = &mut deadline => {
                    break Err(SyncError::Timeout {
                        kind: TimeoutKind::Fetch,
                        after: self.config.fetch_timeout,
                    });
                }
            }
        };
        while let Ok(record) = rx.try_recv() {
            self.ingest(record, &wanted, &mut received, target).await;
        }

        debug!(url = %self.url, received, target, "download settled");
        self.state.update(|s| s.total_processed += target as u64);
        outcome.map(|()| received)
    }

    async fn ingest(
        &self,
        record: Record,
        wanted: &HashSet<RecordId>,
        received: &mut usize,
        target: usize,
    ) {
        if !wanted.contains(&record.id) {
            warn!(url = %self.url, id = %record.id, "endpoint sent an unrequested record");
            return;
        }
        match self.services.store.insert_record(&record).await {
            Ok(InsertResult::Inserted) | Ok(InsertResult::AlreadyExists) => {
                *received += 1;
                let n = *received;
                self.state
                    .update(|s| s.message = format!("Downloaded {n}/{target} records"));
            }
            Err(e) => {
                let e = SyncError::from(e);
                warn!(url = %self.url, id = %record.id, error = %e, "rejected downloaded record");
            }
        }
    }
}
