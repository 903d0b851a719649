//! Reconciliation engines for tests.
//!
//! [`ScriptedEngine`] replays fixed rounds regardless of what the peer says.
//! [`ListEngine`] is a naive but complete engine: it ships its id list in
//! frame-sized chunks and the peer ([`ListResponder`]) answers with the
//! differences. It needs no shared algorithm beyond set difference, which
//! makes end-to-end expectations easy to state.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use negsync_core::{DigestSet, ReconciliationMessage, RecordId};
use negsync_proto::{EngineError, EngineFactory, ReconcileOutcome, ReconciliationEngine};

/// One scripted round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptStep {
    pub have: Vec<RecordId>,
    pub need: Vec<RecordId>,
    pub next: Option<String>,
}

impl ScriptStep {
    /// A round that continues with `next`.
    pub fn cont(next: &str) -> Self {
        Self {
            next: Some(next.to_string()),
            ..Self::default()
        }
    }

    /// A round that ends reconciliation.
    pub fn finish() -> Self {
        Self::default()
    }

    pub fn have(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.have.extend(ids);
        self
    }

    pub fn need(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.need.extend(ids);
        self
    }
}

/// Replays a script; fails once the script runs out, or on receiving the
/// poison message if one is set.
pub struct ScriptedEngine {
    initial: String,
    steps: VecDeque<ScriptStep>,
    poison: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(initial: &str, steps: Vec<ScriptStep>) -> Self {
        Self {
            initial: initial.to_string(),
            steps: steps.into(),
            poison: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A factory building a fresh engine from the same script for every
    /// session. `reconcile` calls across all of them are counted in
    /// [`ScriptedFactory::calls`].
    pub fn factory(initial: &str, steps: Vec<ScriptStep>) -> Arc<ScriptedFactory> {
        Arc::new(ScriptedFactory {
            initial: initial.to_string(),
            steps,
            poison: None,
            calls: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
        })
    }

    /// Like [`ScriptedEngine::factory`], but every engine fails when the
    /// peer sends exactly `poison`.
    pub fn poisoned_factory(
        initial: &str,
        steps: Vec<ScriptStep>,
        poison: &str,
    ) -> Arc<ScriptedFactory> {
        Arc::new(ScriptedFactory {
            initial: initial.to_string(),
            steps,
            poison: Some(poison.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ReconciliationEngine for ScriptedEngine {
    async fn initiate(&mut self) -> Result<ReconciliationMessage, EngineError> {
        Ok(ReconciliationMessage::new(self.initial.clone()))
    }

    async fn reconcile(
        &mut self,
        message: ReconciliationMessage,
    ) -> Result<ReconcileOutcome, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.poison.as_deref() == Some(message.as_str()) {
            return Err(EngineError::new(format!(
                "undecodable peer message {:?}",
                message.as_str()
            )));
        }
        let step = self
            .steps
            .pop_front()
            .ok_or_else(|| EngineError::new("script exhausted"))?;
        Ok(ReconcileOutcome {
            next: step.next.map(ReconciliationMessage::new),
            have: step.have,
            need: step.need,
        })
    }
}

/// Builds [`ScriptedEngine`]s.
pub struct ScriptedFactory {
    initial: String,
    steps: Vec<ScriptStep>,
    poison: Option<String>,
    calls: Arc<AtomicUsize>,
    created: AtomicUsize,
}

impl ScriptedFactory {
    /// Total `reconcile` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Engines built so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(
        &self,
        _digest: DigestSet,
        _frame_size_limit: usize,
    ) -> Result<Box<dyn ReconciliationEngine>, EngineError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            initial: self.initial.clone(),
            steps: self.steps.clone().into(),
            poison: self.poison.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Chunk {
    ids: Vec<RecordId>,
    done: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Reply {
    /// Ids from the chunk the responder lacks.
    missing: Vec<RecordId>,
    /// Ids only the responder holds. Sent once, after the last chunk.
    extra: Vec<RecordId>,
}

/// Bytes per id inside a chunk: 64 hex chars, quotes and a comma.
const ID_WIRE_LEN: usize = 67;
const CHUNK_OVERHEAD: usize = 32;

/// Full-list reconciliation engine.
pub struct ListEngine {
    ids: Vec<RecordId>,
    per_frame: usize,
    cursor: usize,
    done_sent: bool,
}

impl ListEngine {
    pub fn new(digest: &DigestSet, frame_size_limit: usize) -> Self {
        let per_frame = if frame_size_limit == 0 {
            usize::MAX
        } else {
            (frame_size_limit.saturating_sub(CHUNK_OVERHEAD) / ID_WIRE_LEN).max(1)
        };
        Self {
            ids: digest.items().iter().map(|item| item.id).collect(),
            per_frame,
            cursor: 0,
            done_sent: false,
        }
    }

    /// Factory for use with a session.
    pub fn factory() -> Arc<dyn EngineFactory> {
        Arc::new(
            |digest: DigestSet, limit: usize| -> Result<Box<dyn ReconciliationEngine>, EngineError> {
                Ok(Box::new(ListEngine::new(&digest, limit)))
            },
        )
    }

    fn next_chunk(&mut self) -> Result<ReconciliationMessage, EngineError> {
        let end = self.cursor.saturating_add(self.per_frame).min(self.ids.len());
        let chunk = Chunk {
            ids: self.ids[self.cursor..end].to_vec(),
            done: end == self.ids.len(),
        };
        self.cursor = end;
        self.done_sent = chunk.done;
        serde_json::to_string(&chunk)
            .map(ReconciliationMessage::new)
            .map_err(|e| EngineError::new(e.to_string()))
    }
}

#[async_trait]
impl ReconciliationEngine for ListEngine {
    async fn initiate(&mut self) -> Result<ReconciliationMessage, EngineError> {
        self.next_chunk()
    }

    async fn reconcile(
        &mut self,
        message: ReconciliationMessage,
    ) -> Result<ReconcileOutcome, EngineError> {
        let reply: Reply = serde_json::from_str(message.as_str())
            .map_err(|e| EngineError::new(format!("bad reply: {e}")))?;
        let next = if self.done_sent {
            None
        } else {
            Some(self.next_chunk()?)
        };
        Ok(ReconcileOutcome {
            next,
            have: reply.missing,
            need: reply.extra,
        })
    }
}

/// Endpoint side of [`ListEngine`].
#[derive(Debug, Clone)]
pub struct ListResponder {
    held: BTreeSet<RecordId>,
    seen: BTreeSet<RecordId>,
}

impl ListResponder {
    pub fn new(held: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            held: held.into_iter().collect(),
            seen: BTreeSet::new(),
        }
    }

    /// Answer one client chunk.
    pub fn respond(&mut self, message: &str) -> Result<String, EngineError> {
        let chunk: Chunk = serde_json::from_str(message)
            .map_err(|e| EngineError::new(format!("bad chunk: {e}")))?;
        let missing = chunk
            .ids
            .iter()
            .filter(|id| !self.held.contains(id))
            .copied()
            .collect();
        self.seen.extend(chunk.ids);
        let extra = if chunk.done {
            self.held.difference(&self.seen).copied().collect()
        } else {
            Vec::new()
        };
        serde_json::to_string(&Reply { missing, extra }).map_err(|e| EngineError::new(e.to_string()))
    }
}
