//! The reconciliation engine capability.
//!
//! The bit-level set-reconciliation algorithm lives behind these traits. The
//! session driver builds one engine per attempt from a sealed [`DigestSet`]
//! and only ever calls [`ReconciliationEngine::initiate`] once, followed by
//! [`ReconciliationEngine::reconcile`] for each inbound message until the
//! engine reports completion.

use async_trait::async_trait;

use negsync_core::{DigestSet, ReconciliationMessage, RecordId};

use crate::error::EngineError;

/// Result of consuming one peer message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Next message for the peer, or `None` when reconciliation finished.
    pub next: Option<ReconciliationMessage>,
    /// Ids held locally that the peer lacks, found in this round.
    pub have: Vec<RecordId>,
    /// Ids the peer holds that are missing locally, found in this round.
    pub need: Vec<RecordId>,
}

impl ReconcileOutcome {
    pub fn is_finished(&self) -> bool {
        self.next.is_none()
    }
}

/// One reconciliation run against one peer.
#[async_trait]
pub trait ReconciliationEngine: Send {
    /// Produce the first outbound message.
    async fn initiate(&mut self) -> Result<ReconciliationMessage, EngineError>;

    /// Consume one peer message.
    ///
    /// Once this returns an outcome with `next == None` the engine is spent.
    async fn reconcile(
        &mut self,
        message: ReconciliationMessage,
    ) -> Result<ReconcileOutcome, EngineError>;
}

/// Builds engines from sealed digest sets.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        digest: DigestSet,
        frame_size_limit: usize,
    ) -> Result<Box<dyn ReconciliationEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(DigestSet, usize) -> Result<Box<dyn ReconciliationEngine>, EngineError> + Send + Sync,
{
    fn create(
        &self,
        digest: DigestSet,
        frame_size_limit: usize,
    ) -> Result<Box<dyn ReconciliationEngine>, EngineError> {
        self(digest, frame_size_limit)
    }
}
