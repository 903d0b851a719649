//! Record publish/fetch against an endpoint.
//!
//! Once reconciliation has named the ids to move, payloads travel through a
//! [`RecordTransport`]. Neither operation is fatal to a session: a failed
//! publish is skipped, and a fetch is bounded by a soft timeout.

use async_trait::async_trait;
use tokio::sync::mpsc;

use negsync_core::{Record, RecordId};

use crate::error::Result;

/// Moves record payloads to and from endpoints.
#[async_trait]
pub trait RecordTransport: Send + Sync {
    /// Upload one record to `endpoint`.
    async fn publish(&self, endpoint: &str, record: &Record) -> Result<()>;

    /// Request `ids` from `endpoint`.
    ///
    /// Records are pushed into `arrivals` as they come in. Returning signals
    /// that the endpoint has delivered everything it is going to deliver.
    async fn fetch(
        &self,
        endpoint: &str,
        ids: &[RecordId],
        arrivals: mpsc::UnboundedSender<Record>,
    ) -> Result<()>;
}
