//! Wire frames exchanged with a peer.
//!
//! Every frame is a JSON array tagged by type and subscription id:
//!
//! ```text
//! ["NEG-OPEN",  subscription_id, filter, initial_message]
//! ["NEG-MSG",   subscription_id, message]
//! ["NEG-ERR",   subscription_id, reason]
//! ["NEG-CLOSE", subscription_id]
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde_json::{json, Value};

use negsync_core::{Filter, ReconciliationMessage};

use crate::error::MessageParseError;

/// Frame type tags.
pub mod tags {
    pub const OPEN: &str = "NEG-OPEN";
    pub const MSG: &str = "NEG-MSG";
    pub const ERR: &str = "NEG-ERR";
    pub const CLOSE: &str = "NEG-CLOSE";
}

/// A reconciliation protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegFrame {
    /// Opens a reconciliation. Sent once per session.
    Open {
        subscription_id: String,
        filter: Filter,
        message: ReconciliationMessage,
    },
    /// One reconciliation step, in either direction.
    Msg {
        subscription_id: String,
        message: ReconciliationMessage,
    },
    /// The peer aborted the reconciliation.
    Err {
        subscription_id: String,
        reason: String,
    },
    /// Ends the reconciliation. Sent once, last.
    Close { subscription_id: String },
}

impl NegFrame {
    pub fn subscription_id(&self) -> &str {
        match self {
            NegFrame::Open { subscription_id, .. }
            | NegFrame::Msg { subscription_id, .. }
            | NegFrame::Err { subscription_id, .. }
            | NegFrame::Close { subscription_id } => subscription_id,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            NegFrame::Open { .. } => tags::OPEN,
            NegFrame::Msg { .. } => tags::MSG,
            NegFrame::Err { .. } => tags::ERR,
            NegFrame::Close { .. } => tags::CLOSE,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> String {
        let value = match self {
            NegFrame::Open {
                subscription_id,
                filter,
                message,
            } => json!([tags::OPEN, subscription_id, filter, message]),
            NegFrame::Msg {
                subscription_id,
                message,
            } => json!([tags::MSG, subscription_id, message]),
            NegFrame::Err {
                subscription_id,
                reason,
            } => json!([tags::ERR, subscription_id, reason]),
            NegFrame::Close { subscription_id } => json!([tags::CLOSE, subscription_id]),
        };
        value.to_string()
    }

    /// Decode a JSON text frame.
    ///
    /// Elements past the ones a frame type defines are ignored.
    pub fn decode(text: &str) -> Result<Self, MessageParseError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MessageParseError::InvalidJson(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(MessageParseError::NotAnArray);
        };
        let mut items = items.into_iter();

        let kind = next_string(&mut items, "type")?;
        if ![tags::OPEN, tags::MSG, tags::ERR, tags::CLOSE].contains(&kind.as_str()) {
            return Err(MessageParseError::UnknownType(kind));
        }
        let subscription_id = next_string(&mut items, "subscription_id")?;

        match kind.as_str() {
            tags::OPEN => {
                let filter = items
                    .next()
                    .ok_or(MessageParseError::MissingField("filter"))?;
                let filter: Filter = serde_json::from_value(filter).map_err(|e| {
                    MessageParseError::InvalidField {
                        field: "filter",
                        reason: e.to_string(),
                    }
                })?;
                let message = next_string(&mut items, "message")?;
                Ok(NegFrame::Open {
                    subscription_id,
                    filter,
                    message: message.into(),
                })
            }
            tags::MSG => Ok(NegFrame::Msg {
                subscription_id,
                message: next_string(&mut items, "message")?.into(),
            }),
            tags::ERR => Ok(NegFrame::Err {
                subscription_id,
                reason: next_string(&mut items, "reason")?,
            }),
            _ => Ok(NegFrame::Close { subscription_id }),
        }
    }
}

fn next_string(
    items: &mut impl Iterator<Item = Value>,
    field: &'static str,
) -> Result<String, MessageParseError> {
    match items.next() {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(MessageParseError::InvalidField {
            field,
            reason: format!("expected string, got {other}"),
        }),
        None => Err(MessageParseError::MissingField(field)),
    }
}

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a subscription id: `<prefix>-<unix-ms>-<counter>-<suffix>`.
///
/// The process-wide counter keeps ids unique among concurrently active
/// sessions; the random suffix separates processes started in the same
/// millisecond.
pub fn generate_subscription_id(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let counter = SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..3)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{prefix}-{millis}-{counter}-{suffix}")
}
