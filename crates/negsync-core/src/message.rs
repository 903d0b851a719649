//! Opaque reconciliation tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A message produced or consumed by a reconciliation engine.
///
/// The session driver never inspects the contents; it only moves tokens
/// between the engine and the wire. On the wire it is a (hex) string.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationMessage(String);

impl ReconciliationMessage {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ReconciliationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReconciliationMessage({} bytes)", self.0.len())
    }
}

impl From<String> for ReconciliationMessage {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ReconciliationMessage {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
