//! Participant and message identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-author send sequence number (1-based).
pub type SeqNo = u64;

/// Opaque identifier of a participant, stable for one session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh session identifier.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Globally unique message identity: the author plus its send sequence.
///
/// Two authors may both send a message with `seq = 1`; the pair keeps them
/// apart in the dedup set and the reorder buffer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub author: NodeId,
    pub seq: SeqNo,
}

impl MessageId {
    pub fn new(author: impl Into<NodeId>, seq: SeqNo) -> Self {
        Self {
            author: author.into(),
            seq,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.author, self.seq)
    }
}
