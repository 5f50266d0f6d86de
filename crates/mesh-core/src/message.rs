//! Chat messages and the records exchanged over peer links.

use crate::clock::VectorClock;
use crate::error::CodecError;
use crate::node::{MessageId, NodeId, SeqNo};
use serde::{Deserialize, Serialize};

/// An immutable chat message, created once by its author.
///
/// `id` is the author's send sequence for this message and equals the
/// author's own entry in `dependencies`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: SeqNo,
    pub author_id: NodeId,
    pub body: String,
    pub dependencies: VectorClock,
}

impl ChatMessage {
    /// Build a message from the author's clock snapshot.
    ///
    /// The author's own entry in the snapshot is replaced by `seq`.
    pub fn new(
        author_id: NodeId,
        seq: SeqNo,
        body: impl Into<String>,
        snapshot: &VectorClock,
    ) -> Self {
        let mut dependencies = snapshot.clone();
        dependencies.set(author_id.clone(), seq);
        Self {
            id: seq,
            author_id,
            body: body.into(),
            dependencies,
        }
    }

    /// Globally unique identity of this message.
    pub fn message_id(&self) -> MessageId {
        MessageId::new(self.author_id.clone(), self.id)
    }

    pub fn author(&self) -> &NodeId {
        &self.author_id
    }

    pub fn seq(&self) -> SeqNo {
        self.id
    }

    /// Entry appended to the application log on delivery.
    pub fn format_entry(&self) -> String {
        format!("{} {}: {}", self.author_id, self.dependencies, self.body)
    }

    fn check(&self) -> Result<(), CodecError> {
        if self.id == 0 {
            return Err(CodecError::ZeroSequence(self.author_id.to_string()));
        }
        let own = self.dependencies.get(&self.author_id);
        if own != self.id {
            return Err(CodecError::InconsistentDependencies {
                author: self.author_id.to_string(),
                id: self.id,
                own,
            });
        }
        Ok(())
    }
}

/// One complete record on a peer link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireRecord {
    /// A flooded chat message.
    Chat(ChatMessage),
    /// The sender's clock, sent once when a link opens so a late joiner can
    /// bootstrap entries for nodes whose history it will never receive.
    Context { clock: VectorClock },
}

impl WireRecord {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a frame, rejecting chat messages whose id disagrees with the
    /// author's own dependency entry.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: WireRecord = serde_json::from_slice(bytes)?;
        if let WireRecord::Chat(message) = &record {
            message.check()?;
        }
        Ok(record)
    }
}
