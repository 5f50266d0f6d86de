//! Application sink: where delivered messages end up.

use mesh_core::ChatMessage;
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives every delivered message, in delivery order.
pub trait ApplicationSink: Send + Sync {
    fn on_delivered(&self, entry: String);

    /// Format and append a delivered message.
    fn deliver(&self, message: &ChatMessage) {
        self.on_delivered(message.format_entry());
    }
}

/// Append-only chat history shared between a node and its UI.
///
/// Clones share the same log. Readers take a short read lock and may miss
/// entries appended right after.
#[derive(Clone, Debug, Default)]
pub struct ChatLog {
    entries: Arc<RwLock<Vec<String>>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<String> {
        self.entries.read().get(index).cloned()
    }

    /// Copy of the whole log.
    pub fn entries(&self) -> Vec<String> {
        self.entries.read().clone()
    }

    /// The last `n` entries.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    /// Position of the first entry ending with `body`.
    pub fn position_of(&self, body: &str) -> Option<usize> {
        let suffix = format!(": {}", body);
        self.entries.read().iter().position(|e| e.ends_with(&suffix))
    }
}

impl ApplicationSink for ChatLog {
    fn on_delivered(&self, entry: String) {
        self.entries.write().push(entry);
    }
}
