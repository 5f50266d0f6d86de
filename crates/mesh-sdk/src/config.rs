//! Node configuration.

use crate::error::{Result, SdkError};
use mesh_core::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`crate::ChatNode`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity stamped on messages. A fresh ULID when unset.
    pub node_id: Option<NodeId>,
    /// Capacity of the command mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the node event channel; slow subscribers lag past it.
    pub event_capacity: usize,
    /// Send the local clock on every newly opened link.
    pub send_causal_context: bool,
    /// Fold delivered ids into per-author watermarks after each delivery.
    pub compact_dedup: bool,
    /// Buffered age after which the node reports a stall.
    pub stall_threshold_ms: u64,
    /// How often the buffer age is checked.
    pub stall_check_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            mailbox_capacity: 64,
            event_capacity: 256,
            send_causal_context: true,
            compact_dedup: false,
            stall_threshold_ms: 30_000,
            stall_check_interval_ms: 5_000,
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&text)
            .map_err(|e| SdkError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(SdkError::InvalidConfig("mailbox_capacity must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(SdkError::InvalidConfig("event_capacity must be positive".into()));
        }
        if self.stall_check_interval_ms == 0 {
            return Err(SdkError::InvalidConfig(
                "stall_check_interval_ms must be positive".into(),
            ));
        }
        if let Some(id) = &self.node_id {
            if id.as_str().is_empty() {
                return Err(SdkError::InvalidConfig("node_id must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn node_id(mut self, id: impl Into<NodeId>) -> Self {
        self.config.node_id = Some(id.into());
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.config.mailbox_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn send_causal_context(mut self, enabled: bool) -> Self {
        self.config.send_causal_context = enabled;
        self
    }

    pub fn compact_dedup(mut self, enabled: bool) -> Self {
        self.config.compact_dedup = enabled;
        self
    }

    pub fn stall_threshold(mut self, ms: u64) -> Self {
        self.config.stall_threshold_ms = ms;
        self
    }

    pub fn stall_check_interval(mut self, ms: u64) -> Self {
        self.config.stall_check_interval_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
