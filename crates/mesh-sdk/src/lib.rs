//! Mesh SDK - run causal group-chat nodes on tokio
//!
//! Each node is an actor task that owns a delivery engine and floods chat
//! records over whatever links its transport provides.
//!
//! # Quick Start
//!
//! ```rust
//! use mesh_sdk::quick::spawn_mesh;
//! use mesh_sdk::{NodeConfig, Topology};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mesh = spawn_mesh(&["alice", "bob", "carol"], &Topology::Line, NodeConfig::default()).unwrap();
//!
//! mesh.node(0).submit("anyone up for lunch?").await.unwrap();
//! mesh.node(2).wait_for_entries(1, Duration::from_secs(5)).await.unwrap();
//! assert_eq!(mesh.node(2).chat_log().position_of("anyone up for lunch?"), Some(0));
//!
//! mesh.shutdown().await.unwrap();
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`network`] - link transport trait and the in-memory transport
//! - [`multiplexer`] - record encoding and fan-out over open links
//! - [`node`] - the node actor and its handle
//! - [`config`] - node configuration
//! - [`quick`] - in-memory mesh helpers
//! - [`error`] - error types

pub mod config;
pub mod error;
pub mod multiplexer;
pub mod network;
pub mod node;
pub mod quick;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{LinkError, Result, SdkError};
pub use multiplexer::LinkMultiplexer;
pub use network::{create_network, create_topology, LinkEvent, LinkId, LinkTransport, MemoryTransport};
pub use node::{ChatNode, NodeEvent, NodeReport};

pub use mesh_core::{ChatMessage, MessageId, NodeId, VectorClock, WireRecord};
pub use mesh_delivery::{BufferReport, ChatLog, EngineStats, Topology};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{NodeConfig, NodeConfigBuilder};
    pub use crate::error::SdkError;
    pub use crate::network::{LinkTransport, MemoryTransport};
    pub use crate::node::{ChatNode, NodeEvent};
    pub use crate::quick::spawn_mesh;
}
