//! Mesh Delivery - causal broadcast over a flooded mesh
//!
//! This crate implements the delivery side of Carnelia Mesh:
//! - [`engine::DeliveryEngine`]: dedup, forward decision, reorder buffer and
//!   the fixed-point delivery scan
//! - [`sink::ChatLog`]: append-only log of delivered entries
//! - [`stats`]: counters and buffer age for stall detection
//! - [`simulator::FloodCluster`]: deterministic multi-node network for tests
//!
//! # Guarantees
//!
//! - **Causal order**: if the author of `b` had delivered `a` before sending
//!   `b`, every node delivers `a` before `b`
//! - **At most once**: a message id is delivered at most once per node, no
//!   matter how many flooded paths bring it in
//! - **Flood termination**: a record already seen is never forwarded again
//!
//! # Example
//!
//! ```rust
//! use mesh_delivery::engine::DeliveryEngine;
//!
//! let mut alice = DeliveryEngine::new("alice");
//! let mut bob = DeliveryEngine::new("bob");
//!
//! let first = alice.submit("hi bob").message;
//! let second = alice.submit("are you there?").message;
//!
//! // The second message overtakes the first on the way to bob.
//! assert!(bob.receive(second).delivered().is_empty());
//! let receipt = bob.receive(first);
//! assert_eq!(receipt.delivered().len(), 2);
//! ```

pub mod engine;
pub mod simulator;
pub mod sink;
pub mod stats;

pub use engine::{DeliveryEngine, Receipt, Submitted};
pub use simulator::{FloodCluster, NetworkConfig, NetworkSimulator, Topology};
pub use sink::{ApplicationSink, ChatLog};
pub use stats::{BufferReport, EngineStats};
