//! Mesh Core - data model for causal broadcast chat
//!
//! This crate holds the state a node keeps to deliver flooded chat messages
//! in causal order:
//!
//! - [`clock::VectorClock`]: delivered-count per node (the clock store)
//! - [`dedup::DedupSet`]: ids already seen, which terminates flooding
//! - [`reorder::ReorderBuffer`]: messages waiting for their predecessors
//! - [`message::WireRecord`]: the JSON records exchanged over peer links
//!
//! The state machine that drives these lives in `mesh-delivery`.

pub mod clock;
pub mod dedup;
pub mod error;
pub mod message;
pub mod node;
pub mod reorder;

pub use clock::{ClockEntry, VectorClock};
pub use dedup::DedupSet;
pub use error::CodecError;
pub use message::{ChatMessage, WireRecord};
pub use node::{MessageId, NodeId, SeqNo};
pub use reorder::ReorderBuffer;
