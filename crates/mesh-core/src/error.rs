//! Error types for the wire codec.

use thiserror::Error;

/// Errors raised while decoding a record received on a peer link.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message from {0} carries sequence 0")]
    ZeroSequence(String),

    #[error("Message {author}#{id} lists its author at count {own}")]
    InconsistentDependencies { author: String, id: u64, own: u64 },
}
