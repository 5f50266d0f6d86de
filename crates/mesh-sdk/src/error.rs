//! Error types for the mesh SDK.

use mesh_core::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a link transport.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link not found: {0}")]
    LinkNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport events were already taken by another subscriber")]
    AlreadySubscribed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// The node task is gone; its mailbox no longer accepts commands.
    #[error("Node {0} has stopped")]
    NodeStopped(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Node task failed: {0}")]
    TaskFailed(String),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
