//! Error types for topic-sync.

use thiserror::Error;

/// Errors that can occur when interpreting topic data.
#[derive(Debug, Error)]
pub enum TopicError {
    /// A channel payload did not match the topic frame shape.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    /// A payload did not match the expected output shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}
