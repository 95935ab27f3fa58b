//! Error types for the subscription client.
//!
//! Only channel-layer and fetch-layer failures surface to the caller;
//! reconciliation anomalies (malformed frames, stale snapshots) are
//! absorbed inside the engine with a diagnostic.

use thiserror::Error;

/// Channel adapter errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Opening the logical subscription failed.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// The subscription could not be started.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    Recv(String),
}

/// A snapshot fetch failed.
///
/// The engine does not retry internally; retry policy belongs to the
/// caller.
#[derive(Debug, Error)]
#[error("snapshot fetch failed: {0}")]
pub struct FetchError(String);

impl FetchError {
    /// Create a fetch error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A fault surfaced on a subscription alongside its current value.
///
/// Faults do not tear the subscription down; the caller decides whether
/// to re-activate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFault {
    /// The channel reported an error.
    #[error("channel fault: {0}")]
    Channel(String),

    /// The snapshot fetch for this activation failed.
    #[error("snapshot fetch fault: {0}")]
    Fetch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_display() {
        let err = ChannelError::OpenFailed("no route".into());
        assert_eq!(err.to_string(), "open failed: no route");
    }

    #[test]
    fn fetch_error_display() {
        let err = FetchError::new("backend down");
        assert_eq!(err.to_string(), "snapshot fetch failed: backend down");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChannelError>();
        assert_send_sync::<FetchError>();
        assert_send_sync::<StreamFault>();
    }
}
