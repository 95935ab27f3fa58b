//! Logical message shapes for topic-sync.
//!
//! No byte-level wire format is fixed here. Frames arrive from the channel
//! as structured JSON values and stay untyped until they are validated
//! against the caller's expected output shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SeqNo, TopicError};

/// The frame kind carrying method output on the channel.
///
/// Frames with any other kind are control traffic and are ignored by the
/// reconciliation layer.
pub const METHOD_OUTPUT: &str = "methodOutput";

/// A raw unit delivered by the channel adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    /// Frame discriminator; only [`METHOD_OUTPUT`] frames carry updates.
    pub kind: String,
    /// The frame payload, untyped until validated.
    pub data: Value,
}

impl ChannelFrame {
    /// Wrap a payload in a method-output frame.
    pub fn method_output(data: Value) -> Self {
        Self {
            kind: METHOD_OUTPUT.to_string(),
            data,
        }
    }

    /// Whether this frame carries method output.
    pub fn is_method_output(&self) -> bool {
        self.kind == METHOD_OUTPUT
    }
}

/// Discriminator for a topic frame.
///
/// The server does not send a kind on ordinary updates; it marks frames
/// that carry a full authoritative state so the client can re-settle from
/// them instead of reducing them incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// The frame's data is a full authoritative state.
    State,
    /// The frame's data is an ordinary incremental update.
    User,
}

/// One delivered update for a topic, tagged with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicFrame {
    /// Optional discriminator; absent means an ordinary update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FrameKind>,
    /// Per-topic sequence number of this update.
    pub message_id: SeqNo,
    /// The update payload, untyped until validated.
    pub data: Value,
}

impl TopicFrame {
    /// Create an ordinary update frame.
    pub fn update(message_id: SeqNo, data: Value) -> Self {
        Self {
            kind: None,
            message_id,
            data,
        }
    }

    /// Create a server-pushed state frame.
    pub fn state(message_id: SeqNo, data: Value) -> Self {
        Self {
            kind: Some(FrameKind::State),
            message_id,
            data,
        }
    }

    /// Whether this frame carries a full authoritative state.
    pub fn is_state(&self) -> bool {
        self.kind == Some(FrameKind::State)
    }

    /// Parse a topic frame out of raw channel payload data.
    pub fn from_value(value: Value) -> Result<Self, TopicError> {
        serde_json::from_value(value).map_err(TopicError::InvalidFrame)
    }
}

/// A point-in-time authoritative value for a topic.
///
/// `counter` is the sequence number as of which `state` is valid; updates
/// with `message_id <= counter` are already represented in `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    /// The authoritative state.
    pub state: S,
    /// Sequence number as of which the state is valid.
    pub counter: SeqNo,
}

impl<S> Snapshot<S> {
    /// Create a new snapshot.
    pub fn new(state: S, counter: SeqNo) -> Self {
        Self { state, counter }
    }
}
