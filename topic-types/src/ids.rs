//! Identity and ordering types for topic-sync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses one logical server-side stream.
///
/// A compound key of category and key, both opaque strings. Equality is
/// structural: two ids with the same category and key address the same
/// topic regardless of how they were constructed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    /// Namespace for the key (e.g. a feature or extension name).
    pub category: String,
    /// Identifies one stream within the category.
    pub key: String,
}

impl TopicId {
    /// Create a new TopicId from a category and key.
    pub fn new(category: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.key)
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({}/{})", self.category, self.key)
    }
}

/// A per-topic, strictly increasing sequence number.
///
/// Plays both the `messageId` role (tagging one delivered update) and the
/// `counter` role (the sequence number as of which a snapshot is valid).
/// Sequence numbers are only comparable within a single topic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SeqNo(u64);

impl SeqNo {
    /// Create a new SeqNo with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this SeqNo.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// A SeqNo representing "before any update".
    pub fn zero() -> Self {
        Self(0)
    }

    /// The next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNo({})", self.0)
    }
}

/// A unique identifier for one subscription activation.
///
/// Generated fresh each time a subscription is opened, so that no two
/// activations share an identity token. A close issued against an old
/// activation can then never affect a newer one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    /// Create a new random SubscriptionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}
