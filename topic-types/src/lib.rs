//! # topic-types
//!
//! Shared types for the topic-sync client stack.
//!
//! This crate provides the foundational types used across all topic-sync
//! crates:
//! - [`TopicId`], [`SeqNo`], [`SubscriptionId`] - Identity and ordering types
//! - [`ChannelFrame`], [`TopicFrame`], [`Snapshot`] - Logical message shapes
//! - [`TopicError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;

pub use error::TopicError;
pub use frames::{ChannelFrame, FrameKind, Snapshot, TopicFrame, METHOD_OUTPUT};
pub use ids::{SeqNo, SubscriptionId, TopicId};
