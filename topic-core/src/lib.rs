//! # topic-core
//!
//! Pure reconciliation logic for topic-sync (no I/O, instant tests).
//!
//! This crate implements the state machine that merges a point-in-time
//! snapshot with an unordered live update stream into a single consistent,
//! monotonically-advancing value.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce
//! output without side effects beyond diagnostics. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same events in the same order → same state)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (channel subscription, snapshot fetch) is performed by
//! `topic-client`, which feeds events into these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod engine;

pub use buffer::{FrameBuffer, DEFAULT_BUFFER_CAPACITY};
pub use engine::{ReconcileState, TopicEngine, TopicEvent};
