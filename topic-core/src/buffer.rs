//! Frame buffer for the pre-settle phase.
//!
//! Before a snapshot resolves there is no authoritative base state to
//! reduce onto, so every observed frame is held verbatim. The buffer:
//! - preserves arrival order (the tiebreak for equal sequence numbers)
//! - is bounded, so a stalled snapshot fetch cannot grow memory forever
//! - replays frames in ascending sequence order once a base arrives

use std::collections::VecDeque;
use topic_types::{SeqNo, TopicFrame};

/// Default number of frames held while waiting for a snapshot.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Arrival-ordered, bounded buffer of unreduced frames.
///
/// On overflow the oldest frame is evicted: the snapshot being waited on
/// is expected to already represent the oldest traffic.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    capacity: usize,
    frames: VecDeque<TopicFrame>,
}

impl FrameBuffer {
    /// Create a buffer with the given capacity.
    ///
    /// A capacity of zero buffers nothing; every pushed frame is evicted
    /// straight back to the caller.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::new(),
        }
    }

    /// Append a frame in arrival order.
    ///
    /// Returns the evicted oldest frame if the buffer was at capacity.
    pub fn push(&mut self, frame: TopicFrame) -> Option<TopicFrame> {
        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Drain frames newer than `counter`, sorted ascending by sequence
    /// number.
    ///
    /// The sort is stable, so frames sharing a sequence number replay in
    /// arrival order. Frames at or below `counter` are discarded: they are
    /// already represented in the snapshot being folded onto.
    pub fn drain_after(&mut self, counter: SeqNo) -> Vec<TopicFrame> {
        let mut frames: Vec<TopicFrame> = self
            .frames
            .drain(..)
            .filter(|frame| frame.message_id > counter)
            .collect();
        frames.sort_by_key(|frame| frame.message_id);
        frames
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
