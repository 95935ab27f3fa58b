//! Snapshot/stream reconciliation state machine.
//!
//! The engine merges two independently completing inputs into one value:
//! a point-in-time snapshot (fetched on demand) and a live update stream
//! (delivered in unpredictable order relative to the snapshot). Updates
//! observed before the snapshot resolves are buffered verbatim; once a
//! base state exists they are replayed in sequence order, skipping any
//! already represented in the snapshot.
//!
//! Key invariants:
//! - The settled counter never decreases for one subscription instance.
//! - A frame at or below the settled counter is never applied again.
//! - The settled state depends only on the set of sequence numbers folded
//!   in, never on their arrival order.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use topic_types::{SeqNo, TopicError, TopicFrame};

use crate::buffer::{FrameBuffer, DEFAULT_BUFFER_CAPACITY};

/// The two kinds of events that drive reconciliation.
#[derive(Debug, Clone)]
pub enum TopicEvent<S> {
    /// A snapshot resolved, from a fetch or a server-pushed state frame.
    Snapshot {
        /// The authoritative state.
        state: S,
        /// Sequence number as of which the state is valid.
        counter: SeqNo,
    },
    /// An update frame arrived from the channel.
    Frame(TopicFrame),
}

/// Reconciliation state for one topic subscription instance.
///
/// Exactly one of two variants: either no authoritative base exists yet
/// and frames are buffered unreduced, or a base has been established and
/// every further update is folded in incrementally.
#[derive(Debug, Clone)]
pub enum ReconcileState<S> {
    /// No authoritative state yet; observed frames are buffered verbatim.
    Empty {
        /// Frames seen while waiting for a snapshot.
        seen: FrameBuffer,
    },
    /// An authoritative state exists as of `counter`.
    Settled {
        /// Sequence number of the last folded-in update.
        counter: SeqNo,
        /// The fully reduced application value.
        state: S,
    },
}

impl<S> ReconcileState<S> {
    /// Create the initial empty state with the given buffer capacity.
    pub fn new(buffer_capacity: usize) -> Self {
        Self::Empty {
            seen: FrameBuffer::new(buffer_capacity),
        }
    }

    /// The settled value, if one exists.
    pub fn value(&self) -> Option<&S> {
        match self {
            Self::Empty { .. } => None,
            Self::Settled { state, .. } => Some(state),
        }
    }

    /// The settled counter, if one exists.
    pub fn counter(&self) -> Option<SeqNo> {
        match self {
            Self::Empty { .. } => None,
            Self::Settled { counter, .. } => Some(*counter),
        }
    }

    /// Whether an authoritative state has been established.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled { .. })
    }
}

impl<S> Default for ReconcileState<S> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl<S> ReconcileState<S>
where
    S: DeserializeOwned,
{
    /// Process one event and return the next state.
    ///
    /// Every transition runs to completion synchronously. Anomalies
    /// (malformed payloads, stale snapshots) are absorbed here with a
    /// diagnostic; they never escape as errors.
    pub fn apply<O, R>(self, event: TopicEvent<S>, reducer: &R) -> Self
    where
        O: DeserializeOwned,
        R: Fn(S, O) -> S,
    {
        match event {
            TopicEvent::Snapshot { state, counter } => self.settle(state, counter, reducer),
            TopicEvent::Frame(frame) if frame.is_state() => {
                // A server-pushed state frame is a snapshot delivered over
                // the stream; it re-enters the settle path.
                match serde_json::from_value::<S>(frame.data) {
                    Ok(state) => self.settle(state, frame.message_id, reducer),
                    Err(err) => {
                        tracing::warn!(
                            message_id = %frame.message_id,
                            error = %err,
                            "dropping undecodable state frame"
                        );
                        self
                    }
                }
            }
            TopicEvent::Frame(frame) => match self {
                Self::Empty { mut seen } => {
                    // No base to reduce onto yet; hold the frame verbatim.
                    if let Some(evicted) = seen.push(frame) {
                        tracing::warn!(
                            message_id = %evicted.message_id,
                            capacity = seen.capacity(),
                            "frame buffer full, evicting oldest frame"
                        );
                    }
                    Self::Empty { seen }
                }
                Self::Settled { counter, state } => {
                    if frame.message_id <= counter {
                        tracing::debug!(
                            message_id = %frame.message_id,
                            %counter,
                            "ignoring already-applied frame"
                        );
                        return Self::Settled { counter, state };
                    }
                    match decode_output::<O>(frame.data) {
                        Ok(output) => Self::Settled {
                            counter: frame.message_id,
                            state: reducer(state, output),
                        },
                        Err(err) => {
                            tracing::warn!(
                                message_id = %frame.message_id,
                                error = %err,
                                "dropping malformed update frame"
                            );
                            Self::Settled { counter, state }
                        }
                    }
                }
            },
        }
    }

    /// Establish `state0` as the authoritative base as of `counter0`.
    ///
    /// Current state wins ties and anything fresher, so a late-arriving
    /// slow fetch can never overwrite state already advanced by live
    /// updates.
    fn settle<O, R>(self, state0: S, counter0: SeqNo, reducer: &R) -> Self
    where
        O: DeserializeOwned,
        R: Fn(S, O) -> S,
    {
        match self {
            Self::Settled { counter, state } if counter >= counter0 => {
                tracing::debug!(
                    stale = %counter0,
                    current = %counter,
                    "discarding stale snapshot"
                );
                Self::Settled { counter, state }
            }
            Self::Settled { .. } => Self::Settled {
                counter: counter0,
                state: state0,
            },
            Self::Empty { mut seen } => {
                let mut state = state0;
                for frame in seen.drain_after(counter0) {
                    let message_id = frame.message_id;
                    match decode_output::<O>(frame.data) {
                        Ok(output) => state = reducer(state, output),
                        Err(err) => {
                            tracing::warn!(
                                %message_id,
                                error = %err,
                                "dropping malformed buffered frame"
                            );
                        }
                    }
                }
                Self::Settled {
                    counter: counter0,
                    state,
                }
            }
        }
    }
}

fn decode_output<O: DeserializeOwned>(value: Value) -> Result<O, TopicError> {
    serde_json::from_value(value).map_err(TopicError::InvalidPayload)
}

/// Imperative wrapper around [`ReconcileState`].
///
/// Owns the state and the reducer, fixed for the lifetime of one engine
/// instance. The engine is the single writer of its state: all events go
/// through [`TopicEngine::handle_event`].
#[derive(Debug)]
pub struct TopicEngine<S, O, R> {
    state: ReconcileState<S>,
    reducer: R,
    _output: PhantomData<fn() -> O>,
}

impl<S, O, R> TopicEngine<S, O, R>
where
    S: DeserializeOwned,
    O: DeserializeOwned,
    R: Fn(S, O) -> S,
{
    /// Create an engine with the default buffer capacity.
    pub fn new(reducer: R) -> Self {
        Self::with_capacity(reducer, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create an engine with an explicit pre-settle buffer capacity.
    pub fn with_capacity(reducer: R, buffer_capacity: usize) -> Self {
        Self {
            state: ReconcileState::new(buffer_capacity),
            reducer,
            _output: PhantomData,
        }
    }

    /// Feed one event through the state machine.
    pub fn handle_event(&mut self, event: TopicEvent<S>) {
        let current = std::mem::replace(&mut self.state, ReconcileState::new(0));
        self.state = current.apply::<O, _>(event, &self.reducer);
    }

    /// Feed a resolved snapshot.
    pub fn handle_snapshot(&mut self, state: S, counter: SeqNo) {
        self.handle_event(TopicEvent::Snapshot { state, counter });
    }

    /// Feed an arriving update frame.
    pub fn handle_frame(&mut self, frame: TopicFrame) {
        self.handle_event(TopicEvent::Frame(frame));
    }

    /// The current reconciliation state.
    pub fn state(&self) -> &ReconcileState<S> {
        &self.state
    }

    /// The settled value, if one exists.
    pub fn value(&self) -> Option<&S> {
        self.state.value()
    }

    /// The settled counter, if one exists.
    pub fn counter(&self) -> Option<SeqNo> {
        self.state.counter()
    }

    /// Whether an authoritative state has been established.
    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Engine = TopicEngine<Vec<u64>, u64, fn(Vec<u64>, u64) -> Vec<u64>>;

    fn append(mut state: Vec<u64>, output: u64) -> Vec<u64> {
        state.push(output);
        state
    }

    fn engine() -> Engine {
        TopicEngine::new(append)
    }

    fn frame(id: u64) -> TopicFrame {
        TopicFrame::update(SeqNo::new(id), json!(id))
    }

    #[test]
    fn starts_empty() {
        let engine = engine();
        assert!(!engine.is_settled());
        assert!(engine.value().is_none());
        assert!(engine.counter().is_none());
    }

    #[test]
    fn frames_before_snapshot_are_buffered_not_reduced() {
        let mut engine = engine();
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(2));

        assert!(!engine.is_settled());
        assert!(engine.value().is_none());
    }

    #[test]
    fn snapshot_folds_buffered_frames_in_sequence_order() {
        let mut engine = engine();
        engine.handle_frame(frame(3));
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(2));

        engine.handle_snapshot(vec![], SeqNo::zero());

        assert_eq!(engine.value(), Some(&vec![1, 2, 3]));
        assert_eq!(engine.counter(), Some(SeqNo::zero()));
    }

    #[test]
    fn snapshot_discards_frames_it_already_represents() {
        let mut engine = engine();
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(2));
        engine.handle_frame(frame(3));

        engine.handle_snapshot(vec![100], SeqNo::new(2));

        assert_eq!(engine.value(), Some(&vec![100, 3]));
    }

    #[test]
    fn final_state_is_independent_of_arrival_order() {
        let reference = {
            let mut engine = engine();
            for id in 1..=5 {
                engine.handle_frame(frame(id));
            }
            engine.handle_snapshot(vec![], SeqNo::zero());
            engine.value().cloned().unwrap()
        };

        let mut ids = [1u64, 2, 3, 4, 5];
        permute(&mut ids, 5, &mut |order| {
            let mut engine = engine();
            for &id in order {
                engine.handle_frame(frame(id));
            }
            engine.handle_snapshot(vec![], SeqNo::zero());
            assert_eq!(
                engine.value(),
                Some(&reference),
                "arrival order {:?} changed the settled state",
                order
            );
        });
    }

    // Heap's algorithm; runs the check on every permutation of the slice.
    fn permute(ids: &mut [u64], k: usize, check: &mut impl FnMut(&[u64])) {
        if k <= 1 {
            check(ids);
            return;
        }
        for i in 0..k {
            permute(ids, k - 1, check);
            if k % 2 == 0 {
                ids.swap(i, k - 1);
            } else {
                ids.swap(0, k - 1);
            }
        }
    }

    #[test]
    fn redelivered_frame_is_not_applied_twice() {
        let mut engine = engine();
        engine.handle_snapshot(vec![], SeqNo::zero());
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(2));
        engine.handle_frame(frame(3));
        let settled = engine.value().cloned().unwrap();

        engine.handle_frame(frame(2));

        assert_eq!(engine.value(), Some(&settled));
        assert_eq!(engine.counter(), Some(SeqNo::new(3)));
    }

    #[test]
    fn live_update_advances_counter_to_its_message_id() {
        let mut engine = engine();
        engine.handle_snapshot(vec![], SeqNo::new(4));
        engine.handle_frame(frame(9));

        assert_eq!(engine.counter(), Some(SeqNo::new(9)));
        assert_eq!(engine.value(), Some(&vec![9]));
    }

    #[test]
    fn slow_snapshot_cannot_regress_a_settled_state() {
        let mut engine = engine();
        engine.handle_snapshot(vec![], SeqNo::zero());
        for id in 1..=10 {
            engine.handle_frame(frame(id));
        }
        let advanced = engine.value().cloned().unwrap();

        engine.handle_snapshot(vec![999], SeqNo::new(5));

        assert_eq!(engine.value(), Some(&advanced));
        assert_eq!(engine.counter(), Some(SeqNo::new(10)));
    }

    #[test]
    fn equal_counter_snapshot_loses_the_tie() {
        let mut engine = engine();
        engine.handle_snapshot(vec![1], SeqNo::new(3));
        engine.handle_snapshot(vec![2], SeqNo::new(3));

        assert_eq!(engine.value(), Some(&vec![1]));
    }

    #[test]
    fn fresher_snapshot_replaces_a_settled_state() {
        let mut engine = engine();
        engine.handle_snapshot(vec![1], SeqNo::new(3));
        engine.handle_snapshot(vec![2], SeqNo::new(7));

        assert_eq!(engine.value(), Some(&vec![2]));
        assert_eq!(engine.counter(), Some(SeqNo::new(7)));
    }

    #[test]
    fn malformed_live_frame_does_not_corrupt_or_halt() {
        let mut engine = engine();
        engine.handle_snapshot(vec![], SeqNo::zero());
        engine.handle_frame(frame(1));
        engine.handle_frame(TopicFrame::update(SeqNo::new(2), json!("not a number")));
        engine.handle_frame(frame(3));

        assert_eq!(engine.value(), Some(&vec![1, 3]));
        assert_eq!(engine.counter(), Some(SeqNo::new(3)));
    }

    #[test]
    fn malformed_buffered_frame_is_skipped_on_settle() {
        let mut engine = engine();
        engine.handle_frame(frame(1));
        engine.handle_frame(TopicFrame::update(SeqNo::new(2), json!({ "bad": true })));
        engine.handle_frame(frame(3));

        engine.handle_snapshot(vec![], SeqNo::zero());

        assert_eq!(engine.value(), Some(&vec![1, 3]));
    }

    #[test]
    fn state_frame_settles_an_empty_engine() {
        let mut engine = engine();
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(3));

        engine.handle_frame(TopicFrame::state(SeqNo::new(2), json!([50])));

        // Buffered frame 1 is covered by the pushed state; 3 folds in.
        assert_eq!(engine.value(), Some(&vec![50, 3]));
        assert_eq!(engine.counter(), Some(SeqNo::new(2)));
    }

    #[test]
    fn state_frame_resettles_past_the_current_counter() {
        let mut engine = engine();
        engine.handle_snapshot(vec![1], SeqNo::new(2));

        engine.handle_frame(TopicFrame::state(SeqNo::new(7), json!([10, 20])));

        assert_eq!(engine.value(), Some(&vec![10, 20]));
        assert_eq!(engine.counter(), Some(SeqNo::new(7)));
    }

    #[test]
    fn stale_state_frame_is_discarded() {
        let mut engine = engine();
        engine.handle_snapshot(vec![1], SeqNo::new(9));

        engine.handle_frame(TopicFrame::state(SeqNo::new(4), json!([10, 20])));

        assert_eq!(engine.value(), Some(&vec![1]));
        assert_eq!(engine.counter(), Some(SeqNo::new(9)));
    }

    #[test]
    fn undecodable_state_frame_is_dropped() {
        let mut engine = engine();
        engine.handle_frame(TopicFrame::state(SeqNo::new(2), json!("not a vec")));

        assert!(!engine.is_settled());
    }

    #[test]
    fn buffer_eviction_drops_the_oldest_frame() {
        let mut engine: TopicEngine<Vec<u64>, u64, _> =
            TopicEngine::with_capacity(append as fn(Vec<u64>, u64) -> Vec<u64>, 1);
        engine.handle_frame(frame(1));
        engine.handle_frame(frame(2));

        engine.handle_snapshot(vec![], SeqNo::zero());

        assert_eq!(engine.value(), Some(&vec![2]));
    }
}
