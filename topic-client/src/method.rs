//! Generic single-topic subscription primitive.
//!
//! Wraps one channel subscription plus a reducer-driven value store. One
//! tokio task per activation owns the reducer state; channel frames and
//! synthetically dispatched events feed it through a single serialized
//! event queue, so the state has exactly one writer. The reduced value is
//! published through a `watch` channel.
//!
//! Teardown drops the event queue's receiving side together with the
//! task, so anything that resolves late (a slow snapshot fetch, a straggling
//! dispatch) targets a closed queue and is structurally ignored - there is
//! no "is this activation still current" flag to forget to check.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use topic_types::{SubscriptionId, TopicError};

use crate::channel::{Channel, ChannelHandle};
use crate::error::StreamFault;

/// Validates raw frame data into a dispatch event.
pub type DecodeFn<D> = Box<dyn Fn(Value) -> Result<D, TopicError> + Send>;
/// Folds one dispatch event into the reducer state.
pub type ReduceFn<St, D> = Box<dyn FnMut(St, D) -> St + Send>;
/// Invoked once the subscription is acknowledged as live.
pub type ConnectFn<D> = Box<dyn FnOnce(Dispatcher<D>) + Send>;

/// Configuration for one subscription activation.
pub struct StreamOptions<St, D> {
    /// Method name of the logical subscription.
    pub method: String,
    /// Initial payload passed to `start()`.
    pub payload: Value,
    /// Initial reducer state.
    pub initial: St,
    /// Turns validated frame data into dispatch events.
    pub decode: DecodeFn<D>,
    /// The reducer, fixed for the lifetime of this activation.
    pub reduce: ReduceFn<St, D>,
    /// Fired once `start()` is acknowledged; receives a dispatcher for
    /// feeding asynchronously produced events back in.
    pub on_connect: Option<ConnectFn<D>>,
}

enum StreamEvent<D> {
    Dispatch(D),
    Fault(StreamFault),
}

/// Feeds synthetically constructed events into a subscription's queue.
///
/// Cheap to clone; sends against a torn-down activation are silently
/// dropped.
pub struct Dispatcher<D> {
    tx: mpsc::UnboundedSender<StreamEvent<D>>,
}

impl<D> Clone for Dispatcher<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<D> Dispatcher<D> {
    /// Dispatch an event into the reducer.
    pub fn dispatch(&self, event: D) {
        let _ = self.tx.send(StreamEvent::Dispatch(event));
    }

    /// Surface a fault on the subscription without touching its state.
    pub fn report(&self, fault: StreamFault) {
        let _ = self.tx.send(StreamEvent::Fault(fault));
    }
}

/// Handle to one running subscription activation.
///
/// Dropping the handle tears the activation down.
pub struct StreamHandle<St, D> {
    id: SubscriptionId,
    state_rx: watch::Receiver<St>,
    fault_rx: watch::Receiver<Option<StreamFault>>,
    dispatcher: Dispatcher<D>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<St, D> StreamHandle<St, D>
where
    St: Clone + Send + Sync + 'static,
    D: Send + 'static,
{
    /// Spawn a new activation.
    ///
    /// A fresh [`SubscriptionId`] is generated here; no two activations
    /// ever share one.
    pub fn spawn<C>(channel: C, options: StreamOptions<St, D>) -> Self
    where
        C: Channel + 'static,
    {
        let id = SubscriptionId::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(options.initial.clone());
        let (fault_tx, fault_rx) = watch::channel(None);
        let shutdown = Arc::new(Notify::new());
        let dispatcher = Dispatcher { tx: event_tx };

        let worker = StreamWorker {
            channel,
            id,
            options,
            dispatcher: dispatcher.clone(),
            events: event_rx,
            state_tx,
            fault_tx,
            shutdown: Arc::clone(&shutdown),
        };
        let task = tokio::spawn(worker.run());

        Self {
            id,
            state_rx,
            fault_rx,
            dispatcher,
            shutdown,
            task,
        }
    }
}

impl<St, D> StreamHandle<St, D> {
    /// This activation's identity token.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The current reducer state.
    pub fn current(&self) -> St
    where
        St: Clone,
    {
        self.state_rx.borrow().clone()
    }

    /// A watch receiver over the reducer state.
    pub fn subscribe(&self) -> watch::Receiver<St> {
        self.state_rx.clone()
    }

    /// Wait for the next state change.
    ///
    /// Returns `false` once the activation has been torn down.
    pub async fn changed(&mut self) -> bool {
        self.state_rx.changed().await.is_ok()
    }

    /// The most recent fault, if any.
    pub fn fault(&self) -> Option<StreamFault> {
        self.fault_rx.borrow().clone()
    }

    /// A watch receiver over surfaced faults.
    pub fn faults(&self) -> watch::Receiver<Option<StreamFault>> {
        self.fault_rx.clone()
    }

    /// A dispatcher for feeding synthetic events into this activation.
    pub fn dispatcher(&self) -> Dispatcher<D> {
        self.dispatcher.clone()
    }

    /// Dispatch one synthetic event.
    pub fn dispatch(&self, event: D) {
        self.dispatcher.dispatch(event);
    }

    /// Trigger teardown without waiting for it to complete.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Whether the activation's task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the activation down and wait for the channel to be closed.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        let _ = (&mut self.task).await;
    }
}

impl<St, D> Drop for StreamHandle<St, D> {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

struct StreamWorker<C, St, D> {
    channel: C,
    id: SubscriptionId,
    options: StreamOptions<St, D>,
    dispatcher: Dispatcher<D>,
    events: mpsc::UnboundedReceiver<StreamEvent<D>>,
    state_tx: watch::Sender<St>,
    fault_tx: watch::Sender<Option<StreamFault>>,
    shutdown: Arc<Notify>,
}

impl<C, St, D> StreamWorker<C, St, D>
where
    C: Channel,
    St: Clone,
{
    async fn run(mut self) {
        let mut handle = match self.channel.open(&self.options.method, self.id).await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(stream = %self.id, error = %err, "failed to open subscription");
                let _ = self.fault_tx.send(Some(StreamFault::Channel(err.to_string())));
                return;
            }
        };

        match handle.start(self.options.payload.clone()).await {
            Ok(()) => {
                tracing::debug!(
                    stream = %self.id,
                    method = %self.options.method,
                    "subscription live"
                );
                if let Some(on_connect) = self.options.on_connect.take() {
                    on_connect(self.dispatcher.clone());
                }
            }
            Err(err) => {
                tracing::warn!(stream = %self.id, error = %err, "failed to start subscription");
                let _ = self.fault_tx.send(Some(StreamFault::Channel(err.to_string())));
                handle.close().await;
                return;
            }
        }

        let StreamOptions {
            initial,
            decode,
            mut reduce,
            ..
        } = self.options;
        let mut state = initial;
        let mut channel_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                event = self.events.recv() => match event {
                    Some(StreamEvent::Dispatch(event)) => {
                        state = reduce(state, event);
                        let _ = self.state_tx.send(state.clone());
                    }
                    Some(StreamEvent::Fault(fault)) => {
                        let _ = self.fault_tx.send(Some(fault));
                    }
                    None => break,
                },
                frame = handle.recv(), if channel_open => match frame {
                    Ok(frame) => {
                        if !frame.is_method_output() {
                            continue;
                        }
                        match (decode)(frame.data) {
                            Ok(event) => {
                                state = reduce(state, event);
                                let _ = self.state_tx.send(state.clone());
                            }
                            Err(err) => {
                                tracing::warn!(
                                    stream = %self.id,
                                    error = %err,
                                    "dropping malformed frame"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(stream = %self.id, error = %err, "channel error");
                        let _ = self.fault_tx.send(Some(StreamFault::Channel(err.to_string())));
                        channel_open = false;
                    }
                },
            }
        }

        handle.close().await;
        tracing::debug!(stream = %self.id, "subscription torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::error::ChannelError;
    use serde_json::json;
    use std::time::Duration;
    use topic_types::ChannelFrame;

    fn options(on_connect: Option<ConnectFn<u64>>) -> StreamOptions<Vec<u64>, u64> {
        StreamOptions {
            method: "CountThings".into(),
            payload: json!({ "id": "counter" }),
            initial: Vec::new(),
            decode: Box::new(|value| {
                serde_json::from_value(value).map_err(TopicError::InvalidPayload)
            }),
            reduce: Box::new(|mut state, event| {
                state.push(event);
                state
            }),
            on_connect,
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn frames_flow_into_the_watched_state() {
        let channel = MockChannel::new();
        channel.queue_frame(ChannelFrame::method_output(json!(1)));
        channel.queue_frame(ChannelFrame::method_output(json!(2)));

        let handle = StreamHandle::spawn(channel.clone(), options(None));

        wait_until(|| handle.current() == vec![1, 2]).await;
        assert_eq!(channel.start_payloads(), vec![json!({ "id": "counter" })]);
    }

    #[tokio::test]
    async fn non_method_output_frames_are_ignored() {
        let channel = MockChannel::new();
        channel.queue_frame(ChannelFrame {
            kind: "methodInput".into(),
            data: json!(99),
        });
        channel.queue_frame(ChannelFrame::method_output(json!(1)));

        let handle = StreamHandle::spawn(channel, options(None));

        wait_until(|| handle.current() == vec![1]).await;
    }

    #[tokio::test]
    async fn malformed_frame_does_not_halt_the_stream() {
        let channel = MockChannel::new();
        channel.queue_frame(ChannelFrame::method_output(json!("not a number")));
        channel.queue_frame(ChannelFrame::method_output(json!(2)));

        let handle = StreamHandle::spawn(channel, options(None));

        wait_until(|| handle.current() == vec![2]).await;
        assert!(handle.fault().is_none());
    }

    #[tokio::test]
    async fn dispatch_feeds_synthetic_events() {
        let channel = MockChannel::new();
        let handle = StreamHandle::spawn(channel, options(None));

        handle.dispatch(7);

        wait_until(|| handle.current() == vec![7]).await;
    }

    #[tokio::test]
    async fn on_connect_fires_only_after_start_acknowledgement() {
        let channel = MockChannel::new();
        channel.hold_start();

        let handle = StreamHandle::spawn(
            channel.clone(),
            options(Some(Box::new(|dispatcher: Dispatcher<u64>| {
                dispatcher.dispatch(7);
            }))),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.current().is_empty());

        channel.release_start();
        wait_until(|| handle.current() == vec![7]).await;
    }

    #[tokio::test]
    async fn channel_error_surfaces_without_clearing_state() {
        let channel = MockChannel::new();
        channel.queue_frame(ChannelFrame::method_output(json!(1)));

        let handle = StreamHandle::spawn(channel.clone(), options(None));
        wait_until(|| handle.current() == vec![1]).await;

        channel.fail_next_recv("connection reset");
        wait_until(|| handle.fault().is_some()).await;

        assert!(matches!(handle.fault(), Some(StreamFault::Channel(_))));
        assert_eq!(handle.current(), vec![1]);

        // Dispatch keeps working after a channel fault.
        handle.dispatch(2);
        wait_until(|| handle.current() == vec![1, 2]).await;
    }

    #[tokio::test]
    async fn open_failure_surfaces_a_fault() {
        let channel = MockChannel::new();
        channel.fail_next_open("no route");

        let handle: StreamHandle<Vec<u64>, u64> = StreamHandle::spawn(channel, options(None));

        wait_until(|| handle.is_finished()).await;
        assert!(matches!(handle.fault(), Some(StreamFault::Channel(_))));
    }

    #[tokio::test]
    async fn start_failure_closes_the_channel() {
        let channel = MockChannel::new();
        channel.fail_next_start("rejected");

        let handle: StreamHandle<Vec<u64>, u64> =
            StreamHandle::spawn(channel.clone(), options(None));

        wait_until(|| handle.is_finished()).await;
        assert!(matches!(handle.fault(), Some(StreamFault::Channel(_))));
        assert_eq!(channel.closed_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_the_channel_subscription() {
        let channel = MockChannel::new();
        let handle: StreamHandle<Vec<u64>, u64> =
            StreamHandle::spawn(channel.clone(), options(None));

        // Let the activation reach its event loop before tearing down.
        channel.queue_frame(ChannelFrame::method_output(json!(1)));
        wait_until(|| handle.current() == vec![1]).await;

        handle.shutdown().await;
        assert_eq!(channel.closed_count(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_tears_the_activation_down() {
        let channel = MockChannel::new();
        let handle: StreamHandle<Vec<u64>, u64> =
            StreamHandle::spawn(channel.clone(), options(None));

        channel.queue_frame(ChannelFrame::method_output(json!(1)));
        wait_until(|| handle.current() == vec![1]).await;

        drop(handle);
        wait_until(|| channel.closed_count() == 1).await;
    }

    #[tokio::test]
    async fn late_dispatch_after_teardown_is_ignored() {
        let channel = MockChannel::new();
        let handle: StreamHandle<Vec<u64>, u64> =
            StreamHandle::spawn(channel.clone(), options(None));
        let dispatcher = handle.dispatcher();
        let states = handle.subscribe();

        channel.queue_frame(ChannelFrame::method_output(json!(1)));
        wait_until(|| *states.borrow() == vec![1]).await;

        handle.shutdown().await;
        dispatcher.dispatch(99);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*states.borrow(), vec![1]);
    }

    #[tokio::test]
    async fn activations_get_unique_ids() {
        let channel = MockChannel::new();
        let a: StreamHandle<Vec<u64>, u64> = StreamHandle::spawn(channel.clone(), options(None));
        let b: StreamHandle<Vec<u64>, u64> = StreamHandle::spawn(channel.clone(), options(None));

        assert_ne!(a.id(), b.id());
        wait_until(|| channel.opened().len() == 2).await;
    }

    #[tokio::test]
    async fn recv_error_before_any_frame_reports_channel_error_display() {
        // ChannelError's Display feeds the fault message verbatim.
        let err = ChannelError::Recv("boom".into());
        assert_eq!(err.to_string(), "receive failed: boom");
    }
}
