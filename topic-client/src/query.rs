//! Topic subscription: reconciles a snapshot fetch with a live frame
//! stream into one monotonically advancing value.
//!
//! Built on [`StreamHandle`] with [`ReconcileState`] as the reducer
//! state: the snapshot arrives as a synthetic event through the same
//! serialized queue as live frames, so the reconciliation core never sees
//! concurrent inputs.

use serde::de::DeserializeOwned;
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use topic_core::{ReconcileState, TopicEvent, DEFAULT_BUFFER_CAPACITY};
use topic_types::{SeqNo, Snapshot, SubscriptionId, TopicFrame, TopicId};

use crate::channel::Channel;
use crate::error::StreamFault;
use crate::method::{Dispatcher, StreamHandle, StreamOptions};
use crate::snapshot::SnapshotFetcher;

/// Default subscription method name for topic queries.
pub const DEFAULT_METHOD: &str = "SubscribeTopic";

/// Configuration for one topic subscription.
pub struct TopicOptions<S, O, R> {
    topic: TopicId,
    method: String,
    buffer_capacity: usize,
    reducer: Arc<R>,
    _types: PhantomData<fn(S, O) -> S>,
}

impl<S, O, R> TopicOptions<S, O, R>
where
    R: Fn(S, O) -> S,
{
    /// Options for `topic` with the given update reducer.
    pub fn new(topic: TopicId, reducer: R) -> Self {
        Self {
            topic,
            method: DEFAULT_METHOD.to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reducer: Arc::new(reducer),
            _types: PhantomData,
        }
    }

    /// Override the subscription method name.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Override the pre-snapshot frame buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }
}

/// Entry point for subscribing to topics over a channel.
pub struct TopicQuery<C, F> {
    channel: C,
    fetcher: Arc<F>,
}

impl<C, F> TopicQuery<C, F> {
    /// A query backed by the given channel and snapshot fetcher.
    pub fn new(channel: C, fetcher: F) -> Self {
        Self {
            channel,
            fetcher: Arc::new(fetcher),
        }
    }
}

impl<C, F> TopicQuery<C, F>
where
    C: Channel + Clone + 'static,
    F: Send + Sync + 'static,
{
    /// Subscribe to a topic.
    ///
    /// Opens the live stream, fires the snapshot fetch once the
    /// subscription is acknowledged, and returns a handle to the
    /// reconciled value.
    pub fn subscribe<S, O, R>(&self, options: TopicOptions<S, O, R>) -> TopicSubscription<S>
    where
        F: SnapshotFetcher<State = S>,
        S: Clone + DeserializeOwned + Send + Sync + 'static,
        O: DeserializeOwned + Send + 'static,
        R: Fn(S, O) -> S + Send + Sync + 'static,
    {
        let channel = self.channel.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let TopicOptions {
            topic,
            method,
            buffer_capacity,
            reducer,
            ..
        } = options;

        let respawn = Box::new(move || {
            spawn_activation::<C, F, S, O, R>(
                channel.clone(),
                Arc::clone(&fetcher),
                topic.clone(),
                method.clone(),
                buffer_capacity,
                Arc::clone(&reducer),
            )
        });
        let inner = respawn();

        TopicSubscription { inner, respawn }
    }
}

fn spawn_activation<C, F, S, O, R>(
    channel: C,
    fetcher: Arc<F>,
    topic: TopicId,
    method: String,
    buffer_capacity: usize,
    reducer: Arc<R>,
) -> StreamHandle<ReconcileState<S>, TopicEvent<S>>
where
    C: Channel + 'static,
    F: SnapshotFetcher<State = S> + Send + Sync + 'static,
    S: Clone + DeserializeOwned + Send + Sync + 'static,
    O: DeserializeOwned + Send + 'static,
    R: Fn(S, O) -> S + Send + Sync + 'static,
{
    let payload = json!({ "id": &topic });
    let options = StreamOptions {
        method,
        payload,
        initial: ReconcileState::new(buffer_capacity),
        decode: Box::new(|data| TopicFrame::from_value(data).map(TopicEvent::Frame)),
        reduce: Box::new(move |state: ReconcileState<S>, event| {
            state.apply::<O, _>(event, reducer.as_ref())
        }),
        on_connect: Some(Box::new(move |dispatcher: Dispatcher<TopicEvent<S>>| {
            tokio::spawn(async move {
                match fetcher.fetch().await {
                    Ok(Snapshot { state, counter }) => {
                        dispatcher.dispatch(TopicEvent::Snapshot { state, counter });
                    }
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "snapshot fetch failed");
                        dispatcher.report(StreamFault::Fetch(err.to_string()));
                    }
                }
            });
        })),
    };
    StreamHandle::spawn(channel, options)
}

type RespawnFn<S> = Box<dyn Fn() -> StreamHandle<ReconcileState<S>, TopicEvent<S>> + Send + Sync>;

/// Handle to one reconciled topic value.
///
/// Dropping the subscription tears the underlying activation down.
pub struct TopicSubscription<S> {
    inner: StreamHandle<ReconcileState<S>, TopicEvent<S>>,
    respawn: RespawnFn<S>,
}

/// Point-in-time view of a subscription, for callers that want the value
/// and the latest fault together.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicView<S> {
    /// The reconciled value, absent until the first settle.
    pub value: Option<S>,
    /// The most recent fault, if any.
    pub error: Option<StreamFault>,
}

impl<S> TopicSubscription<S>
where
    S: Clone,
{
    /// The current activation's identity token.
    pub fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    /// The reconciled value, or `None` before the first settle.
    pub fn value(&self) -> Option<S> {
        self.inner.current().value().cloned()
    }

    /// Whether a snapshot has been reconciled in.
    pub fn is_settled(&self) -> bool {
        self.inner.current().is_settled()
    }

    /// The sequence number of the last applied input, once settled.
    pub fn counter(&self) -> Option<SeqNo> {
        self.inner.current().counter()
    }

    /// The most recent fault, if any.
    pub fn last_error(&self) -> Option<StreamFault> {
        self.inner.fault()
    }

    /// A watch receiver over surfaced faults.
    pub fn errors(&self) -> watch::Receiver<Option<StreamFault>> {
        self.inner.faults()
    }

    /// The value and latest fault together.
    pub fn view(&self) -> TopicView<S> {
        TopicView {
            value: self.value(),
            error: self.last_error(),
        }
    }

    /// Wait for the next reconciliation step.
    ///
    /// Returns `false` once the activation has been torn down.
    pub async fn changed(&mut self) -> bool {
        self.inner.changed().await
    }

    /// A dispatcher for feeding synthetic events into the activation.
    pub fn dispatcher(&self) -> Dispatcher<TopicEvent<S>> {
        self.inner.dispatcher()
    }

    /// Tear the current activation down and start a fresh one.
    ///
    /// The new activation re-buffers, re-fetches, and re-settles from
    /// scratch under a new identity token.
    pub fn resubscribe(&mut self) {
        let fresh = (self.respawn)();
        drop(std::mem::replace(&mut self.inner, fresh));
    }

    /// Trigger teardown without waiting for it to complete.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the current activation is still running.
    pub fn is_active(&self) -> bool {
        !self.inner.is_finished()
    }

    /// Tear the activation down and wait for the channel to be closed.
    pub async fn shutdown(self) {
        self.inner.shutdown().await;
    }
}
