//! Mock channel for testing.
//!
//! Allows queueing frames and capturing opened subscriptions, start
//! payloads, and closes for verification.

use super::{Channel, ChannelHandle};
use crate::error::ChannelError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use topic_types::{ChannelFrame, SubscriptionId, TopicFrame};

/// Mock channel for testing.
///
/// Frames queued on the channel are delivered to whichever handle is
/// currently receiving. Cloning shares state.
#[derive(Debug, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelInner>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockChannelInner {
    opened: Vec<(String, SubscriptionId)>,
    start_payloads: Vec<Value>,
    frames: VecDeque<ChannelFrame>,
    fail_next_open: Option<String>,
    fail_next_start: Option<String>,
    fail_next_recv: Option<String>,
    hold_start: bool,
    closed_count: usize,
}

impl MockChannel {
    /// Create a new mock channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw frame to be delivered by `recv()`.
    pub fn queue_frame(&self, frame: ChannelFrame) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames.push_back(frame);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Queue a topic update wrapped in a method-output frame.
    pub fn queue_update(&self, frame: &TopicFrame) {
        let data = serde_json::to_value(frame).unwrap();
        self.queue_frame(ChannelFrame::method_output(data));
    }

    /// Subscriptions opened so far, as (method, instance) pairs.
    pub fn opened(&self) -> Vec<(String, SubscriptionId)> {
        self.inner.lock().unwrap().opened.clone()
    }

    /// Payloads passed to `start()` so far.
    pub fn start_payloads(&self) -> Vec<Value> {
        self.inner.lock().unwrap().start_payloads.clone()
    }

    /// Number of handles closed so far.
    pub fn closed_count(&self) -> usize {
        self.inner.lock().unwrap().closed_count
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_open = Some(error.to_string());
    }

    /// Cause the next `start()` to fail with the given error.
    pub fn fail_next_start(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_start = Some(error.to_string());
    }

    /// Cause the next `recv()` to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_recv = Some(error.to_string());
        self.notify.notify_waiters();
    }

    /// Delay `start()` acknowledgement until [`MockChannel::release_start`].
    pub fn hold_start(&self) {
        self.inner.lock().unwrap().hold_start = true;
    }

    /// Release a held `start()`.
    pub fn release_start(&self) {
        self.inner.lock().unwrap().hold_start = false;
        self.notify.notify_waiters();
    }
}

impl Clone for MockChannel {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
        }
    }
}

#[async_trait]
impl Channel for MockChannel {
    type Handle = MockHandle;

    async fn open(
        &self,
        method: &str,
        instance: SubscriptionId,
    ) -> Result<Self::Handle, ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(ChannelError::OpenFailed(error));
        }
        inner.opened.push((method.to_string(), instance));
        Ok(MockHandle {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
            closed: false,
        })
    }
}

/// One activation of the mock channel.
#[derive(Debug)]
pub struct MockHandle {
    inner: Arc<Mutex<MockChannelInner>>,
    notify: Arc<Notify>,
    closed: bool,
}

#[async_trait]
impl ChannelHandle for MockHandle {
    async fn start(&mut self, payload: Value) -> Result<(), ChannelError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_next_start.take() {
                return Err(ChannelError::StartFailed(error));
            }
            inner.start_payloads.push(payload);
        }
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.inner.lock().unwrap().hold_start {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn recv(&mut self) -> Result<ChannelFrame, ChannelError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if self.closed {
                    return Err(ChannelError::Closed);
                }
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(ChannelError::Recv(error));
                }
                if let Some(frame) = inner.frames.pop_front() {
                    return Ok(frame);
                }
            }
            notified.await;
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inner.lock().unwrap().closed_count += 1;
        self.notify.notify_waiters();
    }
}
