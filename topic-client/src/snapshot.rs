//! Snapshot fetcher abstraction.
//!
//! The fetcher is an external collaborator: an on-demand request/response
//! call returning the authoritative state plus the sequence number as of
//! which it is valid. It is issued once per subscription activation, and
//! its late resolution is ignored if the activation was torn down first.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use topic_types::{SeqNo, Snapshot};

use crate::error::FetchError;

/// Fetches a point-in-time snapshot of a topic.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// The application state type carried by the snapshot.
    type State;

    /// Fetch the current snapshot.
    async fn fetch(&self) -> Result<Snapshot<Self::State>, FetchError>;
}

/// Mock fetcher for testing.
///
/// Responses are queued ahead of time; `hold()` delays resolution so
/// tests can pick the exact instant a fetch completes relative to frame
/// arrival or teardown. Cloning shares state.
#[derive(Debug)]
pub struct MockFetcher<S> {
    inner: Arc<Mutex<MockFetcherInner<S>>>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct MockFetcherInner<S> {
    queue: VecDeque<Result<Snapshot<S>, FetchError>>,
    held: bool,
    fetch_count: usize,
}

impl<S> MockFetcher<S> {
    /// Create a new mock fetcher with no queued responses.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockFetcherInner {
                queue: VecDeque::new(),
                held: false,
                fetch_count: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Queue a successful snapshot response.
    pub fn queue_snapshot(&self, state: S, counter: SeqNo) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(Ok(Snapshot::new(state, counter)));
    }

    /// Queue a failed fetch.
    pub fn queue_error(&self, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(Err(FetchError::new(message)));
    }

    /// Delay fetch resolution until [`MockFetcher::release`].
    pub fn hold(&self) {
        self.inner.lock().unwrap().held = true;
    }

    /// Release held fetches.
    pub fn release(&self) {
        self.inner.lock().unwrap().held = false;
        self.notify.notify_waiters();
    }

    /// Number of fetches issued so far (counted at issue, not resolution).
    pub fn fetch_count(&self) -> usize {
        self.inner.lock().unwrap().fetch_count
    }
}

impl<S> Default for MockFetcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for MockFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
        }
    }
}

#[async_trait]
impl<S: Send> SnapshotFetcher for MockFetcher<S> {
    type State = S;

    async fn fetch(&self) -> Result<Snapshot<S>, FetchError> {
        self.inner.lock().unwrap().fetch_count += 1;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.held {
                    return inner
                        .queue
                        .pop_front()
                        .unwrap_or_else(|| Err(FetchError::new("no snapshot queued")));
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fetch_returns_queued_snapshots_in_order() {
        let fetcher = MockFetcher::new();
        fetcher.queue_snapshot(vec![1u64], SeqNo::new(1));
        fetcher.queue_snapshot(vec![2u64], SeqNo::new(2));

        assert_eq!(fetcher.fetch().await.unwrap().counter, SeqNo::new(1));
        assert_eq!(fetcher.fetch().await.unwrap().counter, SeqNo::new(2));
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn fetch_with_empty_queue_fails() {
        let fetcher: MockFetcher<Vec<u64>> = MockFetcher::new();
        assert!(fetcher.fetch().await.is_err());
    }

    #[tokio::test]
    async fn queued_error_is_returned() {
        let fetcher: MockFetcher<Vec<u64>> = MockFetcher::new();
        fetcher.queue_error("backend down");

        let err = fetcher.fetch().await.unwrap_err();
        assert_eq!(err.to_string(), "snapshot fetch failed: backend down");
    }

    #[tokio::test]
    async fn held_fetch_resolves_on_release() {
        let fetcher = MockFetcher::new();
        fetcher.queue_snapshot(0u64, SeqNo::zero());
        fetcher.hold();

        let releaser = fetcher.clone();
        let pending = tokio::spawn(async move { fetcher.fetch().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());
        assert_eq!(releaser.fetch_count(), 1);

        releaser.release();
        let snapshot = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.state, 0);
    }
}
