//! # topic-client
//!
//! Async subscription client for topic-sync.
//!
//! This is the crate applications use to keep a locally-reconciled view of
//! a server-side topic: a snapshot fetched on demand, merged with a live
//! update stream by the pure engine in `topic-core`.
//!
//! ## Architecture
//!
//! ```text
//! Application → TopicQuery → StreamHandle (one task per activation)
//!                    ↓              ↓
//!             SnapshotFetcher   Channel (external adapter)
//!                    ↓              ↓
//!               topic-core (pure reconciliation engine)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use topic_client::{MockChannel, MockFetcher, TopicOptions, TopicQuery};
//! use topic_types::TopicId;
//!
//! let query = TopicQuery::new(channel, fetcher);
//! let mut sub = query.subscribe(TopicOptions::new(
//!     TopicId::new("pokedex", "regional"),
//!     |mut state: Vec<Entry>, entry: Entry| {
//!         state.push(entry);
//!         state
//!     },
//! ));
//!
//! while sub.changed().await {
//!     if let Some(state) = sub.value() {
//!         println!("{} entries", state.len());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod method;
pub mod query;
pub mod snapshot;

pub use channel::{Channel, ChannelHandle, MockChannel};
pub use error::{ChannelError, FetchError, StreamFault};
pub use method::{Dispatcher, StreamHandle, StreamOptions};
pub use query::{TopicOptions, TopicQuery, TopicSubscription, TopicView, DEFAULT_METHOD};
pub use snapshot::{MockFetcher, SnapshotFetcher};
