//! Channel adapter abstraction.
//!
//! The channel is an external collaborator: it multiplexes named logical
//! subscriptions over some persistent bidirectional connection and
//! delivers frames in whatever order the transport produces them. This
//! crate only opens and closes its own named subscription; connection
//! management belongs to the adapter.
//!
//! # Design
//!
//! One [`ChannelHandle`] per subscription activation:
//! - `start()` resolves once the subscription is acknowledged as live,
//!   which gates the "fetch the snapshot now" trigger
//! - `recv()` yields raw frames; only `methodOutput` frames carry updates
//! - `close()` is idempotent

mod mock;

pub use mock::MockChannel;

use async_trait::async_trait;
use serde_json::Value;
use topic_types::{ChannelFrame, SubscriptionId};

use crate::error::ChannelError;

/// Opens named logical subscriptions.
///
/// Implementations handle the underlying connection mechanism; the mock
/// drives tests.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The per-activation handle type.
    type Handle: ChannelHandle + 'static;

    /// Open a logical subscription for `method`.
    ///
    /// `instance` is generated fresh per activation so a close issued
    /// against an old activation can never affect a newer one.
    async fn open(
        &self,
        method: &str,
        instance: SubscriptionId,
    ) -> Result<Self::Handle, ChannelError>;
}

/// One activation of a logical subscription.
#[async_trait]
pub trait ChannelHandle: Send {
    /// Start the subscription with the given initial payload.
    ///
    /// Resolves once the subscription is acknowledged as live.
    async fn start(&mut self, payload: Value) -> Result<(), ChannelError>;

    /// Receive the next frame.
    ///
    /// Waits until a frame is available or the subscription closes.
    async fn recv(&mut self) -> Result<ChannelFrame, ChannelError>;

    /// Close the subscription. Idempotent.
    async fn close(&mut self);
}
