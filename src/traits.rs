//! Collaborator trait for the subscription cache.
//!
//! A [`StreamSource`] bundles everything a [`SubscriptionCache`](crate::SubscriptionCache)
//! needs from the outside world: how to derive a cache key and a cancellation
//! signal from call arguments, how to open the underlying stream, and what to
//! do when a caller joins a stream that is already live.
//!
//! # Example
//!
//! ```ignore
//! struct SlotSource { rpc: RpcClient }
//!
//! #[async_trait]
//! impl StreamSource for SlotSource {
//!     type Args = SlotRequest;
//!     type Key = String;
//!     type Stream = SlotFeed;
//!     type Error = RpcError;
//!
//!     fn cache_key(&self, args: &SlotRequest) -> Option<String> {
//!         Some(format!("slots:{}", args.commitment))
//!     }
//!
//!     fn cancellation_signal(&self, args: &SlotRequest) -> CancellationToken {
//!         args.signal.clone()
//!     }
//!
//!     async fn create_stream(
//!         &self,
//!         token: CancellationToken,
//!         args: &SlotRequest,
//!     ) -> Result<SlotFeed, RpcError> {
//!         self.rpc.subscribe_slots(args.commitment, token).await
//!     }
//! }
//! ```

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

/// External collaborators for one [`SubscriptionCache`](crate::SubscriptionCache).
///
/// The stream type must be cheaply cloneable, and every clone must observe
/// the same underlying stream: the cache hands one clone to each caller and
/// drains a private clone to detect when the stream ends.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    /// Call arguments passed to [`acquire`](crate::SubscriptionCache::acquire).
    type Args: Send + Sync + 'static;

    /// Deterministic identity derived from [`Args`](Self::Args).
    type Key: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static;

    /// Shared handle to the underlying stream.
    type Stream: Stream<Item: Send> + Clone + Unpin + Send + Sync + 'static;

    /// Collaborator error, returned to callers unchanged.
    type Error: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Derive the cache key, or `None` to bypass the cache for this call.
    ///
    /// Must be pure: equal arguments yield equal keys.
    fn cache_key(&self, args: &Self::Args) -> Option<Self::Key>;

    /// The caller's cancellation signal.
    ///
    /// The cache only observes it. Cancelling it releases the caller's
    /// reference.
    fn cancellation_signal(&self, args: &Self::Args) -> CancellationToken;

    /// Open the underlying stream.
    ///
    /// Must stop producing once `token` is cancelled. For cached keys the
    /// token belongs to the shared entry and is cancelled at most once, when
    /// the last reference is gone.
    async fn create_stream(
        &self,
        token: CancellationToken,
        args: &Self::Args,
    ) -> Result<Self::Stream, Self::Error>;

    /// Called when a caller joins an already created stream.
    ///
    /// Typical use is sending an extra subscribe message on the open stream.
    /// Errors are returned to the joining caller only.
    async fn on_cache_hit(
        &self,
        _stream: &Self::Stream,
        _args: &Self::Args,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}
