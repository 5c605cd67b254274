//! Hvergelmir - deduplicating cache for long-lived async subscriptions
//!
//! Many callers asking for the same live stream (same remote event source,
//! same parameters) share one underlying stream. The stream is created on
//! the first request, handed to every later caller, and torn down when the
//! last caller's cancellation signal has fired and nobody re-subscribed
//! within the same scheduling turn.
//!
//! # Example
//!
//! ```rust,ignore
//! use hvergelmir::{StreamSource, SubscriptionCache};
//! use tokio_util::sync::CancellationToken;
//!
//! let cache = SubscriptionCache::builder(AccountSource::new(rpc))
//!     .name("accounts")
//!     .build();
//!
//! let signal = CancellationToken::new();
//! let notifications = cache
//!     .acquire(AccountRequest::new(address, signal.clone()))
//!     .await?;
//!
//! // Any other caller asking for `address` gets a clone of the same stream.
//! signal.cancel();
//! ```
//!
//! The [`codec`] module carries the compact `u16` length encoding used by
//! subscription wire messages.

pub mod cache;
pub mod codec;
pub mod error;
pub mod telemetry;
pub mod traits;

pub use cache::{CacheConfig, EntryStats, SubscriptionCache, SubscriptionCacheBuilder};
pub use error::{CodecError, Result, SubscriptionError};
pub use traits::StreamSource;

pub use tokio_util::sync::CancellationToken;
