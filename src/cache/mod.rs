//! Deduplicating subscription cache.
//!
//! [`SubscriptionCache`] makes sure that callers asking for the same live
//! stream share one underlying stream:
//!
//! - **Miss**: the first caller for a key inserts a pending entry and starts
//!   creation through [`StreamSource::create_stream`].
//! - **Hit**: later callers bump the entry's reference count, wait for the
//!   (possibly still pending) stream and run [`StreamSource::on_cache_hit`].
//! - **Release**: there is no release call. Each caller's cancellation signal
//!   releases its reference. When the count reaches zero a purge check is
//!   deferred by one scheduling turn, so a cancel immediately followed by a
//!   resubscribe with the same key keeps the stream alive.
//!
//! An entry leaves the store exactly once, through whichever of three paths
//! gets there first: idle teardown (the only path that cancels the entry's
//! token), the stream ending on its own, or stream creation failing.
//!
//! Keyed acquisitions need a current-thread runtime: the debounce is defined
//! by tasks taking turns on one thread.
//!
//! # Example
//!
//! ```ignore
//! let cache = SubscriptionCache::builder(SlotSource::new(rpc))
//!     .name("slots")
//!     .build();
//!
//! let signal = CancellationToken::new();
//! let feed = cache.acquire(SlotRequest::new("confirmed", signal.clone())).await?;
//! // ... consume feed ...
//! signal.cancel(); // releases this caller's reference
//! ```

mod cleanup;
mod config;
mod lifecycle;
mod store;

pub use config::{CacheConfig, DEFAULT_CACHE_NAME, SubscriptionCacheBuilder};
pub use store::EntryStats;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{Result, SubscriptionError};
use crate::telemetry;
use crate::traits::StreamSource;

use config::MissingEntryMessage;
use store::{CacheStore, Entry, PendingStream, StreamHandle};

/// Shared state behind every clone of a [`SubscriptionCache`].
pub(crate) struct CacheInner<Src: StreamSource> {
    source: Arc<Src>,
    store: CacheStore<Src::Key, Src::Stream, Src::Error>,
    config: CacheConfig,
    missing_entry_message: MissingEntryMessage<Src::Key>,
}

/// Outcome of the synchronous store transition at the start of `acquire`.
enum Joined<S, E, A> {
    Miss(PendingStream<S, E>),
    Hit(StreamHandle<S, E>, A),
}

/// Factory that hands out shared streams, one per distinct cache key.
///
/// Cloning is cheap; clones share the same store.
pub struct SubscriptionCache<Src: StreamSource> {
    inner: Arc<CacheInner<Src>>,
}

impl<Src: StreamSource> Clone for SubscriptionCache<Src> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Src: StreamSource> SubscriptionCache<Src> {
    /// Create a cache with default configuration.
    pub fn new(source: Src) -> Self {
        Self::builder(source).build()
    }

    /// Create a builder for configuring the cache.
    pub fn builder(source: Src) -> SubscriptionCacheBuilder<Src> {
        SubscriptionCacheBuilder::new(source)
    }

    pub(crate) fn from_parts(
        source: Src,
        config: CacheConfig,
        missing_entry_message: MissingEntryMessage<Src::Key>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source: Arc::new(source),
                store: CacheStore::new(),
                config,
                missing_entry_message,
            }),
        }
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get the shared stream for `args`, creating it on a miss.
    ///
    /// The caller's reference is released when the cancellation signal
    /// derived from `args` fires. Uncacheable arguments (no key) get a
    /// private stream that is never shared.
    ///
    /// Keyed calls must run on a current-thread tokio runtime (a
    /// `LocalSet` on top of one is fine) and fail with
    /// [`SubscriptionError::UnsupportedRuntime`] anywhere else.
    #[instrument(skip_all, fields(cache = %self.inner.config.name))]
    pub async fn acquire(&self, args: Src::Args) -> Result<Src::Stream, Src::Error> {
        let inner = &self.inner;
        let signal = inner.source.cancellation_signal(&args);
        let Some(key) = inner.source.cache_key(&args) else {
            return inner.create_uncached(signal, &args).await;
        };
        lifecycle::ensure_current_thread()?;

        match inner.join(key, signal, args) {
            Joined::Miss(pending) => pending.await.map_err(SubscriptionError::Create),
            Joined::Hit(handle, args) => {
                // A failed pending handle was already cleaned up by the miss path.
                let stream = match handle {
                    StreamHandle::Ready(stream) => stream,
                    StreamHandle::Pending(pending) => {
                        pending.await.map_err(SubscriptionError::Create)?
                    }
                };
                inner
                    .source
                    .on_cache_hit(&stream, &args)
                    .await
                    .map_err(SubscriptionError::CacheHit)?;
                Ok(stream)
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for `key`.
    pub fn contains_key(&self, key: &Src::Key) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn entry_stats(&self, key: &Src::Key) -> Option<EntryStats> {
        self.inner.store.stats(key)
    }
}

impl<Src: StreamSource> CacheInner<Src> {
    async fn create_uncached(
        &self,
        signal: CancellationToken,
        args: &Src::Args,
    ) -> Result<Src::Stream, Src::Error> {
        metrics::counter!(telemetry::UNCACHED_TOTAL, "cache" => self.config.name.clone())
            .increment(1);
        debug!("uncacheable arguments, creating private stream");
        self.source
            .create_stream(signal.child_token(), args)
            .await
            .map_err(SubscriptionError::Create)
    }

    /// Count the caller against the entry for `key`, inserting a pending
    /// entry on a miss, and register the caller's abort listener.
    ///
    /// Runs without suspending, so a concurrent caller for the same key
    /// always observes the entry this call inserted.
    fn join(
        self: &Arc<Self>,
        key: Src::Key,
        signal: CancellationToken,
        args: Src::Args,
    ) -> Joined<Src::Stream, Src::Error, Src::Args> {
        let mut entries = self.store.lock();
        let (id, detach, joined) = match entries.get_mut(&key) {
            Some(entry) => {
                entry.ref_count += 1;
                debug!(key = ?key, ref_count = entry.ref_count, "cache hit");
                (
                    entry.id,
                    entry.detach.clone(),
                    Joined::Hit(entry.handle.clone(), args),
                )
            }
            None => {
                let id = self.store.next_id();
                let token = CancellationToken::new();
                let detach = CancellationToken::new();
                let pending = self.start_creation(key.clone(), id, token.clone(), args);
                entries.insert(
                    key.clone(),
                    Entry {
                        id,
                        token,
                        detach: detach.clone(),
                        handle: StreamHandle::Pending(pending.clone()),
                        ref_count: 1,
                        purge_scheduled: false,
                    },
                );
                debug!(key = ?key, "cache miss, creating stream");
                (id, detach, Joined::Miss(pending))
            }
        };
        drop(entries);

        let name = self.config.name.clone();
        match &joined {
            Joined::Miss(pending) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => name.clone())
                    .increment(1);
                metrics::gauge!(telemetry::ACTIVE_ENTRIES, "cache" => name).increment(1.0);
                // Creation completes even if every waiting caller goes away.
                tokio::spawn(pending.clone());
            }
            Joined::Hit(..) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => name).increment(1);
            }
        }

        self.listen(key, id, signal, detach);
        joined
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::Stream;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::lifecycle::ensure_current_thread;
    use super::*;

    #[derive(Debug, Clone)]
    struct Idle;

    impl Stream for Idle {
        type Item = u32;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<u32>> {
            Poll::Pending
        }
    }

    struct Req {
        key: &'static str,
        signal: CancellationToken,
    }

    #[derive(Default)]
    struct TickSource {
        creations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamSource for TickSource {
        type Args = Req;
        type Key = &'static str;
        type Stream = Idle;
        type Error = String;

        fn cache_key(&self, args: &Req) -> Option<&'static str> {
            Some(args.key)
        }

        fn cancellation_signal(&self, args: &Req) -> CancellationToken {
            args.signal.clone()
        }

        async fn create_stream(
            &self,
            _token: CancellationToken,
            _args: &Req,
        ) -> std::result::Result<Self::Stream, String> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(Idle)
        }
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !done() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    fn entry_parts(
        cache: &SubscriptionCache<TickSource>,
        key: &'static str,
    ) -> (u64, CancellationToken, CancellationToken) {
        let entries = cache.inner.store.lock();
        let entry = entries.get(key).expect("entry present");
        (entry.id, entry.token.clone(), entry.detach.clone())
    }

    #[tokio::test]
    async fn resubscribe_while_purge_pending_keeps_entry() {
        let source = TickSource::default();
        let creations = Arc::clone(&source.creations);
        let cache = SubscriptionCache::new(source);

        let _a = cache
            .acquire(Req {
                key: "x",
                signal: CancellationToken::new(),
            })
            .await
            .unwrap();
        let (id, token, detach) = entry_parts(&cache, "x");

        // Release the only reference synchronously, as its listener would.
        cache.inner.handle_abort(&"x", id, &detach).unwrap();
        let stats = cache.entry_stats(&"x").unwrap();
        assert_eq!(stats.ref_count, 0);
        assert!(stats.purge_scheduled);

        // Re-acquire before the deferred check gets to run.
        let mut b = tokio_test::task::spawn(cache.acquire(Req {
            key: "x",
            signal: CancellationToken::new(),
        }));
        assert!(b.poll().is_ready());
        assert_eq!(cache.entry_stats(&"x").unwrap().ref_count, 1);

        settle(|| !cache.entry_stats(&"x").unwrap().purge_scheduled).await;
        assert!(!token.is_cancelled());
        assert!(cache.contains_key(&"x"));
        assert_eq!(creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn purge_runs_once_for_same_turn_aborts() {
        let cache = SubscriptionCache::new(TickSource::default());
        for _ in 0..2 {
            cache
                .acquire(Req {
                    key: "x",
                    signal: CancellationToken::new(),
                })
                .await
                .unwrap();
        }
        let (id, token, detach) = entry_parts(&cache, "x");

        cache.inner.handle_abort(&"x", id, &detach).unwrap();
        cache.inner.handle_abort(&"x", id, &detach).unwrap();
        let stats = cache.entry_stats(&"x").unwrap();
        assert_eq!(stats.ref_count, 0);
        assert!(stats.purge_scheduled);

        settle(|| !cache.contains_key(&"x")).await;
        assert!(token.is_cancelled());
        assert!(detach.is_cancelled());
    }

    #[tokio::test]
    async fn abort_without_entry_is_stale() {
        let cache = SubscriptionCache::builder(TickSource::default())
            .name("slots")
            .missing_entry_message(|key| format!("lost {key}"))
            .build();
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        let err = metrics::with_local_recorder(&recorder, || {
            cache
                .inner
                .handle_abort(&"gone", 1, &CancellationToken::new())
                .unwrap_err()
        });
        assert_eq!(err, SubscriptionError::StaleAbort("lost gone".into()));

        let stale: Vec<_> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, _, _, _)| key.key().name() == telemetry::STALE_ABORTS_TOTAL)
            .collect();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].3, DebugValue::Counter(1));
        assert!(
            stale[0]
                .0
                .key()
                .labels()
                .any(|label| label.key() == "cache" && label.value() == "slots")
        );
    }

    #[test]
    fn keyed_acquire_needs_a_runtime() {
        assert_eq!(
            ensure_current_thread::<String>(),
            Err(SubscriptionError::UnsupportedRuntime("no runtime".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn keyed_acquire_rejects_multi_thread_runtime() {
        let source = TickSource::default();
        let creations = Arc::clone(&source.creations);
        let cache = SubscriptionCache::new(source);

        let err = cache
            .acquire(Req {
                key: "x",
                signal: CancellationToken::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::UnsupportedRuntime(_)));
        assert!(cache.is_empty());
        assert_eq!(creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn abort_after_teardown_is_not_stale() {
        let cache = SubscriptionCache::new(TickSource::default());
        let detach = CancellationToken::new();
        detach.cancel();

        assert!(cache.inner.handle_abort(&"gone", 1, &detach).is_ok());
    }
}
