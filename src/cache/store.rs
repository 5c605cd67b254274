//! Cache store and entry shape.
//!
//! One [`Entry`] per live cache key. Entries are inserted synchronously on a
//! miss, before the stream exists, so concurrent callers racing on the same
//! key find the pending entry instead of starting a second creation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Pending creation shared between the miss caller and every early hit.
pub(crate) type PendingStream<S, E> = Shared<BoxFuture<'static, Result<S, E>>>;

/// The stream of an entry: pending until creation resolves, then ready.
///
/// Moves from `Pending` to `Ready` exactly once and never back.
pub(crate) enum StreamHandle<S, E> {
    Pending(PendingStream<S, E>),
    Ready(S),
}

impl<S: Clone, E> Clone for StreamHandle<S, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending(fut) => Self::Pending(fut.clone()),
            Self::Ready(stream) => Self::Ready(stream.clone()),
        }
    }
}

/// Shared lifecycle record for one cache key.
pub(crate) struct Entry<S, E> {
    /// Generation id; distinguishes this entry from later ones under the same key.
    pub(crate) id: u64,
    /// Handed to the stream creator; cancelled once, on idle teardown.
    pub(crate) token: CancellationToken,
    /// Cancelled when the entry leaves the store; stops its listeners and completion watcher.
    pub(crate) detach: CancellationToken,
    pub(crate) handle: StreamHandle<S, E>,
    pub(crate) ref_count: usize,
    pub(crate) purge_scheduled: bool,
}

impl<S, E> Entry<S, E> {
    fn stats(&self) -> EntryStats {
        EntryStats {
            ref_count: self.ref_count,
            purge_scheduled: self.purge_scheduled,
            ready: matches!(self.handle, StreamHandle::Ready(_)),
        }
    }
}

/// Read-only view of one entry, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStats {
    /// Callers whose cancellation signal has not been handled yet.
    pub ref_count: usize,
    /// A deferred purge check is queued.
    pub purge_scheduled: bool,
    /// The stream has been created.
    pub ready: bool,
}

/// Map from cache key to entry, owned by one factory.
///
/// The lock is only held across synchronous transitions, never across an
/// `.await`.
pub(crate) struct CacheStore<K, S, E> {
    entries: Mutex<HashMap<K, Entry<S, E>>>,
    next_id: AtomicU64,
}

impl<K: Hash + Eq, S, E> CacheStore<K, S, E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lock the map for one synchronous transition.
    ///
    /// Transitions never leave the map half-updated, so a poisoned lock
    /// still guards consistent data.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<S, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove the entry for `key` if it is still generation `id`.
    ///
    /// Idempotent: an absent key or a newer generation is left untouched.
    /// The removed entry's listeners are detached before it is returned.
    pub(crate) fn remove(&self, key: &K, id: u64) -> Option<Entry<S, E>> {
        remove_locked(&mut self.lock(), key, id)
    }

    pub(crate) fn stats(&self, key: &K) -> Option<EntryStats> {
        self.lock().get(key).map(Entry::stats)
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// [`CacheStore::remove`] for callers that already hold the lock.
pub(crate) fn remove_locked<K: Hash + Eq, S, E>(
    entries: &mut HashMap<K, Entry<S, E>>,
    key: &K,
    id: u64,
) -> Option<Entry<S, E>> {
    if entries.get(key).is_none_or(|entry| entry.id != id) {
        return None;
    }
    let entry = entries.remove(key)?;
    entry.detach.cancel();
    Some(entry)
}
