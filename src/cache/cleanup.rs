//! Cleanup coordination.
//!
//! Three triggers remove an entry: the idle purge (see `lifecycle`), the
//! stream ending on its own, and creation failing. All of them go through
//! the generation-checked removal in the store, so whichever runs first wins
//! and the others are no-ops.

use std::sync::Arc;

use futures_util::{FutureExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CacheInner;
use super::store::{PendingStream, StreamHandle};
use crate::telemetry;
use crate::traits::StreamSource;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownReason {
    /// Last reference released and not re-acquired within the turn.
    Idle,
    /// The stream ended or failed on its own.
    Completed,
    /// Creating the stream failed.
    CreateFailed,
}

impl TeardownReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Completed => "completed",
            Self::CreateFailed => "create_failed",
        }
    }
}

impl<Src: StreamSource> CacheInner<Src> {
    /// Start creating the stream for a freshly inserted entry.
    ///
    /// The returned future is shared by the miss caller and every caller
    /// that hits the entry before it resolves. Resolution updates the entry
    /// exactly once, whoever happens to poll it.
    pub(super) fn start_creation(
        self: &Arc<Self>,
        key: Src::Key,
        id: u64,
        token: CancellationToken,
        args: Src::Args,
    ) -> PendingStream<Src::Stream, Src::Error> {
        let source = Arc::clone(&self.source);
        let weak = Arc::downgrade(self);
        async move {
            let result = source.create_stream(token, &args).await;
            if let Some(inner) = weak.upgrade() {
                inner.settle(&key, id, &result);
            }
            result
        }
        .boxed()
        .shared()
    }

    fn settle(
        self: &Arc<Self>,
        key: &Src::Key,
        id: u64,
        result: &Result<Src::Stream, Src::Error>,
    ) {
        match result {
            Ok(stream) => {
                let mut entries = self.store.lock();
                let Some(entry) = entries.get_mut(key).filter(|entry| entry.id == id) else {
                    debug!(key = ?key, "stream created after its entry was torn down");
                    return;
                };
                entry.handle = StreamHandle::Ready(stream.clone());
                let detach = entry.detach.clone();
                drop(entries);
                debug!(key = ?key, "stream ready");
                self.watch_completion(key.clone(), id, stream.clone(), detach);
            }
            Err(e) => {
                metrics::counter!(telemetry::CREATE_FAILURES_TOTAL, "cache" => self.config.name.clone())
                    .increment(1);
                warn!(cache = %self.config.name, key = ?key, error = %e, "stream creation failed");
                self.cleanup(key, id, TeardownReason::CreateFailed);
            }
        }
    }

    /// Drain a private clone of the stream and clean up when it ends.
    ///
    /// Observes termination only; the clones handed to callers are not
    /// affected. Stops early if the entry is torn down first.
    fn watch_completion(
        self: &Arc<Self>,
        key: Src::Key,
        id: u64,
        stream: Src::Stream,
        detach: CancellationToken,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut watched = stream;
            tokio::select! {
                biased;
                _ = detach.cancelled() => return,
                _ = drain(&mut watched) => {}
            }
            if let Some(inner) = weak.upgrade() {
                inner.cleanup(&key, id, TeardownReason::Completed);
            }
        });
    }

    /// Remove entry `id` and detach its listeners. Idempotent.
    ///
    /// Returns whether this call removed the entry.
    pub(super) fn cleanup(&self, key: &Src::Key, id: u64, reason: TeardownReason) -> bool {
        let removed = self.store.remove(key, id).is_some();
        if removed {
            self.record_teardown(key, reason);
        }
        removed
    }

    pub(super) fn record_teardown(&self, key: &Src::Key, reason: TeardownReason) {
        let name = self.config.name.clone();
        metrics::counter!(
            telemetry::TEARDOWNS_TOTAL,
            "cache" => name.clone(),
            "reason" => reason.as_str()
        )
        .increment(1);
        metrics::gauge!(telemetry::ACTIVE_ENTRIES, "cache" => name).decrement(1.0);
        debug!(key = ?key, reason = reason.as_str(), "entry torn down");
    }
}

async fn drain<S: Stream + Unpin>(stream: &mut S) {
    while stream.next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_reason_labels() {
        assert_eq!(TeardownReason::Idle.as_str(), "idle");
        assert_eq!(TeardownReason::Completed.as_str(), "completed");
        assert_eq!(TeardownReason::CreateFailed.as_str(), "create_failed");
    }
}
