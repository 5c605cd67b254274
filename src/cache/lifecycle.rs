//! Abort listeners and the deferred purge state machine.
//!
//! Per entry: `ACTIVE` (ref_count > 0) → `PURGE_PENDING` (ref_count == 0,
//! purge_scheduled) → back to `ACTIVE` if a caller joins before the deferred
//! check runs, or `TORN_DOWN` (token cancelled, entry removed) if not.
//!
//! "Before the deferred check runs" only has a meaning when callers, abort
//! listeners and deferred checks take turns on one thread. Keyed
//! acquisitions are therefore refused outside a current-thread runtime, see
//! [`ensure_current_thread`].

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::CacheInner;
use super::cleanup::TeardownReason;
use super::store::remove_locked;
use crate::error::{Result, SubscriptionError};
use crate::telemetry;
use crate::traits::StreamSource;

/// Fail unless the caller runs on a current-thread tokio runtime.
///
/// On a multi-thread runtime a listener can handle an abort and its purge
/// can tear the entry down on another worker while the resubscribing caller
/// is still between `cancel()` and `acquire`, so the same-turn debounce
/// cannot hold.
pub(crate) fn ensure_current_thread<E>() -> Result<(), E> {
    let flavor = match Handle::try_current() {
        Ok(handle) => handle.runtime_flavor(),
        Err(_) => {
            return Err(SubscriptionError::UnsupportedRuntime(
                "no runtime".to_string(),
            ));
        }
    };
    match flavor {
        RuntimeFlavor::CurrentThread => Ok(()),
        other => {
            warn!(flavor = ?other, "keyed acquisition outside a current-thread runtime");
            Err(SubscriptionError::UnsupportedRuntime(format!("{other:?}")))
        }
    }
}

/// Run `fut` after the tasks already queued in the current scheduling turn.
///
/// Not a timer. The task joins the back of the current-thread run queue, so
/// every task woken earlier in this turn (other abort listeners, a
/// resubscribing caller) runs first. The scheduler drains its queue before
/// parking on the I/O driver, with one exception: every `event_interval`
/// ticks it polls the driver without parking, so under a long queue an I/O
/// wakeup can be enqueued ahead of the check.
pub(crate) fn defer<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

impl<Src: StreamSource> CacheInner<Src> {
    /// Register one caller's abort listener against entry `id`.
    ///
    /// The listener handles at most one abort and stops early once the entry
    /// is torn down.
    pub(super) fn listen(
        self: &Arc<Self>,
        key: Src::Key,
        id: u64,
        signal: CancellationToken,
        detach: CancellationToken,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = detach.cancelled() => return,
                _ = signal.cancelled() => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(e) = inner.handle_abort(&key, id, &detach) {
                error!(
                    cache = %inner.config.name,
                    key = ?key,
                    error = %e,
                    "abort fired against a missing cache entry"
                );
            }
        });
    }

    /// Release one reference on entry `id` and schedule the purge check.
    ///
    /// An absent entry is only legitimate if it was torn down (its `detach`
    /// token is cancelled); anything else is a coordination bug and is
    /// reported as [`SubscriptionError::StaleAbort`].
    pub(crate) fn handle_abort(
        self: &Arc<Self>,
        key: &Src::Key,
        id: u64,
        detach: &CancellationToken,
    ) -> Result<(), Src::Error> {
        let mut entries = self.store.lock();
        let entry = match entries.get_mut(key) {
            Some(entry) if entry.id == id => entry,
            _ if detach.is_cancelled() => return Ok(()),
            _ => {
                metrics::counter!(telemetry::STALE_ABORTS_TOTAL, "cache" => self.config.name.clone())
                    .increment(1);
                return Err(SubscriptionError::StaleAbort((self.missing_entry_message)(
                    key,
                )));
            }
        };

        if !entry.purge_scheduled {
            entry.purge_scheduled = true;
            let weak = Arc::downgrade(self);
            let key = key.clone();
            defer(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.purge_if_idle(&key, id);
                }
            });
        }
        debug_assert!(entry.ref_count > 0, "reference count underflow");
        entry.ref_count = entry.ref_count.saturating_sub(1);
        debug!(key = ?key, ref_count = entry.ref_count, "reference released");
        Ok(())
    }

    /// The deferred check: tear entry `id` down if nobody re-acquired it.
    fn purge_if_idle(&self, key: &Src::Key, id: u64) {
        let mut entries = self.store.lock();
        let Some(entry) = entries.get_mut(key).filter(|entry| entry.id == id) else {
            return;
        };
        entry.purge_scheduled = false;
        if entry.ref_count > 0 {
            metrics::counter!(telemetry::PURGES_DEBOUNCED_TOTAL, "cache" => self.config.name.clone())
                .increment(1);
            debug!(key = ?key, ref_count = entry.ref_count, "purge skipped, entry re-acquired");
            return;
        }

        entry.token.cancel();
        remove_locked(&mut entries, key, id);
        drop(entries);
        self.record_teardown(key, TeardownReason::Idle);
    }
}
