//! Telemetry metric name constants.
//!
//! Centralised metric names for subscription cache operations. Consumers
//! install their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `hvergelmir_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `cache` — factory name from [`CacheConfig::name`](crate::CacheConfig::name)
//! - `reason` — teardown trigger: "idle", "completed" or "create_failed"

/// Acquisitions that joined an existing entry.
///
/// Labels: `cache`.
pub const CACHE_HITS_TOTAL: &str = "hvergelmir_cache_hits_total";

/// Acquisitions that created a new entry.
///
/// Labels: `cache`.
pub const CACHE_MISSES_TOTAL: &str = "hvergelmir_cache_misses_total";

/// Acquisitions that bypassed the store (uncacheable key).
///
/// Labels: `cache`.
pub const UNCACHED_TOTAL: &str = "hvergelmir_uncached_total";

/// Stream creations that failed.
///
/// Labels: `cache`.
pub const CREATE_FAILURES_TOTAL: &str = "hvergelmir_create_failures_total";

/// Entries removed from the store.
///
/// Labels: `cache`, `reason` ("idle" | "completed" | "create_failed").
pub const TEARDOWNS_TOTAL: &str = "hvergelmir_teardowns_total";

/// Deferred purges that found a new reference and kept the entry alive.
///
/// Labels: `cache`.
pub const PURGES_DEBOUNCED_TOTAL: &str = "hvergelmir_purges_debounced_total";

/// Abort signals that fired against a missing entry.
///
/// Labels: `cache`.
pub const STALE_ABORTS_TOTAL: &str = "hvergelmir_stale_aborts_total";

/// Entries currently held in the store.
///
/// Labels: `cache`.
pub const ACTIVE_ENTRIES: &str = "hvergelmir_active_entries";
