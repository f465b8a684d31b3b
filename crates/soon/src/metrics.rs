//! Lifecycle counters for the deferred-value core.
//!
//! Enabled via `--features metrics`. Call sites go through the `metric!`
//! macro, which compiles to a no-op when the feature is disabled.

use std::sync::atomic::{AtomicU64, Ordering};

/// Deferred values created (pending pairs and pre-settled constructors).
pub static DEFERREDS_CREATED: AtomicU64 = AtomicU64::new(0);
/// Settlements that landed on the success side.
pub static SETTLED_SUCCESS: AtomicU64 = AtomicU64::new(0);
/// Settlements that landed on the failure side.
pub static SETTLED_FAILURE: AtomicU64 = AtomicU64::new(0);
/// Settle calls ignored because the value had already settled.
pub static SETTLES_IGNORED: AtomicU64 = AtomicU64::new(0);
/// Continuation pairs queued on still-pending values.
pub static CONTINUATIONS_QUEUED: AtomicU64 = AtomicU64::new(0);
/// Continuations actually delivered (at settlement or on late registration).
pub static CONTINUATIONS_RUN: AtomicU64 = AtomicU64::new(0);

/// Emit all counters as one `tracing` event.
pub fn dump_to_log() {
    tracing::info!(
        created = DEFERREDS_CREATED.load(Ordering::Relaxed),
        settled_success = SETTLED_SUCCESS.load(Ordering::Relaxed),
        settled_failure = SETTLED_FAILURE.load(Ordering::Relaxed),
        settles_ignored = SETTLES_IGNORED.load(Ordering::Relaxed),
        continuations_queued = CONTINUATIONS_QUEUED.load(Ordering::Relaxed),
        continuations_run = CONTINUATIONS_RUN.load(Ordering::Relaxed),
        "deferred-value counters"
    );
}

/// Reset all counters to zero.
pub fn reset() {
    DEFERREDS_CREATED.store(0, Ordering::Relaxed);
    SETTLED_SUCCESS.store(0, Ordering::Relaxed);
    SETTLED_FAILURE.store(0, Ordering::Relaxed);
    SETTLES_IGNORED.store(0, Ordering::Relaxed);
    CONTINUATIONS_QUEUED.store(0, Ordering::Relaxed);
    CONTINUATIONS_RUN.store(0, Ordering::Relaxed);
}
