//! Deferred values for single-threaded, reentrant code.
//!
//! A [`Deferred`] eventually holds exactly one [`Outcome`] — a success value
//! or a failure reason — and delivers it to continuations attached before or
//! after settlement. Settlement is synchronous and reentrant: continuations
//! run in registration order, inside the settling call, with no task-queue
//! indirection. That deliberately differs from host-builtin futures, which
//! defer continuations to a later scheduling turn; the [`wait`] module
//! bridges into `std::future` for callers that need an executor in the loop.
//!
//! ```
//! use soon::{Deferred, Outcome, join_all};
//!
//! let (value, settler) = Deferred::<i32, String>::pending();
//! let total = join_all([value.then(|n| Ok(n * 2)), Deferred::succeed(8)]);
//! settler.succeed(17);
//! assert_eq!(total.outcome(), Some(Outcome::Success(vec![34, 8])));
//! ```

/// Increment a lifecycle counter. No-op when the `metrics` feature is
/// disabled.
#[cfg(feature = "metrics")]
macro_rules! metric {
    ($counter:ident) => {
        $crate::metrics::$counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    };
    ($counter:ident, $amount:expr) => {
        $crate::metrics::$counter.fetch_add($amount, std::sync::atomic::Ordering::Relaxed);
    };
}

#[cfg(not(feature = "metrics"))]
macro_rules! metric {
    ($counter:ident) => {};
    ($counter:ident, $amount:expr) => {};
}

pub(crate) use metric;

pub mod combine;
pub mod deferred;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod wait;

pub use combine::{join_all, race};
pub use deferred::{Deferred, IntoDeferred, Outcome, Settler};
pub use wait::{WaitError, Waiter};
