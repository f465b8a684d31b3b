//! The deferred-value core: a settle-once container with ordered,
//! synchronously-delivered continuations.
//!
//! A [`Deferred`] starts pending, settles exactly once to a success value or
//! a failure reason, and never changes afterwards. Observers attach
//! continuations through the chaining operations; continuations registered
//! while pending run in registration order at the moment of settlement, and
//! continuations registered after settlement run immediately, inside the
//! registering call.
//!
//! Settlement is synchronous and reentrant: there is no task queue between a
//! settle call and the continuations it fires. A continuation may settle
//! other deferred values or register further continuations, and those nested
//! effects resolve within the same call stack. Host-builtin futures defer
//! continuations to a later scheduling turn instead; callers that need that
//! behavior can go through [`waiter`](Deferred::waiter) and their own
//! executor.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); the types are
//! intentionally `!Send`. The `RefCell` borrow is always released before any
//! user-supplied routine runs, so reentrant calls never observe a held
//! borrow.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::metric;

// --- Outcome ---

/// The terminal result of a deferred value: a success value or a failure
/// reason.
///
/// A failure reason is ordinary data, not an `Error` wrapper: whatever the
/// settling side passes to [`Settler::fail`] is propagated verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<T, E> {
    /// The computation produced a value.
    Success(T),
    /// The computation failed with a reason.
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True for [`Outcome::Failure`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(reason) => Outcome::Failure(reason),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        match outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(reason) => Err(reason),
        }
    }
}

// --- Shared state ---

type SuccessContinuation<T> = Box<dyn FnOnce(T)>;
type FailureContinuation<E> = Box<dyn FnOnce(E)>;

/// Phase of one deferred value. Transitions only `Pending -> Settled`; the
/// payload lives inside `Settled`, so a settled phase without a payload is
/// unrepresentable.
enum Phase<T, E> {
    Pending {
        on_success: SmallVec<[SuccessContinuation<T>; 1]>,
        on_failure: SmallVec<[FailureContinuation<E>; 1]>,
    },
    Settled(Outcome<T, E>),
}

struct Inner<T, E> {
    /// Process-unique debug id, used in `Debug` output and trace events.
    id: u64,
    phase: Phase<T, E>,
}

impl<T, E> Inner<T, E> {
    fn phase_name(&self) -> &'static str {
        match &self.phase {
            Phase::Pending { .. } => "pending",
            Phase::Settled(Outcome::Success(_)) => "success",
            Phase::Settled(Outcome::Failure(_)) => "failure",
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Transition to `Settled` and deliver the matching continuation list.
///
/// The first call wins; any later call is a no-op. Continuations run after
/// the `RefCell` borrow is released, in registration order, each with its
/// own clone of the payload. The non-matching list is carried out of the
/// borrow as well, so its closures are dropped without the lock held.
fn settle<T, E>(inner: &Rc<RefCell<Inner<T, E>>>, outcome: Outcome<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    // The last field carries the non-matching continuation list out of the
    // borrow, so user closures are only dropped with the borrow released.
    enum Batch<T, E> {
        Success(
            SmallVec<[SuccessContinuation<T>; 1]>,
            T,
            SmallVec<[FailureContinuation<E>; 1]>,
        ),
        Failure(
            SmallVec<[FailureContinuation<E>; 1]>,
            E,
            SmallVec<[SuccessContinuation<T>; 1]>,
        ),
    }

    let id;
    let batch;
    {
        let mut guard = inner.borrow_mut();
        id = guard.id;
        let Phase::Pending {
            on_success,
            on_failure,
        } = &mut guard.phase
        else {
            debug!(id = guard.id, "settle ignored, value already settled");
            metric!(SETTLES_IGNORED);
            return;
        };
        let success_queue = mem::take(on_success);
        let failure_queue = mem::take(on_failure);
        batch = match &outcome {
            Outcome::Success(value) => {
                metric!(SETTLED_SUCCESS);
                Batch::Success(success_queue, value.clone(), failure_queue)
            }
            Outcome::Failure(reason) => {
                metric!(SETTLED_FAILURE);
                Batch::Failure(failure_queue, reason.clone(), success_queue)
            }
        };
        guard.phase = Phase::Settled(outcome);
    }

    match batch {
        Batch::Success(continuations, value, unfired) => {
            drop(unfired);
            trace!(
                id,
                outcome = "success",
                continuations = continuations.len(),
                "settled"
            );
            metric!(CONTINUATIONS_RUN, continuations.len() as u64);
            for continuation in continuations {
                continuation(value.clone());
            }
        }
        Batch::Failure(continuations, reason, unfired) => {
            drop(unfired);
            trace!(
                id,
                outcome = "failure",
                continuations = continuations.len(),
                "settled"
            );
            metric!(CONTINUATIONS_RUN, continuations.len() as u64);
            for continuation in continuations {
                continuation(reason.clone());
            }
        }
    }
}

// --- Settler ---

/// The settle capability of one pending [`Deferred`].
///
/// Clonable and callable from any call site the constructor hands it to;
/// only the first [`succeed`](Settler::succeed) or [`fail`](Settler::fail)
/// across all clones has any effect.
pub struct Settler<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Settler<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Settle the value successfully. No-op if already settled.
    pub fn succeed(&self, value: T) {
        settle(&self.inner, Outcome::Success(value));
    }

    /// Settle the value as failed. No-op if already settled.
    pub fn fail(&self, reason: E) {
        settle(&self.inner, Outcome::Failure(reason));
    }
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Settler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.borrow();
        f.debug_struct("Settler")
            .field("id", &guard.id)
            .field("phase", &guard.phase_name())
            .finish()
    }
}

// --- Deferred ---

/// A value that is not known yet: pending until it settles exactly once to
/// success or failure, then immutable forever.
///
/// Handles are cheap clones of shared state. Payloads are `Clone` because a
/// settled value may be delivered to several observers; each continuation
/// receives its own clone.
///
/// # Example
///
/// ```
/// use soon::{Deferred, Outcome};
///
/// let (value, settler) = Deferred::<i32, String>::pending();
/// let doubled = value.then(|n| Ok(n * 2));
/// settler.succeed(21);
/// assert_eq!(doubled.outcome(), Some(Outcome::Success(42)));
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create a pending value together with its settle capability, shaped
    /// like a oneshot channel.
    pub fn pending() -> (Self, Settler<T, E>) {
        let inner = Rc::new(RefCell::new(Inner {
            id: next_id(),
            phase: Phase::Pending {
                on_success: SmallVec::new(),
                on_failure: SmallVec::new(),
            },
        }));
        trace!(id = inner.borrow().id, "deferred created");
        metric!(DEFERREDS_CREATED);
        (
            Self {
                inner: Rc::clone(&inner),
            },
            Settler { inner },
        )
    }

    /// Create a deferred value from a setup routine that receives the settle
    /// capability and may settle it synchronously or hand it off for later.
    ///
    /// If `setup` returns `Err`, the value settles to failure with that
    /// reason — unless it already settled earlier in the same call, in which
    /// case the earlier settlement wins.
    pub fn new<S>(setup: S) -> Self
    where
        S: FnOnce(Settler<T, E>) -> Result<(), E>,
    {
        let (deferred, settler) = Self::pending();
        if let Err(reason) = setup(settler.clone()) {
            settler.fail(reason);
        }
        deferred
    }

    /// An already-successful value.
    pub fn succeed(value: T) -> Self {
        let (deferred, settler) = Self::pending();
        settler.succeed(value);
        deferred
    }

    /// An already-failed value.
    pub fn fail(reason: E) -> Self {
        let (deferred, settler) = Self::pending();
        settler.fail(reason);
        deferred
    }

    /// True while no settlement has happened.
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().phase, Phase::Pending { .. })
    }

    /// True once the value has settled.
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// A clone of the settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Outcome<T, E>> {
        match &self.inner.borrow().phase {
            Phase::Settled(outcome) => Some(outcome.clone()),
            Phase::Pending { .. } => None,
        }
    }

    /// Attach a continuation pair. While pending, both are queued; once
    /// settled, the matching one runs immediately, inside this call.
    fn register(&self, on_success: SuccessContinuation<T>, on_failure: FailureContinuation<E>) {
        enum Registered<T, E> {
            Queued,
            RunSuccess(SuccessContinuation<T>, T),
            RunFailure(FailureContinuation<E>, E),
        }

        let action = {
            let mut guard = self.inner.borrow_mut();
            let id = guard.id;
            match &mut guard.phase {
                Phase::Pending {
                    on_success: success_queue,
                    on_failure: failure_queue,
                } => {
                    success_queue.push(on_success);
                    failure_queue.push(on_failure);
                    metric!(CONTINUATIONS_QUEUED);
                    Registered::Queued
                }
                Phase::Settled(Outcome::Success(value)) => {
                    trace!(id = id, "late registration, delivering success now");
                    Registered::RunSuccess(on_success, value.clone())
                }
                Phase::Settled(Outcome::Failure(reason)) => {
                    trace!(id = id, "late registration, delivering failure now");
                    Registered::RunFailure(on_failure, reason.clone())
                }
            }
        };

        match action {
            Registered::Queued => {}
            Registered::RunSuccess(continuation, value) => {
                metric!(CONTINUATIONS_RUN);
                continuation(value);
            }
            Registered::RunFailure(continuation, reason) => {
                metric!(CONTINUATIONS_RUN);
                continuation(reason);
            }
        }
    }

    /// Derive a new deferred value from this one's eventual outcome.
    ///
    /// `on_success` receives the value; `Ok` settles the result
    /// successfully, `Err` settles it as failed. `on_failure` receives the
    /// reason; `Ok` *recovers* the chain into a success, `Err` fails it
    /// (with the same or a replaced reason).
    ///
    /// The no-handler forms are spelled with the identity constructors:
    /// `chain(Ok, Err)` forwards the value and propagates the reason
    /// verbatim. The result is never left pending if this value settles.
    pub fn chain<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Result<U, E> + 'static,
        F: FnOnce(E) -> Result<U, E> + 'static,
    {
        let (next, settler) = Deferred::pending();
        let failure_settler = settler.clone();
        self.register(
            Box::new(move |value| match on_success(value) {
                Ok(chained) => settler.succeed(chained),
                Err(reason) => settler.fail(reason),
            }),
            Box::new(move |reason| match on_failure(reason) {
                Ok(recovered) => failure_settler.succeed(recovered),
                Err(reason) => failure_settler.fail(reason),
            }),
        );
        next
    }

    /// Success-side convenience: `chain(on_success, Err)`.
    pub fn then<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Result<U, E> + 'static,
    {
        self.chain(on_success, Err)
    }

    /// Failure-side convenience: `chain(Ok, on_failure)`. A handler that
    /// returns `Ok` recovers the chain into a success.
    pub fn on_error<F>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + 'static,
    {
        self.chain(Ok, on_failure)
    }

    /// Run `cleanup` whichever way this value settles, without altering a
    /// successful outcome.
    ///
    /// On success, the original value is forwarded once the cleanup's own
    /// deferred value settles; the cleanup's value is discarded. On failure,
    /// the original reason is re-raised after the cleanup settles, so a
    /// cleanup cannot silently swallow an error. A failing cleanup replaces
    /// the outcome with its own reason in both cases.
    ///
    /// `cleanup` may return `()`, a `Result`, or a still-pending [`Deferred`]
    /// — see [`IntoDeferred`]. A directly-returned value counts as an
    /// immediately-successful cleanup; a pending one is awaited before the
    /// result settles.
    pub fn finally<C, R, U>(&self, cleanup: C) -> Deferred<T, E>
    where
        C: FnOnce() -> R + 'static,
        R: IntoDeferred<U, E>,
        U: Clone + 'static,
    {
        let (next, settler) = Deferred::pending();
        // Both paths need the cleanup routine, but settle-once guarantees
        // only one of them ever takes it out of the shared slot.
        let slot = Rc::new(Cell::new(Some(cleanup)));

        let success_slot = Rc::clone(&slot);
        let success_settler = settler.clone();
        let failure_slot = slot;
        let failure_settler = settler;

        self.register(
            Box::new(move |value: T| {
                let Some(cleanup) = success_slot.take() else {
                    return;
                };
                let forward = success_settler.clone();
                let surface = success_settler;
                cleanup().into_deferred().chain::<(), _, _>(
                    move |_cleanup_value| {
                        forward.succeed(value);
                        Ok(())
                    },
                    move |cleanup_reason| {
                        surface.fail(cleanup_reason);
                        Ok(())
                    },
                );
            }),
            Box::new(move |reason: E| {
                let Some(cleanup) = failure_slot.take() else {
                    return;
                };
                let reraise = failure_settler.clone();
                let surface = failure_settler;
                cleanup().into_deferred().chain::<(), _, _>(
                    move |_cleanup_value| {
                        reraise.fail(reason);
                        Ok(())
                    },
                    move |cleanup_reason| {
                        surface.fail(cleanup_reason);
                        Ok(())
                    },
                );
            }),
        );
        next
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("id", &guard.id)
            .field("phase", &guard.phase_name())
            .finish()
    }
}

// --- IntoDeferred ---

/// Lifts plain values into deferred ones, in the `IntoFuture` mold.
///
/// Used by [`Deferred::finally`] to accept cleanup routines that return
/// nothing, a `Result`, or a deferred value of their own.
pub trait IntoDeferred<T, E> {
    fn into_deferred(self) -> Deferred<T, E>;
}

impl<T, E> IntoDeferred<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn into_deferred(self) -> Deferred<T, E> {
        self
    }
}

impl<T, E> IntoDeferred<T, E> for Result<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn into_deferred(self) -> Deferred<T, E> {
        match self {
            Ok(value) => Deferred::succeed(value),
            Err(reason) => Deferred::fail(reason),
        }
    }
}

impl<E> IntoDeferred<(), E> for ()
where
    E: Clone + 'static,
{
    fn into_deferred(self) -> Deferred<(), E> {
        Deferred::succeed(())
    }
}
