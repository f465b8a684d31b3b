//! Bridging deferred values into `std::future`.
//!
//! The core "waits" by registering continuations; it has no suspension
//! primitive of its own. Host event loops that speak `Future` get one
//! through [`Deferred::waiter`]: a continuation forwards the settled outcome
//! into a oneshot channel and [`Waiter`] resolves when it arrives.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::oneshot;
use pin_project::pin_project;

use crate::deferred::{Deferred, Outcome};

/// Error returned by [`Waiter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitError {
    /// Every handle and settler of the deferred value was dropped while it
    /// was still pending, so settlement can never happen.
    NeverSettled,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::NeverSettled => write!(f, "deferred value dropped before settling"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Future resolving to a deferred value's outcome.
///
/// Holds no strong reference to the deferred value itself — only the
/// receiving half of the channel. If the value is abandoned unsettled, the
/// sending half drops with it and the waiter resolves to
/// [`WaitError::NeverSettled`] instead of hanging.
#[pin_project]
pub struct Waiter<T, E> {
    #[pin]
    receiver: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Future for Waiter<T, E> {
    type Output = Result<Outcome<T, E>, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .receiver
            .poll(cx)
            .map(|settled| settled.map_err(|_canceled| WaitError::NeverSettled))
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// A future that resolves once this value settles, with the outcome
    /// carried verbatim.
    pub fn waiter(&self) -> Waiter<T, E> {
        let (sender, receiver) = oneshot::channel();
        self.chain(
            |value| Ok(Outcome::Success(value)),
            |reason| Ok(Outcome::Failure(reason)),
        )
        .then(move |outcome| {
            // The receiver may be gone; the outcome is simply discarded then.
            let _ = sender.send(outcome);
            Ok(())
        });
        Waiter { receiver }
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<Outcome<T, E>, WaitError>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.waiter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    fn poll_now<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
        let mut context = Context::from_waker(Waker::noop());
        Pin::new(future).poll(&mut context)
    }

    #[test]
    fn test_waiter_resolves_after_settlement() {
        let (deferred, settler) = Deferred::<i32, &str>::pending();
        let mut waiter = deferred.waiter();

        assert_eq!(poll_now(&mut waiter), Poll::Pending);
        settler.succeed(3);
        assert_eq!(poll_now(&mut waiter), Poll::Ready(Ok(Outcome::Success(3))));
    }

    #[test]
    fn test_waiter_on_already_settled_value() {
        let mut waiter = Deferred::<i32, &str>::succeed(7).waiter();
        assert_eq!(poll_now(&mut waiter), Poll::Ready(Ok(Outcome::Success(7))));
    }

    #[test]
    fn test_waiter_carries_failure_verbatim() {
        let mut waiter = Deferred::<i32, &str>::fail("down").waiter();
        assert_eq!(
            poll_now(&mut waiter),
            Poll::Ready(Ok(Outcome::Failure("down")))
        );
    }

    #[test]
    fn test_waiter_reports_abandonment() {
        let (deferred, settler) = Deferred::<i32, &str>::pending();
        let mut waiter = deferred.waiter();
        drop(deferred);
        drop(settler);
        assert_eq!(
            poll_now(&mut waiter),
            Poll::Ready(Err(WaitError::NeverSettled))
        );
    }

    #[test]
    fn test_into_future_delegates_to_waiter() {
        let mut waiter = Deferred::<i32, &str>::succeed(1).into_future();
        assert_eq!(poll_now(&mut waiter), Poll::Ready(Ok(Outcome::Success(1))));
    }
}
