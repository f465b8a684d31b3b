//! Aggregation combinators over deferred values.
//!
//! Both combinators are written strictly against the public chaining
//! contract — they never reach into the core's shared state, so they keep
//! working if the core's internals change.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::deferred::Deferred;

/// Wait for every item, fail fast on the first failure.
///
/// The result preserves input order regardless of completion order: each
/// item writes its value into the slot matching its input position, and the
/// aggregate settles once every slot is filled. If any item fails, the
/// aggregate fails with the first observed reason; later settlements of the
/// other items are observed but have no further effect.
///
/// An empty input settles to success with an empty vector immediately.
pub fn join_all<T, E, I>(items: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let items: Vec<Deferred<T, E>> = items.into_iter().collect();
    let (aggregate, settler) = Deferred::pending();

    let total = items.len();
    if total == 0 {
        settler.succeed(Vec::new());
        return aggregate;
    }

    let slots: Rc<RefCell<Vec<Option<T>>>> =
        Rc::new(RefCell::new((0..total).map(|_| None).collect()));
    let completed = Rc::new(Cell::new(0_usize));

    for (index, item) in items.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let completed = Rc::clone(&completed);
        let on_success = settler.clone();
        let on_failure = settler.clone();
        item.chain::<(), _, _>(
            move |value| {
                // Fill the slot and settle outside the borrow: settling runs
                // the aggregate's continuations reentrantly.
                let results = {
                    let mut slots = slots.borrow_mut();
                    slots[index] = Some(value);
                    completed.set(completed.get() + 1);
                    (completed.get() == total)
                        .then(|| slots.drain(..).flatten().collect::<Vec<T>>())
                };
                if let Some(results) = results {
                    on_success.succeed(results);
                }
                Ok(())
            },
            move |reason| {
                on_failure.fail(reason);
                Ok(())
            },
        );
    }

    aggregate
}

/// Settle with whichever item settles first, success or failure, verbatim.
///
/// Every item's outcome is forwarded into the aggregate's settler; only the
/// first arrival has any effect. An empty input has no settlement source, so
/// the aggregate stays pending forever — callers racing a possibly-empty
/// collection must handle that themselves.
pub fn race<T, E, I>(items: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    I: IntoIterator<Item = Deferred<T, E>>,
{
    let (aggregate, settler) = Deferred::pending();

    for item in items {
        let on_success = settler.clone();
        let on_failure = settler.clone();
        item.chain::<(), _, _>(
            move |value| {
                on_success.succeed(value);
                Ok(())
            },
            move |reason| {
                on_failure.fail(reason);
                Ok(())
            },
        );
    }

    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::Outcome;

    #[test]
    fn test_join_all_preserves_input_order() {
        let (first, first_settler) = Deferred::<i32, &str>::pending();
        let (second, second_settler) = Deferred::<i32, &str>::pending();
        let aggregate = join_all([first, second]);

        // Completion order is reversed relative to input order.
        second_settler.succeed(2);
        assert!(aggregate.is_pending());
        first_settler.succeed(1);

        assert_eq!(aggregate.outcome(), Some(Outcome::Success(vec![1, 2])));
    }

    #[test]
    fn test_join_all_with_already_settled_items() {
        let aggregate = join_all([
            Deferred::<i32, &str>::succeed(1),
            Deferred::succeed(2),
            Deferred::succeed(3),
        ]);
        assert_eq!(aggregate.outcome(), Some(Outcome::Success(vec![1, 2, 3])));
    }

    #[test]
    fn test_join_all_fails_fast_with_first_reason() {
        let (first, first_settler) = Deferred::<i32, &str>::pending();
        let (second, second_settler) = Deferred::<i32, &str>::pending();
        let aggregate = join_all([first, second]);

        second_settler.fail("boom");
        assert_eq!(aggregate.outcome(), Some(Outcome::Failure("boom")));

        // A later success of the remaining item has no further effect.
        first_settler.succeed(1);
        assert_eq!(aggregate.outcome(), Some(Outcome::Failure("boom")));
    }

    #[test]
    fn test_join_all_later_failures_are_ignored() {
        let (first, first_settler) = Deferred::<i32, &str>::pending();
        let (second, second_settler) = Deferred::<i32, &str>::pending();
        let aggregate = join_all([first, second]);

        first_settler.fail("first");
        second_settler.fail("second");
        assert_eq!(aggregate.outcome(), Some(Outcome::Failure("first")));
    }

    #[test]
    fn test_join_all_empty_settles_immediately() {
        let aggregate = join_all(Vec::<Deferred<i32, &str>>::new());
        assert_eq!(aggregate.outcome(), Some(Outcome::Success(Vec::new())));
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let (never, _kept_settler) = Deferred::<i32, &str>::pending();
        let winner = race([never, Deferred::succeed(1)]);
        assert_eq!(winner.outcome(), Some(Outcome::Success(1)));
    }

    #[test]
    fn test_race_later_settlement_has_no_effect() {
        let (slow, slow_settler) = Deferred::<i32, &str>::pending();
        let winner = race([slow, Deferred::succeed(1)]);
        slow_settler.succeed(2);
        assert_eq!(winner.outcome(), Some(Outcome::Success(1)));
    }

    #[test]
    fn test_race_forwards_a_first_failure() {
        let (never, _kept_settler) = Deferred::<i32, &str>::pending();
        let winner = race([never, Deferred::fail("lost")]);
        assert_eq!(winner.outcome(), Some(Outcome::Failure("lost")));
    }

    #[test]
    fn test_race_empty_stays_pending() {
        let winner = race(Vec::<Deferred<i32, &str>>::new());
        assert!(winner.is_pending());
    }
}
