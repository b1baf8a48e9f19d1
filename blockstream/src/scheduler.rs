//! Bounded-concurrency task queue.
//!
//! Runs an ordered sequence of fallible futures with at most `limit`
//! in flight; when one settles, the next queued task starts. Launch
//! order follows submission order, completion order does not. On the
//! first failure no further tasks are launched; the failure is
//! returned once every already-started task has settled, so callers
//! observe a quiescent system when the error surfaces.
//!
//! The queue has no cancellation primitive of its own: fetch tasks
//! observe the shared [`AbortToken`](crate::abort::AbortToken) and fail
//! fast, which drains the queue through the normal failure path.

use std::future::Future;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;

/// Runs `tasks` with at most `limit` running concurrently.
///
/// Returns `Ok(())` if every task succeeded, otherwise the first error
/// to settle (after all in-flight tasks have finished).
pub async fn run_queue<F, E>(tasks: Vec<F>, limit: usize) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
{
    let limit = limit.max(1);
    let mut pending = tasks.into_iter();
    let mut in_flight = FuturesUnordered::new();

    for task in pending.by_ref().take(limit) {
        in_flight.push(task);
    }

    let mut first_error = None;
    while let Some(result) = in_flight.next().await {
        match result {
            Ok(()) => {
                if first_error.is_none() {
                    if let Some(next) = pending.next() {
                        in_flight.push(next);
                    }
                }
            }
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    match first_error {
        None => Ok(()),
        Some(error) => Err(error),
    }
}
