//! Bounded concurrency executor
//!
//! Fans a worker out over a list of items with at most `concurrency` futures
//! in flight. Every outcome is collected in input order; one failure never
//! cancels its siblings. Futures are polled cooperatively on the calling task,
//! so the worker does not need to be `'static`.

use std::future::Future;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tracing::debug;

/// Runs `worker` over `items`, at most `concurrency` at a time.
///
/// A `concurrency` of zero is treated as one.
pub async fn run<I, T, E, F, Fut>(items: I, worker: F, concurrency: usize) -> Vec<Result<T, E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let limit = concurrency.max(1);
    let results: Vec<Result<T, E>> = stream::iter(items)
        .map(worker)
        .buffered(limit)
        .collect()
        .await;

    let failures = results.iter().filter(|r| r.is_err()).count();
    if failures > 0 {
        counter!("executor_item_failures_total").increment(failures as u64);
        debug!(
            total = results.len(),
            failures, concurrency = limit, "Bounded fan-out finished with failures"
        );
    }
    results
}

/// Splits executor results into successes and failures, keeping their order.
pub fn partition<T, E>(results: Vec<Result<T, E>>) -> (Vec<T>, Vec<E>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(err) => failed.push(err),
        }
    }
    (ok, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run(
            0..50u64,
            |i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1 + i % 3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(i)
                }
            },
            5,
        )
        .await;

        assert_eq!(results.len(), 50);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        let values: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let results = run(
            1..=6,
            |i: i32| async move {
                if i % 3 == 0 {
                    Err(format!("item {i} failed"))
                } else {
                    Ok(i * 10)
                }
            },
            2,
        )
        .await;

        let (ok, failed) = partition(results);
        assert_eq!(ok, vec![10, 20, 40, 50]);
        assert_eq!(failed, vec!["item 3 failed", "item 6 failed"]);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let results = run(vec!["a", "b"], |s| async move { Ok::<_, ()>(s.len()) }, 0).await;
        assert_eq!(results, vec![Ok(1), Ok(1)]);
    }
}
