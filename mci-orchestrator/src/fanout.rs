//! Bounded scatter/gather.
//!
//! Every fan-out in the engine (shared-resource preparation, VM
//! materialization, VM creation, VM control, status refresh) is the same
//! shape: run one async job per item with bounded concurrency and collect
//! the results in item order.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Hard cap on concurrent workers per fan-out, respecting CSP rate limits.
pub const MAX_CONCURRENCY: usize = 10;

/// Run `f` over every item with at most `max_concurrent` jobs in flight.
///
/// Results come back in item order. The closure receives the item's index so
/// jobs can pace themselves relative to their position in the batch.
pub async fn scatter<I, T, F, Fut>(items: I, max_concurrent: usize, f: F) -> Vec<T>
where
    I: IntoIterator,
    F: Fn(usize, I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| f(index, item)),
    )
    .buffered(max_concurrent.max(1))
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn results_keep_item_order() {
        let results = scatter(0..20usize, 4, |_, n| async move {
            // later items finish first
            tokio::time::sleep(std::time::Duration::from_millis((20 - n) as u64)).await;
            n * 2
        })
        .await;
        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        scatter(0..50usize, MAX_CONCURRENCY, |_, _| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENCY);
    }
}
