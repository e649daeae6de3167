//! Fixed-size worker pool over a shared work list.
//!
//! Workers loop "claim one item, run it, claim the next" until the list is
//! empty. An item is removed from the list before it runs, so no two
//! workers ever hold the same item.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `worker` over `items` with at most `pool_size` in flight.
///
/// Items are claimed in list order. Once `cancel` fires no new item is
/// claimed; items already running finish normally. Returns the results of
/// the items that ran (in completion order) and the items never claimed.
pub async fn dispatch<T, R, F, Fut>(
    items: Vec<T>,
    pool_size: usize,
    cancel: &CancellationToken,
    worker: F,
) -> (Vec<R>, Vec<T>)
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let pool_size = pool_size.max(1).min(items.len().max(1));
    let pending = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<T>>()));
    let results = Arc::new(Mutex::new(Vec::new()));
    let worker = Arc::new(worker);

    let mut handles = Vec::with_capacity(pool_size);
    for worker_id in 0..pool_size {
        let pending = pending.clone();
        let results = results.clone();
        let worker = worker.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let mut ran = 0usize;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(item) = pending.lock().await.pop_front() else {
                    break;
                };
                let result = worker(item).await;
                results.lock().await.push(result);
                ran += 1;
            }
            debug!("Worker {}: finished after {} items", worker_id, ran);
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Pool worker task failed: {}", e);
        }
    }

    let results = std::mem::take(&mut *results.lock().await);
    let unclaimed = std::mem::take(&mut *pending.lock().await).into_iter().collect();
    (results, unclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_item_runs_once() {
        let cancel = CancellationToken::new();
        let (results, unclaimed) =
            dispatch((0..50).collect(), 4, &cancel, |i: u32| async move { i * 2 }).await;

        assert!(unclaimed.is_empty());
        let seen: HashSet<u32> = results.into_iter().collect();
        assert_eq!(seen.len(), 50);
        assert!(seen.contains(&98));
    }

    #[tokio::test]
    async fn test_pool_size_bounds_concurrency() {
        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (results, _) = {
            let active = active.clone();
            let peak = peak.clone();
            dispatch((0..20).collect::<Vec<u32>>(), 3, &cancel, move |_| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
        };

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_claiming() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let (results, unclaimed) = dispatch((0..10).collect::<Vec<u32>>(), 1, &cancel, move |i| {
            let trigger = trigger.clone();
            async move {
                if i == 2 {
                    trigger.cancel();
                }
                i
            }
        })
        .await;

        assert_eq!(results, vec![0, 1, 2]);
        assert_eq!(unclaimed, (3..10).collect::<Vec<_>>());
    }
}
