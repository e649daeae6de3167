//! Bounded script queue between a table's producer and consumer.
//!
//! Exactly one producer and one consumer share a queue, so each side waits
//! on its own [`Notify`] and wakes the other with `notify_one`.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::core::Script;

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Script>,
    closed: bool,
    aborted: bool,
    high_water: usize,
}

/// Script queue with backpressure.
///
/// The producer waits in [`push`](Self::push) while `capacity` scripts are
/// pending; the script is enqueued once there is room, so at most
/// `capacity` scripts are ever pending.
#[derive(Debug)]
pub struct ScriptQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    space: Notify,
    ready: Notify,
}

impl ScriptQueue {
    /// Create a queue that holds at most `capacity` pending scripts.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner::default()),
            space: Notify::new(),
            ready: Notify::new(),
        }
    }

    /// Backpressure bound for a read-ahead of `read_pages` windows.
    pub fn for_read_pages(read_pages: usize) -> Self {
        Self::new(read_pages.max(1) * 3)
    }

    /// Maximum pending scripts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a script, waiting for room.
    ///
    /// Returns false without enqueuing if the consumer has aborted.
    pub async fn push(&self, script: Script) -> bool {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.aborted {
                    return false;
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(script);
                    inner.high_water = inner.high_water.max(inner.items.len());
                    drop(inner);
                    self.ready.notify_one();
                    return true;
                }
            }
            self.space.notified().await;
        }
    }

    /// Dequeue the next script, waiting while the queue is empty and the
    /// producer is still running.
    ///
    /// Returns `None` once the producer has closed the queue and every
    /// script has been taken, or after an abort.
    pub async fn pop(&self) -> Option<Script> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.aborted {
                    return None;
                }
                if let Some(script) = inner.items.pop_front() {
                    drop(inner);
                    self.space.notify_one();
                    return Some(script);
                }
                if inner.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    /// Producer side: no more scripts will be pushed.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.ready.notify_one();
    }

    /// Consumer side: stop accepting scripts and drop pending ones.
    pub async fn abort(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.aborted = true;
            inner.items.clear();
        }
        self.space.notify_one();
    }

    /// Whether the consumer has aborted.
    pub async fn is_aborted(&self) -> bool {
        self.inner.lock().await.aborted
    }

    /// Scripts currently pending.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Whether no scripts are pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Largest number of scripts ever pending at once.
    pub async fn high_water(&self) -> usize {
        self.inner.lock().await.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScriptBody;
    use std::sync::Arc;
    use std::time::Duration;

    fn script(rows: usize) -> Script {
        Script {
            rows,
            body: ScriptBody::Sql(vec![format!("-- {}", rows)]),
        }
    }

    #[tokio::test]
    async fn test_fifo_and_close() {
        let q = ScriptQueue::new(4);
        assert!(q.push(script(1)).await);
        assert!(q.push(script(2)).await);
        q.close().await;

        assert_eq!(q.pop().await.map(|s| s.rows), Some(1));
        assert_eq!(q.pop().await.map(|s| s.rows), Some(2));
        assert!(q.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_blocks_at_capacity() {
        let q = Arc::new(ScriptQueue::new(2));
        let producer = {
            let q = q.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    assert!(q.push(script(i)).await);
                }
                q.close().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.len().await, 2);

        let mut seen = Vec::new();
        while let Some(s) = q.pop().await {
            seen.push(s.rows);
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(q.high_water().await <= 2);
    }

    #[tokio::test]
    async fn test_abort_releases_blocked_producer() {
        let q = Arc::new(ScriptQueue::new(1));
        assert!(q.push(script(0)).await);

        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.push(script(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.abort().await;

        assert!(!producer.await.unwrap());
        assert!(q.pop().await.is_none());
        assert!(q.is_aborted().await);
    }

    #[test]
    fn test_capacity_from_read_pages() {
        assert_eq!(ScriptQueue::for_read_pages(4).capacity(), 12);
        assert_eq!(ScriptQueue::for_read_pages(0).capacity(), 3);
    }
}
