//! # CompositeWorkQueue: fair take over several queues.
//!
//! Presents N child [`WorkQueue`]s as one logical stream. A take scans the
//! children starting from a rotating cursor, so no child starves when
//! several are ready at once. Used to multiplex publish and confirm streams
//! into a single serial pump.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::select_all;
use tokio_util::sync::CancellationToken;

use super::queue::{QueueEntry, WorkQueue};

/// Logical union over multiple work queues with round-robin fairness.
pub struct CompositeWorkQueue<I> {
    children: Vec<Arc<WorkQueue<I>>>,
    cursor: AtomicUsize,
}

impl<I: QueueEntry> CompositeWorkQueue<I> {
    /// Builds the union. `children` must not be empty.
    pub fn new(children: Vec<Arc<WorkQueue<I>>>) -> Self {
        assert!(!children.is_empty(), "composite queue needs children");
        Self {
            children,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Takes the earliest ready entry across children, rotating the start
    /// position between calls. Suspends until something is ready or
    /// `cancel` fires.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<I> {
        let n = self.children.len();
        loop {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            for k in 0..n {
                if let Some(item) = self.children[(start + k) % n].try_take() {
                    return Some(item);
                }
            }

            let waits: Vec<_> = self
                .children
                .iter()
                .map(|q| Box::pin(q.readiness().notified()))
                .collect();
            tokio::select! {
                _ = select_all(waits) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Total queued entries across children.
    pub fn len(&self) -> usize {
        self.children.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::item::WorkItem;
    use std::time::Duration;

    type Item = Arc<WorkItem<u32, (), &'static str>>;

    fn item(n: u32) -> Item {
        WorkItem::new(n, CancellationToken::new()).0
    }

    #[tokio::test]
    async fn drains_entries_from_every_child() {
        let a = Arc::new(WorkQueue::new());
        let b = Arc::new(WorkQueue::new());
        a.put(item(1));
        b.put(item(10));
        a.put(item(2));

        let q = CompositeWorkQueue::new(vec![a, b]);
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(*q.take(&cancel).await.unwrap().payload());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn rotation_avoids_starving_a_busy_sibling() {
        let a = Arc::new(WorkQueue::new());
        let b = Arc::new(WorkQueue::new());
        for i in 0..4 {
            a.put(item(i));
            b.put(item(100 + i));
        }

        let q = CompositeWorkQueue::new(vec![a, b]);
        let cancel = CancellationToken::new();
        let mut from_b = 0;
        for _ in 0..4 {
            if *q.take(&cancel).await.unwrap().payload() >= 100 {
                from_b += 1;
            }
        }
        assert!(from_b >= 1, "child b never served");
    }

    #[tokio::test]
    async fn wakes_when_any_child_receives_work() {
        let a: Arc<WorkQueue<Item>> = Arc::new(WorkQueue::new());
        let b = Arc::new(WorkQueue::new());
        let q = CompositeWorkQueue::new(vec![a, Arc::clone(&b)]);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.put(item(5));
        });

        let cancel = CancellationToken::new();
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 5);
    }

    #[tokio::test]
    async fn cancellation_unblocks_an_empty_take() {
        let a: Arc<WorkQueue<Item>> = Arc::new(WorkQueue::new());
        let q = CompositeWorkQueue::new(vec![a]);
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.cancel();
        });
        assert!(q.take(&cancel).await.is_none());
    }
}
