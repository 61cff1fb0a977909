//! # WorkQueue: unbounded FIFO of cancelable entries.
//!
//! [`WorkQueue`] stores anything implementing [`QueueEntry`]. Taking an
//! entry first *claims* it; entries that refuse the claim (already settled,
//! cancellation fired) are dropped and the take moves on, so a consumer
//! never observes dead work.
//!
//! ## Rules
//! - FIFO among live entries.
//! - `take` suspends until an entry is available or the caller's
//!   cancellation fires (`None`).
//! - One pump consumes each queue; wakeups assume a single concurrent
//!   taker per queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::work::item::WorkItem;

/// Behavior a [`WorkQueue`] needs from its entries.
pub trait QueueEntry: Send + Sync + 'static {
    /// Claims the entry for the consumer; `false` means skip and drop it.
    fn claim(&self) -> bool {
        true
    }

    /// Per-entry cancellation, observed by
    /// [`AutoCancellingQueue`](crate::work::AutoCancellingQueue).
    fn cancellation(&self) -> Option<CancellationToken> {
        None
    }

    /// Settles the entry as canceled while it sits in a queue.
    fn cancel_pending(&self) {}

    /// Signal that fires once the entry no longer needs queue-side watching.
    fn done_signal(&self) -> Option<CancellationToken> {
        None
    }

    /// Returns the entry to queue residency (retry re-queue).
    fn release(&self) {}
}

impl<T, R, E> QueueEntry for std::sync::Arc<WorkItem<T, R, E>>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn claim(&self) -> bool {
        WorkItem::claim(self)
    }

    fn cancellation(&self) -> Option<CancellationToken> {
        Some(self.cancel_token().clone())
    }

    fn cancel_pending(&self) {
        WorkItem::cancel_pending(self)
    }

    fn done_signal(&self) -> Option<CancellationToken> {
        Some(self.done_token().clone())
    }

    fn release(&self) {
        WorkItem::release(self)
    }
}

/// Unbounded FIFO of [`QueueEntry`] values.
pub struct WorkQueue<I> {
    items: Mutex<VecDeque<I>>,
    notify: Notify,
}

impl<I: QueueEntry> WorkQueue<I> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Appends an entry.
    pub fn put(&self, item: I) {
        self.items.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    /// Inserts a batch at the head, preserving the batch's order.
    pub fn put_front(&self, batch: Vec<I>) {
        {
            let mut items = self.items.lock().unwrap();
            for item in batch.into_iter().rev() {
                items.push_front(item);
            }
        }
        self.notify.notify_one();
    }

    /// Pops the first entry that accepts a claim, if any.
    pub fn try_take(&self) -> Option<I> {
        let mut items = self.items.lock().unwrap();
        while let Some(item) = items.pop_front() {
            if item.claim() {
                return Some(item);
            }
        }
        None
    }

    /// Suspends until an entry is available or `cancel` fires.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<I> {
        loop {
            if let Some(item) = self.try_take() {
                return Some(item);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Removes and returns everything, claimed or not.
    pub fn drain(&self) -> Vec<I> {
        self.items.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Readiness signal used by composite takes.
    pub(crate) fn readiness(&self) -> &Notify {
        &self.notify
    }
}

impl<I: QueueEntry> Default for WorkQueue<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::item::Completion;
    use std::sync::Arc;
    use std::time::Duration;

    type Item = Arc<WorkItem<u32, (), &'static str>>;

    fn item(n: u32) -> (Item, crate::work::item::WorkPromise<(), &'static str>) {
        WorkItem::new(n, CancellationToken::new())
    }

    #[tokio::test]
    async fn take_is_fifo() {
        let q = WorkQueue::new();
        let (a, _pa) = item(1);
        let (b, _pb) = item(2);
        q.put(a);
        q.put(b);

        let cancel = CancellationToken::new();
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 1);
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 2);
    }

    #[tokio::test]
    async fn canceled_entries_are_skipped_and_settled() {
        let q = WorkQueue::new();
        let token = CancellationToken::new();
        let (dead, dead_promise): (Item, _) = WorkItem::new(1, token.clone());
        let (live, _lp) = item(2);
        q.put(dead);
        q.put(live);
        token.cancel();

        let cancel = CancellationToken::new();
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 2);
        assert_eq!(dead_promise.wait().await, Completion::Canceled);
    }

    #[tokio::test]
    async fn take_unblocks_on_cancellation() {
        let q: WorkQueue<Item> = WorkQueue::new();
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c.cancel();
        });
        assert!(q.take(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn take_wakes_on_put_after_waiting() {
        let q = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();

        let q2 = Arc::clone(&q);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let (i, _p) = item(9);
            q2.put(i);
        });

        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 9);
    }

    #[tokio::test]
    async fn put_front_preserves_batch_order() {
        let q = WorkQueue::new();
        let (tail, _pt) = item(99);
        q.put(tail);
        let (a, _pa) = item(1);
        let (b, _pb) = item(2);
        q.put_front(vec![a, b]);

        let cancel = CancellationToken::new();
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 1);
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 2);
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 99);
    }
}
