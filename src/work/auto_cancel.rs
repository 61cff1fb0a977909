//! # AutoCancellingQueue: entries withdraw themselves on cancellation.
//!
//! Wraps a [`WorkQueue`] with a per-entry watcher: when the entry's
//! cancellation fires while it is still queued, the entry is settled
//! `Canceled` immediately and any later take skips it. A take that races the
//! cancellation wins (the claim disables queue-side cancellation before the
//! consumer sees the entry).
//!
//! Producers and consumers that pend work while a channel re-opens use this
//! so abandoned items never linger in the pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::queue::{QueueEntry, WorkQueue};

/// FIFO whose entries are withdrawn atomically when their cancellation fires.
pub struct AutoCancellingQueue<I> {
    inner: Arc<WorkQueue<I>>,
}

impl<I: QueueEntry + Clone> AutoCancellingQueue<I> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WorkQueue::new()),
        }
    }

    /// Appends an entry and arms its cancellation watcher.
    pub fn put(&self, item: I) {
        Self::arm(&item);
        self.inner.put(item);
    }

    /// Re-queues a batch at the head, in order, restoring each entry's
    /// original cancellation behavior.
    pub fn put_retry(&self, batch: Vec<I>) {
        for item in &batch {
            item.release();
            Self::arm(item);
        }
        self.inner.put_front(batch);
    }

    /// Suspends until an entry is available or `cancel` fires.
    pub async fn take(&self, cancel: &CancellationToken) -> Option<I> {
        self.inner.take(cancel).await
    }

    /// Pops the first live entry, if any.
    pub fn try_take(&self) -> Option<I> {
        self.inner.try_take()
    }

    /// Removes and returns everything, for disposal sweeps.
    pub fn drain(&self) -> Vec<I> {
        self.inner.drain()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The underlying queue, for multiplexing via
    /// [`CompositeWorkQueue`](crate::work::CompositeWorkQueue).
    pub fn source(&self) -> Arc<WorkQueue<I>> {
        Arc::clone(&self.inner)
    }

    fn arm(item: &I) {
        let (Some(cancel), Some(done)) = (item.cancellation(), item.done_signal()) else {
            return;
        };
        let entry = item.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => entry.cancel_pending(),
                _ = done.cancelled() => {}
            }
        });
    }
}

impl<I: QueueEntry + Clone> Default for AutoCancellingQueue<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::item::{Completion, WorkItem};
    use std::time::Duration;

    type Item = Arc<WorkItem<u32, (), &'static str>>;

    #[tokio::test]
    async fn cancellation_while_queued_settles_and_hides_the_entry() {
        let q: AutoCancellingQueue<Item> = AutoCancellingQueue::new();
        let token = CancellationToken::new();
        let (doomed, doomed_promise) = WorkItem::new(1, token.clone());
        let (live, _lp) = WorkItem::new(2, CancellationToken::new());
        q.put(doomed);
        q.put(live);

        token.cancel();
        assert_eq!(doomed_promise.wait().await, Completion::Canceled);

        let cancel = CancellationToken::new();
        let taken = q.take(&cancel).await.unwrap();
        assert_eq!(*taken.payload(), 2);
        assert!(q.is_empty() || q.try_take().is_none());
    }

    #[tokio::test]
    async fn taken_entries_ignore_late_cancellation() {
        let q: AutoCancellingQueue<Item> = AutoCancellingQueue::new();
        let token = CancellationToken::new();
        let (item, _promise) = WorkItem::new(1, token.clone());
        q.put(item);

        let cancel = CancellationToken::new();
        let taken = q.take(&cancel).await.unwrap();
        token.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!taken.is_settled());
        assert!(taken.succeed(()));
    }

    #[tokio::test]
    async fn put_retry_keeps_order_and_re_arms_cancellation() {
        let q: AutoCancellingQueue<Item> = AutoCancellingQueue::new();
        let token = CancellationToken::new();
        let (a, a_promise) = WorkItem::new(1, token.clone());
        let (b, _bp) = WorkItem::new(2, CancellationToken::new());
        q.put(a.clone());
        q.put(b.clone());

        let cancel = CancellationToken::new();
        let a_taken = q.take(&cancel).await.unwrap();
        let b_taken = q.take(&cancel).await.unwrap();
        q.put_retry(vec![a_taken, b_taken]);

        // Cancellation must reach the re-queued entry again.
        token.cancel();
        assert_eq!(a_promise.wait().await, Completion::Canceled);
        assert_eq!(*q.take(&cancel).await.unwrap().payload(), 2);
    }
}
