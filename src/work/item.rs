//! # WorkItem: cancelable, promise-bearing unit of queued work.
//!
//! A [`WorkItem`] pairs an input payload with a completion slot that is
//! written **at most once**. The holder of the matching [`WorkPromise`]
//! observes exactly one terminal outcome.
//!
//! ## State machine
//! ```text
//! Pending ──succeed(v)──► Succeeded(v)
//!         ──fail(e)─────► Failed(e)
//!         ──cancel──────► Canceled
//! ```
//!
//! ## Rules
//! - Transition to terminal is atomic and idempotent: the first writer
//!   wins, later writers are no-ops returning `false`.
//! - The `done` signal fires on settlement; queue-side watchers use it to
//!   stand down without polling.
//! - `claim`/`release` track queue residency: a claimed item ignores
//!   queue-side cancellation (the consumer owns it), a released item is
//!   eligible again (retry re-queue).

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a [`WorkItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<R, E> {
    Succeeded(R),
    Failed(E),
    Canceled,
}

impl<R, E> Completion<R, E> {
    /// Converts into a `Result`, mapping `Canceled` through `on_cancel`.
    pub fn into_result(self, on_cancel: E) -> Result<R, E> {
        match self {
            Completion::Succeeded(v) => Ok(v),
            Completion::Failed(e) => Err(e),
            Completion::Canceled => Err(on_cancel),
        }
    }
}

struct Slot<R, E> {
    sender: Option<oneshot::Sender<Completion<R, E>>>,
    claimed: bool,
}

/// A queued unit of work carrying a payload and a write-once completion slot.
pub struct WorkItem<T, R, E> {
    payload: T,
    cancel: CancellationToken,
    done: CancellationToken,
    slot: Mutex<Slot<R, E>>,
}

/// Awaitable side of a [`WorkItem`].
pub struct WorkPromise<R, E> {
    rx: oneshot::Receiver<Completion<R, E>>,
}

impl<R, E> WorkPromise<R, E> {
    /// Waits for the item to settle.
    ///
    /// If every handle to the item is dropped unsettled the promise resolves
    /// `Canceled`.
    pub async fn wait(self) -> Completion<R, E> {
        self.rx.await.unwrap_or(Completion::Canceled)
    }
}

impl<T, R, E> WorkItem<T, R, E> {
    /// Creates a pending item observing `cancel`, plus its promise.
    pub fn new(payload: T, cancel: CancellationToken) -> (Arc<Self>, WorkPromise<R, E>) {
        let (tx, rx) = oneshot::channel();
        let item = Arc::new(Self {
            payload,
            cancel,
            done: CancellationToken::new(),
            slot: Mutex::new(Slot {
                sender: Some(tx),
                claimed: false,
            }),
        });
        (item, WorkPromise { rx })
    }

    /// The input payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The caller-supplied cancellation this item observes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal that fires once the item settles.
    pub fn done_token(&self) -> &CancellationToken {
        &self.done
    }

    /// True once a terminal outcome has been written.
    pub fn is_settled(&self) -> bool {
        self.slot.lock().unwrap().sender.is_none()
    }

    /// Settles with `Succeeded(value)`. Returns false if already settled.
    pub fn succeed(&self, value: R) -> bool {
        self.settle(Completion::Succeeded(value))
    }

    /// Settles with `Failed(err)`. Returns false if already settled.
    pub fn fail(&self, err: E) -> bool {
        self.settle(Completion::Failed(err))
    }

    /// Settles with `Canceled`. Returns false if already settled.
    pub fn settle_canceled(&self) -> bool {
        self.settle(Completion::Canceled)
    }

    fn settle(&self, completion: Completion<R, E>) -> bool {
        let sender = {
            let mut slot = self.slot.lock().unwrap();
            slot.sender.take()
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(completion);
                self.done.cancel();
                true
            }
            None => false,
        }
    }

    /// Claims the item for a consumer. Fails (and settles `Canceled`) when
    /// the item's cancellation already fired; fails when already settled.
    pub(crate) fn claim(&self) -> bool {
        let sender = {
            let mut slot = self.slot.lock().unwrap();
            if slot.sender.is_none() {
                return false;
            }
            if self.cancel.is_cancelled() {
                slot.sender.take()
            } else {
                slot.claimed = true;
                return true;
            }
        };
        if let Some(tx) = sender {
            let _ = tx.send(Completion::Canceled);
            self.done.cancel();
        }
        false
    }

    /// Returns the item to queue residency (retry re-queue).
    pub(crate) fn release(&self) {
        self.slot.lock().unwrap().claimed = false;
    }

    /// Settles `Canceled` only while the item is unclaimed and pending.
    /// Used by queue-side cancellation watchers; a claim in progress wins.
    pub(crate) fn cancel_pending(&self) {
        let sender = {
            let mut slot = self.slot.lock().unwrap();
            if slot.claimed || slot.sender.is_none() {
                return;
            }
            slot.sender.take()
        };
        if let Some(tx) = sender {
            let _ = tx.send(Completion::Canceled);
            self.done.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Item = WorkItem<u32, &'static str, &'static str>;

    #[tokio::test]
    async fn first_writer_wins_and_promise_sees_it_once() {
        let (item, promise): (Arc<Item>, _) = WorkItem::new(7, CancellationToken::new());
        assert!(item.succeed("ok"));
        assert!(!item.fail("late"));
        assert!(!item.settle_canceled());
        assert_eq!(promise.wait().await, Completion::Succeeded("ok"));
    }

    #[tokio::test]
    async fn claim_refuses_canceled_items_and_settles_them() {
        let token = CancellationToken::new();
        let (item, promise): (Arc<Item>, _) = WorkItem::new(7, token.clone());
        token.cancel();
        assert!(!item.claim());
        assert_eq!(promise.wait().await, Completion::Canceled);
    }

    #[tokio::test]
    async fn cancel_pending_loses_to_claim() {
        let (item, _promise): (Arc<Item>, _) = WorkItem::new(7, CancellationToken::new());
        assert!(item.claim());
        item.cancel_pending();
        assert!(!item.is_settled());
        assert!(item.succeed("ok"));
    }

    #[tokio::test]
    async fn dropped_item_resolves_promise_canceled() {
        let (item, promise): (Arc<Item>, _) = WorkItem::new(7, CancellationToken::new());
        drop(item);
        assert_eq!(promise.wait().await, Completion::Canceled);
    }
}
