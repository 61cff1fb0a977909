//! # EventLoop: supervisor-private serial executor.
//!
//! Every state-affecting action of a supervisor is posted onto its
//! [`EventLoop`] as a unit of work. Units run strictly one at a time, in
//! FIFO order, on a dedicated worker task; the caller gets a promise for
//! the unit's result.
//!
//! ## Architecture
//! ```text
//! schedule(unit, cancel) ──► [unbounded queue] ──► worker task
//!        │                                            │
//!        └──◄── promise (oneshot) ◄── unit() ◄────────┘
//! ```
//!
//! ## Rules
//! - At any instant at most one unit is executing.
//! - A unit whose cancellation fired before it started is **not run**; its
//!   promise fails with [`ExecError::Canceled`].
//! - Cancellation after start is cooperative: the unit receives a child
//!   token and decides when to stop.
//! - Disposal is explicit and keyed by [`DisposeMode`]:
//!   - `Drain` runs every queued unit to completion, then stops.
//!   - `Wait` waits for the in-flight unit; queued units fail with
//!     [`ExecError::Disposed`] without running.
//!   - `Cancel` additionally cancels the in-flight unit's token.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ExecError;
use crate::id::Ident;

/// How [`EventLoop::dispose`] treats queued and in-flight units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeMode {
    /// Run queued units to completion, then stop.
    Drain,
    /// Wait for the in-flight unit; fail queued units with `Disposed`.
    Wait,
    /// Cancel the in-flight unit's token as well; fail queued units.
    Cancel,
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

struct Shared {
    /// Once set, dequeued units fail with `Disposed` instead of running.
    discard: AtomicBool,
    /// Token of the unit currently executing, if any.
    current: Mutex<Option<CancellationToken>>,
}

/// Single-consumer serial executor.
pub struct EventLoop {
    ident: Ident,
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Creates the loop and spawns its worker task.
    pub fn new(ident: Ident) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job().await;
            }
        });

        Self {
            ident,
            shared: Arc::new(Shared {
                discard: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Identity of the owning supervisor (log correlation).
    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Enqueues a unit and returns the promise for its result.
    ///
    /// The unit receives a child of `cancel` and must observe it
    /// cooperatively once running. If `cancel` fires before the unit is
    /// dequeued, the promise fails with [`ExecError::Canceled`] and the unit
    /// body never runs. Scheduling on a disposed loop fails with
    /// [`ExecError::Disposed`].
    pub fn schedule<R, F, Fut>(
        &self,
        cancel: CancellationToken,
        unit: F,
    ) -> impl Future<Output = Result<R, ExecError>> + Send + 'static
    where
        R: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<Result<R, ExecError>>();
        let shared = Arc::clone(&self.shared);

        let job: Job = Box::new(move || {
            Box::pin(async move {
                if shared.discard.load(Ordering::SeqCst) {
                    let _ = done_tx.send(Err(ExecError::Disposed));
                    return;
                }
                if cancel.is_cancelled() {
                    let _ = done_tx.send(Err(ExecError::Canceled));
                    return;
                }

                let unit_token = cancel.child_token();
                *shared.current.lock().unwrap() = Some(unit_token.clone());
                let out = unit(unit_token).await;
                shared.current.lock().unwrap().take();
                let _ = done_tx.send(Ok(out));
            })
        });

        // A failed send drops the job, which drops done_tx; the promise
        // below then resolves Disposed.
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(job);
        }

        async move {
            match done_rx.await {
                Ok(res) => res,
                Err(_) => Err(ExecError::Disposed),
            }
        }
    }

    /// Stops the loop according to `mode` and waits for the worker to exit.
    ///
    /// Idempotent; concurrent calls beyond the first are no-ops.
    pub async fn dispose(&self, mode: DisposeMode) {
        trace!(ident = %self.ident, ?mode, "disposing event loop");
        match mode {
            DisposeMode::Drain => {}
            DisposeMode::Wait => {
                self.shared.discard.store(true, Ordering::SeqCst);
            }
            DisposeMode::Cancel => {
                self.shared.discard.store(true, Ordering::SeqCst);
                let current = self.shared.current.lock().unwrap().clone();
                if let Some(token) = current {
                    token.cancel();
                }
            }
        }

        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn new_loop() -> EventLoop {
        EventLoop::new(Ident::next("loop"))
    }

    #[tokio::test]
    async fn units_run_in_fifo_order_one_at_a_time() {
        let el = new_loop();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut promises = Vec::new();
        for i in 0..5u32 {
            let log = Arc::clone(&log);
            promises.push(el.schedule(CancellationToken::new(), move |_t| async move {
                log.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push(i + 100);
                i
            }));
        }
        for (i, p) in promises.into_iter().enumerate() {
            assert_eq!(p.await.unwrap(), i as u32);
        }

        // Units never interleave: each i is immediately followed by i+100.
        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            assert_eq!(pair[0] + 100, pair[1]);
        }
    }

    #[tokio::test]
    async fn canceled_before_start_never_runs() {
        let el = new_loop();
        let gate = Arc::new(Notify::new());

        let g = Arc::clone(&gate);
        let first = el.schedule(CancellationToken::new(), move |_t| async move {
            g.notified().await;
        });

        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let second = el.schedule(token, move |_t| async move {
            flag.store(true, Ordering::SeqCst);
        });

        gate.notify_one();
        first.await.unwrap();
        assert_eq!(second.await.unwrap_err(), ExecError::Canceled);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drain_runs_queued_units() {
        let el = new_loop();
        let count = Arc::new(Mutex::new(0));
        let mut promises = Vec::new();
        for _ in 0..3 {
            let count = Arc::clone(&count);
            promises.push(el.schedule(CancellationToken::new(), move |_t| async move {
                *count.lock().unwrap() += 1;
            }));
        }
        el.dispose(DisposeMode::Drain).await;
        assert_eq!(*count.lock().unwrap(), 3);
        for p in promises {
            assert!(p.await.is_ok());
        }
    }

    #[tokio::test]
    async fn wait_discards_queued_but_finishes_in_flight() {
        let el = new_loop();
        let started = Arc::new(Notify::new());

        let s = Arc::clone(&started);
        let first = el.schedule(CancellationToken::new(), move |_t| async move {
            s.notify_one();
            tokio::time::sleep(Duration::from_millis(20)).await;
            "done"
        });
        let second = el.schedule(CancellationToken::new(), |_t| async { "never" });

        started.notified().await;
        el.dispose(DisposeMode::Wait).await;

        assert_eq!(first.await.unwrap(), "done");
        assert_eq!(second.await.unwrap_err(), ExecError::Disposed);
    }

    #[tokio::test]
    async fn cancel_reaches_the_in_flight_unit() {
        let el = new_loop();
        let started = Arc::new(Notify::new());

        let s = Arc::clone(&started);
        let first = el.schedule(CancellationToken::new(), move |t| async move {
            s.notify_one();
            t.cancelled().await;
            "observed"
        });

        started.notified().await;
        el.dispose(DisposeMode::Cancel).await;
        assert_eq!(first.await.unwrap(), "observed");
    }

    #[tokio::test]
    async fn schedule_after_dispose_fails_disposed() {
        let el = new_loop();
        el.dispose(DisposeMode::Drain).await;
        let res = el
            .schedule(CancellationToken::new(), |_t| async { 1 })
            .await;
        assert_eq!(res.unwrap_err(), ExecError::Disposed);
    }
}
