//! Once vs persistent topology under rejections and channel loss.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use amqpvisor::testing::FakeBroker;
use amqpvisor::{topology, ExchangeKind, ExchangeSpec, QueueSpec, TopologyError};

#[tokio::test]
async fn once_declares_and_self_disposes() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);

    let once = link.topology().once(topology(|ops| async move {
        ops.exchange_declare(ExchangeSpec::new("setup", ExchangeKind::Direct))
            .await?;
        Ok(())
    }));
    once.wait(&CancellationToken::new())
        .await
        .expect("declaration succeeds");

    assert!(broker.exchange_exists("setup"));
    assert_eq!(broker.declare_count("setup"), 1);

    link.dispose().await;
}

#[tokio::test]
async fn once_passive_miss_fails_the_waiter() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);

    let once = link.topology().once(topology(|ops| async move {
        ops.queue_declare_passive("missing").await?;
        Ok(())
    }));
    let err = once
        .wait(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TopologyError::Rejected { code: 404, .. }));

    link.dispose().await;
}

#[tokio::test]
async fn persistent_reapplies_on_every_channel_activation() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);

    let ready = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ready);
    let topo = link
        .topology()
        .on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .persistent(topology(|ops| async move {
            ops.exchange_declare(ExchangeSpec::new("x", ExchangeKind::Direct))
                .await?;
            let q = ops.queue_declare(QueueSpec::new("q")).await?;
            ops.bind(&q.name, "x", "k").await?;
            Ok(())
        }));

    common::eventually("first pass", || ready.load(Ordering::SeqCst) >= 1).await;
    broker.fail_channel();
    common::eventually("second pass", || ready.load(Ordering::SeqCst) >= 2).await;
    broker.fail_channel();
    common::eventually("third pass", || ready.load(Ordering::SeqCst) >= 3).await;

    assert!(broker.declare_count("x") >= 3, "declare is idempotent");

    topo.dispose().await;
    link.dispose().await;
}

#[tokio::test]
async fn persistent_rejection_calls_hook_and_retries() {
    let broker = FakeBroker::new();
    broker.reject_next_declare(406, "PRECONDITION_FAILED - mismatched arguments");
    let link = common::test_link(&broker);

    let ready = Arc::new(AtomicU32::new(0));
    let errors = Arc::new(AtomicU32::new(0));
    let ready_c = Arc::clone(&ready);
    let errors_c = Arc::clone(&errors);

    let topo = link
        .topology()
        .on_ready(move || {
            ready_c.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |err| {
            if err.is_rejection() {
                errors_c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .persistent(topology(|ops| async move {
            ops.queue_declare(QueueSpec::new("retrying")).await?;
            Ok(())
        }));

    common::eventually("error hook fired", || errors.load(Ordering::SeqCst) >= 1).await;
    common::eventually("eventually applied", || ready.load(Ordering::SeqCst) >= 1).await;
    assert!(broker.queue_exists("retrying"));

    topo.dispose().await;
    link.dispose().await;
}
