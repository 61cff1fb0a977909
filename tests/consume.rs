//! Consumer delivery loop: acks, redelivery, prefetch, disposal.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use amqpvisor::testing::{AckKind, FakeBroker};
use amqpvisor::{
    consumer_topology, AckDecision, ConsumeError, HandlerFn, OutboundMessage, QueueSpec,
};

#[tokio::test]
async fn deliveries_reach_the_handler_and_are_acked() {
    let broker = FakeBroker::new();
    broker.seed_queue("inbox");
    let link = common::test_link(&broker);

    let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let consumer = link
        .consumer()
        .queue("inbox")
        .prefetch(10)
        .handler(HandlerFn::arc(move |delivery, _cancel| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(delivery.body.clone());
                Ok::<_, ConsumeError>(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    for i in 0..3 {
        broker.publish_to_queue("inbox", format!("m{i}").into_bytes());
    }

    common::eventually("all handled", || seen.lock().unwrap().len() == 3).await;
    common::eventually("all acked", || {
        broker
            .consumer_acks()
            .iter()
            .filter(|a| a.kind == AckKind::Ack)
            .count()
            == 3
    })
    .await;
    assert_eq!(broker.queue_len("inbox"), 0);

    consumer.dispose().await;
    link.dispose().await;
}

#[tokio::test]
async fn disposing_a_gated_consumer_sends_no_acks() {
    let broker = FakeBroker::new();
    broker.seed_queue("inbox");
    for i in 0..10 {
        broker.publish_to_queue("inbox", format!("m{i}").into_bytes());
    }
    let link = common::test_link(&broker);

    let handled = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&handled);
    let consumer = link
        .consumer()
        .queue("inbox")
        .prefetch(2)
        .handler(HandlerFn::arc(move |_delivery, cancel| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Ok::<_, ConsumeError>(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    common::eventually("handler gated", || handled.load(Ordering::SeqCst) >= 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(handled.load(Ordering::SeqCst) <= 2, "prefetch bounds dispatch");

    consumer.dispose().await;

    assert!(
        broker.consumer_acks().is_empty(),
        "no acknowledgement may be sent for a disposed consumer"
    );
    common::eventually("broker requeued the unacked", || {
        broker.queue_len("inbox") == 10
    })
    .await;

    link.dispose().await;
}

#[tokio::test]
async fn handler_failure_nacks_with_requeue_and_redelivers() {
    let broker = FakeBroker::new();
    broker.seed_queue("inbox");
    let link = common::test_link(&broker);

    let redelivered_seen = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&redelivered_seen);
    let consumer = link
        .consumer()
        .queue("inbox")
        .prefetch(1)
        .handler(HandlerFn::arc(move |delivery, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                if !delivery.redelivered {
                    return Err(ConsumeError::Handler {
                        reason: "boom".into(),
                    });
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    broker.publish_to_queue("inbox", b"flaky".to_vec());

    common::eventually("redelivery handled", || {
        redelivered_seen.load(Ordering::SeqCst) == 1
    })
    .await;

    let acks = broker.consumer_acks();
    assert!(acks
        .iter()
        .any(|a| a.kind == AckKind::Nack { requeue: true }));
    assert!(acks.iter().any(|a| a.kind == AckKind::Ack));

    consumer.dispose().await;
    link.dispose().await;
}

#[tokio::test]
async fn auto_ack_mode_never_sends_explicit_acks() {
    let broker = FakeBroker::new();
    broker.seed_queue("inbox");
    let link = common::test_link(&broker);

    let handled = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&handled);
    let consumer = link
        .consumer()
        .queue("inbox")
        .auto_ack(true)
        .handler(HandlerFn::arc(move |_delivery, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConsumeError>(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    broker.publish_to_queue("inbox", b"one".to_vec());
    broker.publish_to_queue("inbox", b"two".to_vec());

    common::eventually("both handled", || handled.load(Ordering::SeqCst) == 2).await;
    assert!(broker.consumer_acks().is_empty());
    assert_eq!(broker.queue_len("inbox"), 0);

    consumer.dispose().await;
    link.dispose().await;
}

#[tokio::test]
async fn topology_callback_builds_the_consumed_queue() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);

    let handled = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&handled);
    let consumer = link
        .consumer()
        .with_topology(consumer_topology(|ops| async move {
            let q = ops.queue_declare(QueueSpec::new("built")).await?;
            Ok(q.name)
        }))
        .handler(HandlerFn::arc(move |_delivery, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConsumeError>(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    common::eventually("queue declared", || broker.queue_exists("built")).await;
    broker.publish_to_queue("built", b"x".to_vec());
    common::eventually("handled", || handled.load(Ordering::SeqCst) == 1).await;

    consumer.dispose().await;
    link.dispose().await;
}

#[tokio::test]
async fn deliveries_flag_messages_from_this_application() {
    let broker = FakeBroker::new();
    broker.seed_queue("loopback");
    let link = common::test_link(&broker);

    let flagged = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&flagged);
    let consumer = link
        .consumer()
        .queue("loopback")
        .handler(HandlerFn::arc(move |delivery, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                if delivery.is_from_this_app() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, ConsumeError>(AckDecision::Ack)
            }
        }))
        .start()
        .expect("consumer starts");

    let producer = link.producer().build();
    producer
        .publish(
            OutboundMessage::to("", "loopback").with_body(b"mine".to_vec()),
            CancellationToken::new(),
        )
        .await
        .expect("publish confirms");

    common::eventually("flagged as own", || flagged.load(Ordering::SeqCst) == 1).await;

    consumer.dispose().await;
    link.dispose().await;
}
