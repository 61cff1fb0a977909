//! Channel faults mid-publish: unconfirmed messages survive onto the next
//! generation and every promise still settles.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use amqpvisor::testing::FakeBroker;
use amqpvisor::{topology, ExchangeKind, ExchangeSpec, OutboundMessage, PublishError, QueueSpec};

#[tokio::test]
async fn channel_fault_mid_stream_re_dispatches_unconfirmed() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);

    // Producer-owned topology: every new channel re-declares before the
    // pump resumes.
    let producer = Arc::new(
        link.producer()
            .with_topology(topology(|ops| async move {
                ops.exchange_declare(ExchangeSpec::new("stream", ExchangeKind::Fanout))
                    .await?;
                let q = ops.queue_declare(QueueSpec::new("stream-all")).await?;
                ops.bind(&q.name, "stream", "").await?;
                Ok(())
            }))
            .build(),
    );

    broker.pause_confirms_after(10);

    let mut joins = tokio::task::JoinSet::new();
    for i in 0..30u32 {
        let p = Arc::clone(&producer);
        joins.spawn(async move {
            p.publish(
                OutboundMessage::to("stream", "")
                    .with_body(format!("m{i}").into_bytes())
                    .with_message_id(format!("id-{i}")),
                CancellationToken::new(),
            )
            .await
        });
    }

    common::eventually("first batch confirmed", || broker.confirm_acks().len() >= 10).await;
    common::eventually("later publishes dispatched", || {
        broker.published().len() >= 12
    })
    .await;

    broker.resume_confirms();
    broker.fail_channel();

    while let Some(res) = joins.join_next().await {
        res.expect("join").expect("every publish settles succeeded");
    }

    let published = broker.published();
    let channels: HashSet<u64> = published.iter().map(|p| p.channel_id).collect();
    assert!(channels.len() >= 2, "publishes must span channel generations");

    let ids: HashSet<Option<String>> = published.iter().map(|p| p.message_id.clone()).collect();
    assert_eq!(ids.len(), 30, "no message lost, duplicates permitted");

    link.dispose().await;
}

#[tokio::test]
async fn dispose_fails_outstanding_publishes() {
    let broker = FakeBroker::new();
    broker.seed_queue("q");
    broker.pause_confirms_after(0);

    let link = common::test_link(&broker);
    let producer = Arc::new(link.producer().build());

    let mut joins = tokio::task::JoinSet::new();
    for _ in 0..3 {
        let p = Arc::clone(&producer);
        joins.spawn(async move {
            p.publish(
                OutboundMessage::to("", "q").with_body(b"stuck".to_vec()),
                CancellationToken::new(),
            )
            .await
        });
    }
    common::eventually("publishes dispatched", || broker.published().len() == 3).await;

    producer.dispose().await;
    while let Some(res) = joins.join_next().await {
        assert_eq!(res.expect("join").unwrap_err(), PublishError::Disposed);
    }

    link.dispose().await;
}
