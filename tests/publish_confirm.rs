//! Publish/confirm contract against the fake broker.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use amqpvisor::testing::FakeBroker;
use amqpvisor::{
    topology, ExchangeKind, ExchangeSpec, Link, OutboundMessage, PublishError, QueueSpec,
};

async fn fanout_link(broker: &Arc<FakeBroker>) -> Link {
    let link = common::test_link(broker);
    let setup = link.topology().once(topology(|ops| async move {
        ops.exchange_declare(ExchangeSpec::new("e", ExchangeKind::Fanout))
            .await?;
        let q = ops.queue_declare(QueueSpec::new("e-all")).await?;
        ops.bind(&q.name, "e", "").await?;
        Ok(())
    }));
    setup
        .wait(&CancellationToken::new())
        .await
        .expect("topology applies");
    link
}

#[tokio::test]
async fn three_publishes_resolve_with_increasing_tags() {
    let broker = FakeBroker::new();
    let link = fanout_link(&broker).await;
    let producer = link.producer().build();

    for body in ["a", "b", "c"] {
        producer
            .publish(
                OutboundMessage::to("e", "").with_body(body.as_bytes().to_vec()),
                CancellationToken::new(),
            )
            .await
            .expect("publish confirms");
    }

    let acks = broker.confirm_acks();
    assert_eq!(acks.len(), 3);
    let channel = acks[0].0;
    assert!(acks.iter().all(|(ch, _)| *ch == channel));
    let tags: Vec<u64> = acks.iter().map(|(_, tag)| *tag).collect();
    assert_eq!(tags, vec![1, 2, 3]);
    assert_eq!(broker.queue_len("e-all"), 3);

    link.dispose().await;
}

#[tokio::test]
async fn broker_nack_fails_the_promise() {
    let broker = FakeBroker::new();
    broker.seed_queue("q");
    let link = common::test_link(&broker);
    let producer = link.producer().build();

    broker.nack_next_publishes(1);
    let err = producer
        .publish(
            OutboundMessage::to("", "q").with_body(b"doomed".to_vec()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, PublishError::Nacked);

    // The channel is still healthy afterwards.
    producer
        .publish(
            OutboundMessage::to("", "q").with_body(b"fine".to_vec()),
            CancellationToken::new(),
        )
        .await
        .expect("subsequent publish confirms");

    link.dispose().await;
}

#[tokio::test]
async fn unroutable_mandatory_message_is_returned() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);
    let producer = link.producer().build();

    let err = producer
        .publish(
            OutboundMessage::to("", "nowhere")
                .with_body(b"lost".to_vec())
                .mandatory(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    // The fake sends basic.return followed by the ack for the same tag; the
    // return must win.
    assert!(matches!(err, PublishError::Returned { code: 312, .. }));

    link.dispose().await;
}

#[tokio::test]
async fn missing_confirm_times_out() {
    let broker = FakeBroker::new();
    broker.seed_queue("q");
    broker.pause_confirms_after(0);

    let mut cfg = common::test_config();
    cfg.publish_confirm_timeout = std::time::Duration::from_millis(50);
    let link = Link::builder(cfg).build(broker.factory()).expect("link builds");
    let producer = link.producer().build();

    let err = producer
        .publish(
            OutboundMessage::to("", "q").with_body(b"slow".to_vec()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::ConfirmTimeout { .. }));

    link.dispose().await;
}

#[tokio::test]
async fn canceled_before_dispatch_never_reaches_the_broker() {
    let broker = FakeBroker::new();
    broker.seed_queue("q");
    let link = common::test_link(&broker);
    let producer = link.producer().build();

    let token = CancellationToken::new();
    token.cancel();
    let err = producer
        .publish(
            OutboundMessage::to("", "q").with_body(b"never".to_vec()),
            token,
        )
        .await
        .unwrap_err();
    assert_eq!(err, PublishError::Canceled);
    assert!(broker.published().is_empty());

    link.dispose().await;
}

#[tokio::test]
async fn confirm_mode_off_resolves_on_dispatch() {
    let broker = FakeBroker::new();
    broker.seed_queue("q");

    let mut cfg = common::test_config();
    cfg.confirm_mode = false;
    let link = Link::builder(cfg).build(broker.factory()).expect("link builds");
    let producer = link.producer().build();

    producer
        .publish(
            OutboundMessage::to("", "q").with_body(b"fire-and-forget".to_vec()),
            CancellationToken::new(),
        )
        .await
        .expect("publish resolves without confirms");
    assert!(broker.confirm_acks().is_empty());
    assert_eq!(broker.queue_len("q"), 1);

    link.dispose().await;
}
