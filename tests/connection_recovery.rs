//! Connection loss and recovery: reconnect cadence, event discipline,
//! nothing after dispose.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use amqpvisor::testing::FakeBroker;
use amqpvisor::{
    Bus, CloseInitiator, ConnectionState, ConnectionSupervisor, EventKind, LinkError,
};

#[tokio::test]
async fn retries_until_the_broker_accepts() {
    let broker = FakeBroker::new();
    broker.fail_connects(3);
    let link = common::test_link(&broker);

    common::eventually("link opens", || link.state() == ConnectionState::Open).await;
    assert!(broker.connect_attempts() >= 4);

    link.dispose().await;
}

#[tokio::test]
async fn peer_drop_emits_one_disconnect_then_recovers() {
    let broker = FakeBroker::new();
    let link = common::test_link(&broker);
    let mut events = link.subscribe();

    common::eventually("link opens", || link.state() == ConnectionState::Open).await;
    broker.drop_connection();
    common::eventually("link reopens", || {
        link.state() == ConnectionState::Open && broker.connect_attempts() >= 2
    })
    .await;

    link.dispose().await;
    common::eventually("terminal state", || {
        link.state() == ConnectionState::Disposed
    })
    .await;

    let mut connected = 0;
    let mut disconnected = 0;
    let mut disposed = 0;
    while let Ok(ev) = events.try_recv() {
        match ev.kind {
            EventKind::Connected => connected += 1,
            EventKind::Disconnected => {
                disconnected += 1;
                assert_eq!(ev.initiator, Some(CloseInitiator::Peer));
            }
            EventKind::ConnectionDisposed => disposed += 1,
            _ => {}
        }
    }
    assert_eq!(connected, 2);
    assert_eq!(disconnected, 1);
    assert_eq!(disposed, 1);

    // Nothing further is emitted once disposed.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn create_model_requires_an_open_connection() {
    let broker = FakeBroker::new();
    let mut cfg = common::test_config();
    cfg.auto_start = false;

    let supervisor = ConnectionSupervisor::new(Arc::new(cfg), broker.factory(), Bus::new(64));
    let err = match supervisor.create_model(CancellationToken::new()).await {
        Ok(_) => panic!("model creation must fail before the link opens"),
        Err(e) => e,
    };
    assert_eq!(err, LinkError::NotConnected);

    supervisor.dispose().await;
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let broker = FakeBroker::new();
    let mut cfg = common::test_config();
    cfg.auto_start = false;

    let link = amqpvisor::Link::builder(cfg)
        .build(broker.factory())
        .expect("link builds");
    assert_eq!(link.state(), ConnectionState::Init);

    link.initialize();
    link.initialize();
    common::eventually("link opens", || link.state() == ConnectionState::Open).await;

    // A second initialize after opening must not reconnect.
    let attempts = broker.connect_attempts();
    link.initialize();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(broker.connect_attempts(), attempts);

    link.dispose().await;
}
