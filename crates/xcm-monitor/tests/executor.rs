//! ReconnectingExecutor against a scripted chain: retry, reconnect budget and error kinds.

mod common;

use common::{executor, fast_reconnect, Fault, MockChain, MockConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use xcm_monitor::{MonitorError, ReconnectingExecutor, ReconnectionConfig};

#[tokio::test]
async fn healthy_call_does_not_reconnect() {
    let chain = MockChain::new();
    chain.set_head(42);
    let (relay, connector) = executor("relay", &chain, 3).await;

    let head = relay.latest_header().await.unwrap();
    assert_eq!(head.number, 42);
    assert_eq!(connector.connects(), 1);
    assert_eq!(chain.calls(), vec!["head"]);
}

#[tokio::test]
async fn transport_failure_reconnects_and_retries_once() {
    let chain = MockChain::new();
    chain.set_head(42);
    let (relay, connector) = executor("relay", &chain, 3).await;
    chain.fail_next(&[Fault::Transport]);

    let head = relay.latest_header().await.unwrap();
    assert_eq!(head.number, 42);
    assert_eq!(connector.connects(), 2);
    assert_eq!(chain.calls(), vec!["head", "head"]);
}

#[tokio::test]
async fn decode_failure_is_returned_without_reconnect() {
    let chain = MockChain::new();
    let hash = chain.add_block(7, vec![]);
    let (relay, connector) = executor("relay", &chain, 3).await;
    chain.fail_next(&[Fault::Decode]);

    let err = relay.events_at(&hash).await.unwrap_err();
    assert_eq!(err.kind(), "decode");
    assert!(!err.is_fatal());
    assert_eq!(connector.connects(), 1);
    assert_eq!(chain.calls().len(), 1);
}

#[tokio::test]
async fn failure_after_reconnect_is_not_fatal() {
    let chain = MockChain::new();
    chain.add_block(7, vec![]);
    let (relay, connector) = executor("relay", &chain, 3).await;
    chain.fail_next(&[Fault::Transport, Fault::Transport]);

    let err = relay.block_hash_at(7).await.unwrap_err();
    assert_eq!(err.kind(), "rpc");
    assert!(!err.is_fatal());
    assert_eq!(connector.connects(), 2);
    // The shared client was replaced; the next call goes through.
    assert_eq!(relay.block_hash_at(7).await.unwrap(), common::block_hash(7));
}

#[tokio::test]
async fn reconnect_succeeds_within_budget() {
    let chain = MockChain::new();
    chain.set_head(9);
    let (relay, connector) = executor("para", &chain, 3).await;
    chain.fail_next(&[Fault::Transport]);
    connector.fail_connects(2);

    assert_eq!(relay.latest_header().await.unwrap().number, 9);
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn exhausted_reconnects_are_fatal() {
    let chain = MockChain::new();
    let (relay, connector) = executor("relay", &chain, 3).await;
    chain.fail_next(&[Fault::Transport]);
    connector.fail_connects(3);

    let err = relay.latest_header().await.unwrap_err();
    assert!(err.is_fatal());
    match err {
        MonitorError::ChainUnavailable { chain, attempts } => {
            assert_eq!(chain, "relay");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected ChainUnavailable, got {other:?}"),
    }
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn initial_connect_uses_the_same_budget() {
    let chain = MockChain::new();
    let connector = Arc::new(MockConnector::new(chain));
    connector.fail_connects(2);

    let result = ReconnectingExecutor::connect("relay", connector.clone(), fast_reconnect(2)).await;
    assert!(matches!(result, Err(MonitorError::ChainUnavailable { attempts: 2, .. })));
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn shutdown_cuts_reconnect_wait_short() {
    let chain = MockChain::new();
    let connector = Arc::new(MockConnector::new(chain.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let slow = ReconnectionConfig {
        attempts: 5,
        delay: Duration::from_secs(60),
    };
    let relay = ReconnectingExecutor::connect_with_shutdown(
        "relay",
        connector.clone(),
        slow,
        shutdown_rx,
    )
    .await
    .unwrap();
    chain.fail_next(&[Fault::Transport]);
    connector.fail_connects(5);
    shutdown_tx.send(true).unwrap();

    let err = timeout(Duration::from_secs(5), relay.latest_header())
        .await
        .expect("reconnect wait must not run to completion")
        .unwrap_err();
    assert!(matches!(err, MonitorError::Interrupted { ref chain } if chain == "relay"));
    assert!(!err.is_fatal());
    // Initial dial plus the one failed reconnect before the wait.
    assert_eq!(connector.connects(), 2);
}
