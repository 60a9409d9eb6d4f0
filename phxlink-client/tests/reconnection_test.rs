//! Opt-in automatic reconnection, on a paused clock

mod common;

use common::{accept_and_join, StateLog};
use phxlink_client::memory::memory_transport;
use phxlink_client::{ConnectionState, ExponentialBackoff, FixedDelay, PhxClient};
use phxlink_core::{Envelope, ReplyStatus};
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_loss() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test")
        .connector(connector)
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(1)).with_max_attempts(3)))
        .build()
        .unwrap();
    let log = StateLog::new();
    log.attach(&client);

    let (connected, mut peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    peer.close();
    let mut peer = accept_and_join(&mut server).await;

    assert!(common::wait_until(|| client.is_ready()).await);
    assert!(common::wait_until(|| log.events() == vec![true, false, true]).await);

    // the new connection carries requests
    let caller = client.clone();
    let pending = tokio::spawn(async move {
        caller
            .send_request(Envelope::new("websocket", "ping", json!({})), None)
            .await
    });
    let request = peer.recv_envelope().await.unwrap();
    peer.reply(&request, ReplyStatus::Ok, json!({"pong": true})).unwrap();
    assert!(pending.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_again_when_new_connection_drops_at_once() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test")
        .connector(connector)
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(1)).with_max_attempts(3)))
        .build()
        .unwrap();

    let (connected, mut peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    // the reconnected session is dropped right after its join is acknowledged
    peer.close();
    let mut second = accept_and_join(&mut server).await;
    second.close();

    let third = tokio::time::timeout(Duration::from_secs(10), accept_and_join(&mut server)).await;
    let _third = third.expect("client gave up after the reconnected session dropped");
    assert!(common::wait_until(|| client.is_ready()).await);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_failed_attempts() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test")
        .connector(connector.clone())
        .with_reconnect(Box::new(
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30)).with_max_attempts(5),
        ))
        .build()
        .unwrap();

    let (connected, mut peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    connector.refuse_connections(true);
    let lost_at = tokio::time::Instant::now();
    peer.close();

    // attempts at 1s and 1+2s are refused, the one at 1+2+4s gets through
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    connector.refuse_connections(false);

    let _peer = accept_and_join(&mut server).await;
    assert!(lost_at.elapsed() >= Duration::from_secs(7));
    assert!(common::wait_until(|| client.is_ready()).await);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test")
        .connector(connector.clone())
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(1)).with_max_attempts(2)))
        .build()
        .unwrap();
    let log = StateLog::new();
    log.attach(&client);

    let (connected, mut peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    connector.refuse_connections(true);
    peer.close();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(log.events(), vec![true, false]);

    // a manual connect still works afterwards
    connector.refuse_connections(false);
    let (connected, _peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();
    assert!(client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_after_disconnect() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test")
        .connector(connector)
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(1))))
        .build()
        .unwrap();

    let (connected, _peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    client.disconnect().await.unwrap();

    let attempt = tokio::time::timeout(Duration::from_secs(10), server.accept()).await;
    assert!(attempt.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_by_default() {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test").connector(connector).build().unwrap();

    let (connected, mut peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();

    peer.close();

    let attempt = tokio::time::timeout(Duration::from_secs(60), server.accept()).await;
    assert!(attempt.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
