//! Server pushes and their subscribers

mod common;

use common::accept_and_join;
use phxlink_client::memory::memory_transport;
use phxlink_client::PhxClient;
use phxlink_core::{Envelope, Event, Ref, ReplyStatus};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

async fn connected() -> (PhxClient, phxlink_client::memory::MemoryPeer) {
    let (connector, mut server) = memory_transport();
    let client = PhxClient::builder("memory://test").connector(connector).build().unwrap();
    let (connected, peer) = tokio::join!(client.connect(), accept_and_join(&mut server));
    connected.unwrap();
    (client, peer)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no push delivered")
        .expect("subscriber channel closed")
}

#[tokio::test]
async fn test_pushes_delivered_in_order() {
    let (client, peer) = connected().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;

    for n in 0..5 {
        peer.send(&Envelope::new("websocket", "new_msg", json!({"n": n}))).unwrap();
    }

    for n in 0..5 {
        let push = next(&mut rx).await;
        assert_eq!(push.event.as_str(), "new_msg");
        assert_eq!(push.payload["n"], n);
    }
}

#[tokio::test]
async fn test_subscribe_event_filters_and_unsubscribe() {
    let (client, peer) = connected().await;

    let (all_tx, mut all_rx) = mpsc::unbounded_channel();
    let (typed_tx, mut typed_rx) = mpsc::unbounded_channel();

    let all = client
        .subscribe(move |envelope| {
            let tx = all_tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;
    client
        .subscribe_event("presence_diff", move |envelope| {
            let tx = typed_tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;

    peer.send(&Envelope::new("websocket", "new_msg", json!({}))).unwrap();
    peer.send(&Envelope::new("websocket", "presence_diff", json!({"joins": {}}))).unwrap();

    assert_eq!(next(&mut all_rx).await.event.as_str(), "new_msg");
    assert_eq!(next(&mut all_rx).await.event.as_str(), "presence_diff");
    assert_eq!(next(&mut typed_rx).await.event.as_str(), "presence_diff");

    assert!(client.unsubscribe(all).await);
    assert!(!client.unsubscribe(all).await);

    peer.send(&Envelope::new("websocket", "presence_diff", json!({}))).unwrap();
    assert_eq!(next(&mut typed_rx).await.event.as_str(), "presence_diff");
    assert!(all_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_heartbeats_and_late_replies_are_not_pushes() {
    let (client, peer) = connected().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;

    peer.send(&Envelope::new("phoenix", Event::Heartbeat, json!({}))).unwrap();
    peer.send(&Envelope::reply("websocket", Ref::new("999"), ReplyStatus::Ok, json!({})))
        .unwrap();
    peer.send(&Envelope::new("websocket", "marker", json!({}))).unwrap();

    let push = next(&mut rx).await;
    assert_eq!(push.event.as_str(), "marker");
    assert!(client.last_seen().is_some());
}

#[tokio::test]
async fn test_close_and_error_events_reach_subscribers() {
    let (client, peer) = connected().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;

    peer.send(&Envelope::new("websocket", Event::Error, json!({"reason": "crash"}))).unwrap();
    peer.send(&Envelope::new("websocket", Event::Close, json!({}))).unwrap();

    assert_eq!(next(&mut rx).await.event, Event::Error);
    assert_eq!(next(&mut rx).await.event, Event::Close);
    assert!(client.is_ready());
}

#[tokio::test]
async fn test_stringified_push_payload_is_unwrapped() {
    let (client, peer) = connected().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe_event("update", move |envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope);
            }
        })
        .await;

    peer.send_raw(r#"{"topic":"websocket","event":"update","payload":"{\"id\":3}","ref":null}"#)
        .unwrap();

    let push = next(&mut rx).await;
    assert_eq!(push.payload["id"], 3);
    assert!(push.reference.is_none());
}
