//! Common test utilities for phxlink-client integration tests
//!
//! Provides a mock Phoenix WebSocket server for end-to-end tests and helpers
//! for the in-process transport, which the timing tests use with a paused
//! clock.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use phxlink_client::memory::{MemoryPeer, MemoryServer};
use phxlink_core::{codec, Envelope, Event, ReplyStatus};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Builds the frames sent back for one client request
pub type Handler = Arc<dyn Fn(&Envelope) -> Vec<Envelope> + Send + Sync>;

/// How the mock server answers `phx_join`
#[derive(Debug, Clone)]
pub enum JoinPolicy {
    Accept,
    Reject(Value),
    Ignore,
}

/// Mock Phoenix channel server
///
/// Answers joins according to its [`JoinPolicy`], acknowledges heartbeats,
/// and passes every other frame to the handler. Every decoded frame is also
/// recorded for inspection.
pub struct MockPhoenixServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    frames_rx: mpsc::UnboundedReceiver<Envelope>,
    connections: Arc<AtomicUsize>,
}

impl MockPhoenixServer {
    /// Accept joins and never answer requests
    pub async fn start() -> Self {
        Self::with_handler(JoinPolicy::Accept, |_| Vec::new()).await
    }

    /// Accept joins and reply `ok` with the request payload as response
    pub async fn echo() -> Self {
        Self::with_handler(JoinPolicy::Accept, |request| {
            vec![ok_reply(request, request.payload.clone())]
        })
        .await
    }

    pub async fn with_join_policy(join: JoinPolicy) -> Self {
        Self::with_handler(join, |_| Vec::new()).await
    }

    pub async fn with_handler<F>(join: JoinPolicy, handler: F) -> Self
    where
        F: Fn(&Envelope) -> Vec<Envelope> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(4);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Handler = Arc::new(handler);

        let kick = kick_tx.clone();
        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(serve_connection(
                            stream,
                            join.clone(),
                            Arc::clone(&handler),
                            frames_tx.clone(),
                            kick.subscribe(),
                        ));
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            frames_rx,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/socket/websocket", self.addr)
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next frame received from any client, within 5 seconds
    pub async fn next_frame(&mut self) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_secs(5), self.frames_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame with the given event, skipping others
    pub async fn next_frame_with_event(&mut self, event: &str) -> Option<Envelope> {
        loop {
            let frame = self.next_frame().await?;
            if frame.event.as_str() == event {
                return Some(frame);
            }
        }
    }

    /// Close every open connection with a close frame
    pub fn kick_all(&self) {
        let _ = self.kick_tx.send(());
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.kick_all();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_connection(
    stream: TcpStream,
    join: JoinPolicy,
    handler: Handler,
    frames: mpsc::UnboundedSender<Envelope>,
    mut kick: broadcast::Receiver<()>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            message = read.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(envelope) = codec::decode(&text) else {
                    continue;
                };
                let _ = frames.send(envelope.clone());

                let responses = match envelope.event {
                    Event::Join => match &join {
                        JoinPolicy::Accept => vec![ok_reply(&envelope, json!({}))],
                        JoinPolicy::Reject(response) => vec![error_reply(&envelope, response.clone())],
                        JoinPolicy::Ignore => Vec::new(),
                    },
                    Event::Heartbeat => vec![ok_reply(&envelope, json!({}))],
                    _ => handler(&envelope),
                };

                for response in responses {
                    let text = codec::encode(&response).unwrap();
                    if write.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// `phx_reply` with status `ok` for `request`
pub fn ok_reply(request: &Envelope, response: Value) -> Envelope {
    Envelope::reply(
        request.topic.clone(),
        request.reference.clone().unwrap(),
        ReplyStatus::Ok,
        response,
    )
}

/// `phx_reply` with status `error` for `request`
pub fn error_reply(request: &Envelope, response: Value) -> Envelope {
    Envelope::reply(
        request.topic.clone(),
        request.reference.clone().unwrap(),
        ReplyStatus::Error,
        response,
    )
}

/// Accept the next in-process connection and acknowledge its join
pub async fn accept_and_join(server: &mut MemoryServer) -> MemoryPeer {
    let mut peer = server.accept().await.expect("client did not connect");
    let join = peer.recv_envelope().await.expect("client sent no join");
    assert_eq!(join.event, Event::Join);
    assert_eq!(join.ref_str(), Some("1"));
    peer.reply(&join, ReplyStatus::Ok, json!({})).unwrap();
    peer
}

/// Records connection-state callbacks
#[derive(Clone, Default)]
pub struct StateLog(Arc<Mutex<Vec<bool>>>);

impl StateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, client: &phxlink_client::PhxClient) {
        let log = Arc::clone(&self.0);
        client.on_connection_state(move |ready| log.lock().unwrap().push(ready));
    }

    pub fn events(&self) -> Vec<bool> {
        self.0.lock().unwrap().clone()
    }
}

/// Poll `condition` every 10ms, for at most 5 seconds of clock time
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let spawned tasks run for a while so late callbacks have a chance to fire
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
}
