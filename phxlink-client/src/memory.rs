//! In-process transport
//!
//! A [`MemoryConnector`] hands out connections whose other end is a
//! [`MemoryPeer`] accepted from the paired [`MemoryServer`]. Frames travel
//! over unbounded channels, so the whole exchange stays inside one tokio
//! runtime and works with a paused clock.
//!
//! ```rust
//! use phxlink_client::memory::memory_transport;
//! use phxlink_client::PhxClient;
//! use phxlink_core::{Envelope, ReplyStatus};
//! use serde_json::json;
//!
//! # async fn example() -> phxlink_core::Result<()> {
//! let (connector, mut server) = memory_transport();
//! let client = PhxClient::builder("memory://test").connector(connector).build()?;
//!
//! let server_side = tokio::spawn(async move {
//!     let mut peer = server.accept().await.unwrap();
//!     let join = peer.recv_envelope().await.unwrap();
//!     peer.reply(&join, ReplyStatus::Ok, json!({})).unwrap();
//!     peer
//! });
//!
//! client.connect().await?;
//! # let _peer = server_side.await.unwrap();
//! # Ok(())
//! # }
//! ```

use crate::transport::{Connection, Connector, FrameSink, FrameSource};
use async_trait::async_trait;
use phxlink_core::{codec, Envelope, Error, ReplyStatus, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a connector and the server that accepts its connections
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            accept_tx,
            refuse: Arc::new(AtomicBool::new(false)),
        },
        MemoryServer { accept_rx },
    )
}

/// Client side of the in-process transport
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Make subsequent connects fail with `Error::Connect`
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connect(format!("connection to {url} refused")));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            incoming: from_client,
            outgoing: Some(to_client),
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| Error::Connect(format!("no server listening for {url}")))?;

        Ok((
            Box::new(MemorySink {
                tx: Some(to_server),
            }),
            Box::new(MemorySource { rx: from_server }),
        ))
    }
}

/// Accepts connections made through the paired [`MemoryConnector`]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next connection
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server end of one in-process connection
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl MemoryPeer {
    /// Next text frame sent by the client, `None` once it closed
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame sent by the client, decoded
    ///
    /// Frames that do not decode are skipped.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            let text = self.recv().await?;
            if let Ok(envelope) = codec::decode(&text) {
                return Some(envelope);
            }
        }
    }

    /// Send an envelope to the client
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.send_raw(codec::encode(envelope)?)
    }

    /// Send an arbitrary frame, valid or not
    pub fn send_raw(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        let tx = self.outgoing.as_ref().ok_or(Error::ConnectionLost)?;
        tx.send(frame.into()).map_err(|_| Error::ConnectionLost)
    }

    /// Answer `request` with a `phx_reply` carrying its ref
    pub fn reply(&self, request: &Envelope, status: ReplyStatus, response: serde_json::Value) -> Result<()> {
        let reference = request
            .reference
            .clone()
            .ok_or_else(|| Error::UnexpectedReply("request has no ref".to_string()))?;
        self.send(&Envelope::reply(request.topic.clone(), reference, status, response))
    }

    /// Close the connection from the server side
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::NotConnected)?;
        tx.send(text)
            .map_err(|_| Error::Transport("peer closed the connection".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn receive(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx.recv().await.map(Ok)
    }
}
