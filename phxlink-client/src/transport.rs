//! Transport contract and the WebSocket implementation
//!
//! The lifecycle manager never talks to a socket directly. It asks a
//! [`Connector`] for a connection and gets back two halves:
//!
//! - a [`FrameSink`] owned by the client and used for every write
//! - a [`FrameSource`] moved into the reader task
//!
//! Splitting the halves lets the reader block on `receive()` while other
//! tasks send, without sharing a lock between them.
//!
//! [`WebSocketConnector`] is the production implementation. The in-process
//! transport in [`crate::memory`] implements the same traits for tests.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use phxlink_core::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The pair of halves produced by a successful connect
pub type Connection = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens connections to a server
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` when the connection cannot be established.
    async fn connect(&self, url: &str) -> Result<Connection>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send(&mut self, text: String) -> Result<()>;

    /// Send a close frame and shut the write half
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next data frame
    ///
    /// Returns `None` once the connection is closed. Control frames are
    /// handled internally and never surface here.
    async fn receive(&mut self) -> Option<Result<Vec<u8>>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector backed by tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        tracing::debug!(url = %url, status = %response.status(), "websocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(WebSocketSink { write }),
            Box::new(WebSocketSource { read }),
        ))
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        // the peer may already be gone; closing is best effort
        let _ = self.write.send(Message::Close(None)).await;
        match self.write.close().await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::Transport(e.to_string())),
        }
    }
}

struct WebSocketSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn receive(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(Message::Binary(bytes)) => return Some(Ok(bytes)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "received close frame");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return None
                }
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            }
        }
    }
}
