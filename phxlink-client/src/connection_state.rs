//! Connection state and the session lock
//!
//! # Connection States
//!
//! ```text
//! Disconnected → Connecting → AwaitingJoinAck → Ready
//!      ↑              │               │           │
//!      └──────────────┴───────────────┴───────────┘
//! ```
//!
//! Only the join may be sent before `Ready`. Any failure, or an explicit
//! disconnect, returns to `Disconnected`.
//!
//! # Epochs
//!
//! Every connect attempt bumps the epoch. The reader and heartbeat tasks of
//! an attempt carry its epoch and every transition they request is checked
//! against it, so a task left over from an old connection can never tear
//! down a newer one.
//!
//! # Locking
//!
//! The state, the epoch and the [`CorrelationRegistry`] share one
//! `std::sync::Mutex`. It is only ever held for a handful of map operations
//! and never across an `.await`, which makes registration, fulfilment and
//! `cancel_all` mutually exclusive with each other and with state changes.

use crate::registry::{CorrelationRegistry, Fulfilled, PendingHandle, PendingKind};
use phxlink_core::{Envelope, Error, Event, Ref, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Where the connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Join sent, waiting for the server to accept it
    AwaitingJoinAck,
    /// Joined and usable
    Ready,
}

impl ConnectionState {
    /// Numeric value reported on the connection-state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::AwaitingJoinAck => 2,
            ConnectionState::Ready => 3,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingJoinAck => "awaiting_join_ack",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

struct Session {
    state: ConnectionState,
    epoch: u64,
    registry: CorrelationRegistry,
    last_seen: Option<Instant>,
    last_activity: Instant,
}

/// What the reader should do with an inbound envelope
#[derive(Debug)]
pub(crate) enum Routed {
    /// Completed an outstanding request
    Fulfilled(Fulfilled),
    /// A server heartbeat; only counts as having heard from the server
    Heartbeat,
    /// A reply whose ref is no longer outstanding
    LateReply(Envelope),
    /// A server push for the event subscribers
    Event(Envelope),
}

/// Result of closing an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shutdown {
    pub was_ready: bool,
    pub cancelled: usize,
}

/// Shared handle to the session state
#[derive(Clone)]
pub(crate) struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Session {
                state: ConnectionState::Disconnected,
                epoch: 0,
                registry: CorrelationRegistry::new(),
                last_seen: None,
                last_activity: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // a panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Whether `epoch` is the live, ready connection
    pub fn is_current(&self, epoch: u64) -> bool {
        let session = self.lock();
        session.epoch == epoch && session.state == ConnectionState::Ready
    }

    /// Start a connect attempt
    ///
    /// Returns the new epoch, or `None` if the session is already ready.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectInProgress` while another attempt is running.
    pub fn begin_connect(&self) -> Result<Option<u64>> {
        let mut session = self.lock();
        match session.state {
            ConnectionState::Ready => Ok(None),
            ConnectionState::Connecting | ConnectionState::AwaitingJoinAck => {
                Err(Error::ConnectInProgress)
            }
            ConnectionState::Disconnected => {
                session.epoch += 1;
                session.state = ConnectionState::Connecting;
                session.last_seen = None;
                Ok(Some(session.epoch))
            }
        }
    }

    /// Move to `AwaitingJoinAck` and register the join ref
    ///
    /// Fails with `Error::ConnectionLost` if the attempt was abandoned in
    /// the meantime.
    pub fn await_join(&self, epoch: u64) -> Result<PendingHandle> {
        let mut session = self.lock();
        if session.epoch != epoch || session.state != ConnectionState::Connecting {
            return Err(Error::ConnectionLost);
        }
        let handle = session.registry.register(Ref::join(), PendingKind::Join)?;
        session.state = ConnectionState::AwaitingJoinAck;
        Ok(handle)
    }

    /// Move to `Ready` if `epoch` is still waiting for its join reply
    pub fn enter_ready(&self, epoch: u64) -> bool {
        let mut session = self.lock();
        if session.epoch != epoch || session.state != ConnectionState::AwaitingJoinAck {
            return false;
        }
        session.state = ConnectionState::Ready;
        session.last_activity = Instant::now();
        true
    }

    /// Close `epoch`, failing everything outstanding with `ConnectionLost`
    ///
    /// Returns `None` when the epoch is stale or already closed, so each
    /// epoch is shut exactly once.
    pub fn shut(&self, epoch: u64) -> Option<Shutdown> {
        let mut session = self.lock();
        if session.epoch != epoch || session.state == ConnectionState::Disconnected {
            return None;
        }
        let was_ready = session.state == ConnectionState::Ready;
        session.state = ConnectionState::Disconnected;
        let cancelled = session.registry.cancel_all(Error::ConnectionLost);
        Some(Shutdown {
            was_ready,
            cancelled,
        })
    }

    /// Register an outgoing request on the ready connection
    ///
    /// Returns the epoch the request belongs to together with its handle.
    pub fn register(&self, reference: Ref, kind: PendingKind) -> Result<(u64, PendingHandle)> {
        let mut session = self.lock();
        if session.state != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        let handle = session.registry.register(reference, kind)?;
        Ok((session.epoch, handle))
    }

    /// Epoch of the ready connection
    pub fn ready_epoch(&self) -> Result<u64> {
        let session = self.lock();
        match session.state {
            ConnectionState::Ready => Ok(session.epoch),
            _ => Err(Error::NotConnected),
        }
    }

    /// Forget an outstanding ref; `true` if it was still registered
    pub fn discard(&self, reference: &str) -> bool {
        self.lock().registry.remove(reference)
    }

    /// Classify an inbound envelope and fulfil its request if it has one
    pub fn route(&self, envelope: Envelope) -> Routed {
        let mut session = self.lock();
        let now = Instant::now();
        session.last_seen = Some(now);

        if let Some(reference) = envelope.reference.clone() {
            if session.registry.contains(reference.as_str()) {
                let fulfilled = session.registry.fulfill(reference.as_str(), Ok(envelope));
                if let Some(fulfilled) = fulfilled {
                    if fulfilled.kind != PendingKind::Heartbeat {
                        session.last_activity = now;
                    }
                    return Routed::Fulfilled(fulfilled);
                }
                return Routed::Heartbeat;
            }
        }

        match envelope.event {
            Event::Heartbeat => Routed::Heartbeat,
            Event::Reply => Routed::LateReply(envelope),
            _ => {
                session.last_activity = now;
                Routed::Event(envelope)
            }
        }
    }

    /// Record outbound traffic other than heartbeats
    pub fn mark_activity(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Whether any non-heartbeat traffic happened after `since`
    pub fn active_since(&self, since: Instant) -> bool {
        self.lock().last_activity > since
    }

    /// Last time anything arrived from the server on this epoch
    pub fn last_seen(&self) -> Option<Instant> {
        self.lock().last_seen
    }

    pub fn pending_len(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn outstanding(&self) -> Vec<(Ref, PendingKind)> {
        self.lock().registry.outstanding()
    }

    /// Wait for a registered request to complete
    ///
    /// On timeout the entry is removed and `Error::Timeout` returned, unless
    /// the reply won the race for the lock, in which case the reply is
    /// returned. If the returned future is dropped early the entry is
    /// removed as well.
    pub async fn wait(&self, handle: PendingHandle, timeout: Duration) -> Result<Envelope> {
        let PendingHandle { reference, mut rx, .. } = handle;
        let mut guard = DiscardOnDrop {
            session: self,
            reference: Some(reference),
        };

        let outcome = tokio::time::timeout(timeout, &mut rx).await;
        let reference = guard.disarm();

        match outcome {
            Ok(Ok(result)) => result,
            // the slot was dropped without an answer
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_elapsed) => {
                if self.discard(reference.as_str()) {
                    Err(Error::Timeout(timeout))
                } else {
                    rx.try_recv().unwrap_or(Err(Error::Timeout(timeout)))
                }
            }
        }
    }
}

struct DiscardOnDrop<'a> {
    session: &'a SessionHandle,
    reference: Option<Ref>,
}

impl DiscardOnDrop<'_> {
    fn disarm(&mut self) -> Ref {
        self.reference.take().unwrap_or_else(|| Ref::new(""))
    }
}

impl Drop for DiscardOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(reference) = self.reference.take() {
            self.session.discard(reference.as_str());
        }
    }
}
