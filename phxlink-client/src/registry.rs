//! Correlation of outstanding requests with their replies
//!
//! # Request Lifecycle
//!
//! 1. **Register**: a ref is reserved and a oneshot slot created
//! 2. **Send**: the envelope goes out carrying that ref
//! 3. **Wait**: the caller awaits the receiving half of the slot
//! 4. **Fulfil**: the reader finds the ref on an inbound envelope, removes
//!    the entry and completes the slot
//!
//! An entry leaves the registry exactly once: on fulfil, on timeout
//! ([`remove`](CorrelationRegistry::remove)), or when the connection is torn
//! down ([`cancel_all`](CorrelationRegistry::cancel_all)). Whichever happens
//! first wins; the others find nothing to do.
//!
//! The registry itself is a plain map. It lives inside the session lock
//! together with the connection state, which is what makes registration and
//! `cancel_all` mutually exclusive.

use phxlink_core::{Envelope, Error, Ref, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What an outstanding ref is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// The join handshake
    Join,
    /// A caller-issued request
    Request,
    /// A keep-alive
    Heartbeat,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Join => "join",
            PendingKind::Request => "request",
            PendingKind::Heartbeat => "heartbeat",
        }
    }
}

struct PendingRequest {
    kind: PendingKind,
    created_at: Instant,
    slot: oneshot::Sender<Result<Envelope>>,
}

/// Receiving side of a registered request
#[derive(Debug)]
pub struct PendingHandle {
    pub(crate) reference: Ref,
    pub(crate) kind: PendingKind,
    pub(crate) rx: oneshot::Receiver<Result<Envelope>>,
}

impl PendingHandle {
    pub fn reference(&self) -> &Ref {
        &self.reference
    }

    pub fn kind(&self) -> PendingKind {
        self.kind
    }
}

/// Outcome of a successful [`CorrelationRegistry::fulfill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fulfilled {
    pub kind: PendingKind,
    pub latency: Duration,
}

/// Map of outstanding refs to their result slots
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: HashMap<Ref, PendingRequest>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `reference` and create its result slot
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateRef` if the ref is already outstanding. The
    /// existing entry is left untouched.
    pub fn register(&mut self, reference: Ref, kind: PendingKind) -> Result<PendingHandle> {
        if self.pending.contains_key(&reference) {
            return Err(Error::DuplicateRef(reference.to_string()));
        }

        let (slot, rx) = oneshot::channel();
        self.pending.insert(
            reference.clone(),
            PendingRequest {
                kind,
                created_at: Instant::now(),
                slot,
            },
        );

        Ok(PendingHandle {
            reference,
            kind,
            rx,
        })
    }

    /// Complete the slot for `reference` and drop the entry
    ///
    /// Unknown refs are ignored and yield `None`. A waiter that has already
    /// gone away does not make this fail.
    pub fn fulfill(&mut self, reference: &str, result: Result<Envelope>) -> Option<Fulfilled> {
        let pending = self.pending.remove(reference)?;
        let _ = pending.slot.send(result);
        Some(Fulfilled {
            kind: pending.kind,
            latency: pending.created_at.elapsed(),
        })
    }

    /// Drop the entry for `reference` without completing it
    pub fn remove(&mut self, reference: &str) -> bool {
        self.pending.remove(reference).is_some()
    }

    /// Fail every outstanding entry with `error`
    pub fn cancel_all(&mut self, error: Error) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.slot.send(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.pending.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outstanding refs with their kind, oldest first
    pub fn outstanding(&self) -> Vec<(Ref, PendingKind)> {
        let mut entries: Vec<_> = self
            .pending
            .iter()
            .map(|(reference, pending)| (pending.created_at, reference.clone(), pending.kind))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        entries
            .into_iter()
            .map(|(_, reference, kind)| (reference, kind))
            .collect()
    }
}
