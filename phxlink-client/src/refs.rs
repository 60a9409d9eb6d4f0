//! Ref generation
//!
//! Every request needs a ref that no other outstanding request uses. The
//! generator is injected into the client so tests and unusual servers can
//! pick their own scheme.

use phxlink_core::{Ref, JOIN_REF};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of request refs
pub trait RefGenerator: Send + Sync {
    /// Produce the next ref. Must never return the join ref `"1"`.
    fn next_ref(&self) -> Ref;
}

/// Decimal counter starting after the join ref
///
/// The counter is never reset, not even across reconnects, so a reply that
/// arrives late from an old connection can never match a new request.
#[derive(Debug)]
pub struct SequentialRefs {
    next: AtomicU64,
}

impl SequentialRefs {
    pub fn new() -> Self {
        Self::starting_at(2)
    }

    /// Counter whose first ref is `start`; values below 2 are bumped to 2
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(2)),
        }
    }
}

impl Default for SequentialRefs {
    fn default() -> Self {
        Self::new()
    }
}

impl RefGenerator for SequentialRefs {
    fn next_ref(&self) -> Ref {
        Ref::from(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Random 64-bit refs rendered as 16 hex digits
///
/// Useful when several clients share a topic and refs should not be
/// guessable. Collisions with an outstanding ref surface as
/// `Error::DuplicateRef` at registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRefs;

impl RefGenerator for RandomRefs {
    fn next_ref(&self) -> Ref {
        let value: u64 = rand::thread_rng().gen();
        let reference = format!("{value:016x}");
        debug_assert_ne!(reference, JOIN_REF);
        Ref::from(reference)
    }
}
