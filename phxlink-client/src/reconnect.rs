//! Reconnection strategies
//!
//! Automatic reconnection is off unless a strategy is passed to the
//! builder. When a ready connection drops without `disconnect()` having been
//! called, the client asks the strategy how long to wait before each new
//! attempt, and stops when it returns `None`.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: doubling delays up to a cap
//! - **FixedDelay**: constant delay between attempts
//! - **NoReconnect**: never retry
//!
//! # Examples
//!
//! ```rust
//! use phxlink_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! // 5s, 10s, 20s, then give up
//! let mut backoff = ExponentialBackoff::default();
//! assert!(backoff.next_delay(0).unwrap() >= Duration::from_secs(5));
//! assert!(backoff.next_delay(3).is_none());
//! ```

use rand::Rng;
use std::time::Duration;

/// Decides the delay before each reconnection attempt
///
/// `reset()` is called after a successful reconnect so the next outage
/// starts from the first delay again.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed), or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget accumulated state after a successful reconnect
    fn reset(&mut self);
}

/// Exponential backoff with an optional random jitter of up to 25%
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Unlimited attempts starting at `min_delay`, capped at `max_delay`
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Attempt number last passed to `next_delay`
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for ExponentialBackoff {
    /// 5 s doubling up to 30 s, three attempts, with jitter
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
            .with_max_attempts(3)
            .with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return Some(delay);
        }

        let delay_ms = delay.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 4);
        Some(Duration::from_millis(delay_ms + jitter_ms))
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// The same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Never reconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
