//! Server push fan-out and connection-state listeners
//!
//! Envelopes that are neither replies nor heartbeats are server pushes:
//! chat messages, presence diffs, `phx_close` and the like. The reader hands
//! them to a per-connection pump task, which delivers each one to every
//! matching subscriber in arrival order. A slow subscriber delays later
//! pushes but never reply routing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use phxlink_client::PhxClient;
//!
//! # async fn example(client: &PhxClient) {
//! // every push
//! client.subscribe(|envelope| async move {
//!     println!("{} on {}", envelope.event, envelope.topic);
//! }).await;
//!
//! // only one event
//! client.subscribe_event("new_msg", |envelope| async move {
//!     println!("message: {}", envelope.payload);
//! }).await;
//!
//! client.on_connection_state(|ready| println!("ready: {ready}"));
//! # }
//! ```

use phxlink_core::{Envelope, Event};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Type for push handler functions
pub type EventFn = Arc<dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type for connection-state callbacks
pub type StateFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Identifies a subscription for [`unsubscribe`](crate::PhxClient::unsubscribe)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    event: Option<Event>,
    handler: EventFn,
}

/// Registry of push subscribers
#[derive(Clone, Default)]
pub(crate) struct EventSubscribers {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl EventSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, optionally limited to one event name
    pub async fn add<F, Fut>(&self, event: Option<Event>, handler: F) -> SubscriptionId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: EventFn = Arc::new(move |envelope| Box::pin(handler(envelope)));
        self.subscriptions.lock().await.push(Subscription { id, event, handler });
        id
    }

    pub async fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Deliver one push to every matching handler, in subscription order
    pub async fn dispatch(&self, envelope: Envelope) -> usize {
        let handlers: Vec<EventFn> = {
            let subscriptions = self.subscriptions.lock().await;
            subscriptions
                .iter()
                .filter(|s| s.event.as_ref().map_or(true, |e| *e == envelope.event))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        if handlers.is_empty() {
            tracing::trace!(event = %envelope.event, topic = %envelope.topic, "no subscriber for push");
        }

        for handler in &handlers {
            handler(envelope.clone()).await;
        }
        handlers.len()
    }

    /// Deliver pushes from `rx` until the reader drops its sender
    pub async fn pump(self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            self.dispatch(envelope).await;
        }
    }
}

/// Callbacks told when the connection becomes ready or stops being ready
#[derive(Default)]
pub(crate) struct StateListeners {
    listeners: std::sync::Mutex<Vec<StateFn>>,
}

impl StateListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: StateFn) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// Invoke every listener outside the lock
    pub fn notify(&self, ready: bool) {
        let listeners: Vec<StateFn> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener(ready);
        }
    }
}
