//! Phoenix channel client
//!
//! [`PhxClient`] owns one logical connection: its state, the correlation
//! registry, the transport writer, and the background tasks that keep it
//! alive.
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: open the transport, send `phx_join` with ref `"1"`, wait
//!    for the server to accept it
//! 2. **Use**: send requests, push messages, receive server pushes
//! 3. **Keep alive**: a heartbeat goes out whenever a whole interval passed
//!    without other traffic
//! 4. **Close**: `disconnect()`, or the transport drops; either way every
//!    pending request fails with `ConnectionLost`
//! 5. **Reconnect** (opt-in): after an unexpected drop, retry with the
//!    configured strategy
//!
//! # Background Tasks
//!
//! Each connection runs a reader, which decodes frames and routes replies
//! to their waiters, a heartbeat timer, and an event pump that feeds server
//! pushes to subscribers. They are tied to the connection's epoch and are
//! stopped when it closes.
//!
//! # Cloning
//!
//! `PhxClient` is a cheap `Arc` handle. Clones share the connection and can
//! issue requests concurrently from any task.

use crate::client_builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::connection_state::{ConnectionState, Routed, SessionHandle, Shutdown};
use crate::credentials::Credentials;
use crate::events::{EventSubscribers, StateListeners, SubscriptionId};
use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectionStrategy;
use crate::refs::RefGenerator;
use crate::registry::{PendingHandle, PendingKind};
use crate::transport::{Connector, FrameSink, FrameSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use phxlink_core::{Envelope, Error, Event, Ref, Result, ServerError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Collaborators assembled by the builder
pub(crate) struct ClientParts {
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    pub credentials: Arc<dyn Credentials>,
    pub refs: Arc<dyn RefGenerator>,
    pub reconnect: Option<Box<dyn ReconnectionStrategy>>,
    pub metrics: Option<ClientMetrics>,
}

/// Correlated Phoenix channel client
#[derive(Clone)]
pub struct PhxClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn Credentials>,
    refs: Arc<dyn RefGenerator>,
    session: SessionHandle,
    writer: Mutex<Option<Writer>>,
    subscribers: EventSubscribers,
    listeners: StateListeners,
    tasks: StdMutex<Option<ConnectionTasks>>,
    reconnect: Option<Mutex<Box<dyn ReconnectionStrategy>>>,
    reconnecting: AtomicBool,
    /// Set by every loss that asks for a reconnect, cleared by the loop
    reconnect_requested: AtomicBool,
    user_closed: AtomicBool,
    metrics: Option<ClientMetrics>,
}

struct Writer {
    epoch: u64,
    sink: Box<dyn FrameSink>,
}

struct ConnectionTasks {
    epoch: u64,
    reader: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ConnectionTasks {
    fn stop(self, include_reader: bool) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.abort();
        }
        if include_reader {
            self.reader.abort();
        }
    }
}

/// Why a connection epoch is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    /// `disconnect()` was called
    Local,
    /// The transport closed or failed; called from the reader itself
    Remote,
    /// The connect attempt did not complete
    Failed,
}

impl PhxClient {
    /// Start configuring a client for `url`
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub(crate) fn from_parts(parts: ClientParts) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: parts.config,
                connector: parts.connector,
                credentials: parts.credentials,
                refs: parts.refs,
                session: SessionHandle::new(),
                writer: Mutex::new(None),
                subscribers: EventSubscribers::new(),
                listeners: StateListeners::new(),
                tasks: StdMutex::new(None),
                reconnect: parts.reconnect.map(Mutex::new),
                reconnecting: AtomicBool::new(false),
                reconnect_requested: AtomicBool::new(false),
                user_closed: AtomicBool::new(false),
                metrics: parts.metrics,
            }),
        }
    }

    /// Connect and join the configured topic
    ///
    /// Does nothing if the client is already ready.
    ///
    /// # Errors
    ///
    /// - `Error::Connect` if the transport cannot be opened
    /// - `Error::Authentication` if the server rejects the join
    /// - `Error::JoinTimeout` if no join reply arrives in time
    /// - `Error::ConnectInProgress` if another connect is running
    ///
    /// On every error the client is left `Disconnected`.
    #[tracing::instrument(skip(self), fields(url = %self.inner.config.url, topic = %self.inner.config.topic))]
    pub async fn connect(&self) -> Result<()> {
        self.inner.user_closed.store(false, Ordering::SeqCst);

        let Some(epoch) = self.inner.session.begin_connect()? else {
            tracing::debug!("Already connected");
            return Ok(());
        };

        tracing::info!(epoch, "Connecting to server");
        self.inner.establish(epoch).await
    }

    /// Close the connection
    ///
    /// Sends a close frame, fails pending requests with
    /// `Error::ConnectionLost` and stops any reconnection in progress. Does
    /// nothing if already disconnected.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.user_closed.store(true, Ordering::SeqCst);

        if self.inner.session.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        let epoch = self.inner.session.epoch();
        self.inner.teardown(epoch, Cause::Local).await;
        Ok(())
    }

    /// Send `envelope` and wait for the envelope carrying the same ref
    ///
    /// A ref is generated if the envelope has none. `timeout` defaults to
    /// the configured request timeout.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` outside `Ready`; nothing is sent
    /// - `Error::ReservedRef` if the envelope carries the join ref
    /// - `Error::Encoding` if the envelope cannot be serialized
    /// - `Error::Transport` if the write fails
    /// - `Error::Timeout` if no reply arrives in time
    /// - `Error::ConnectionLost` if the connection drops first
    #[tracing::instrument(skip(self, envelope), fields(event = %envelope.event, reference))]
    pub async fn send_request(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<Envelope> {
        let started = Instant::now();
        let event = envelope.event.to_string();

        let result = self.inner.round_trip(envelope, timeout).await;

        match &result {
            Ok(_) => tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Request completed"),
            Err(e) => tracing::debug!(error = %e, "Request failed"),
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_request(&event, result.as_ref().map(|_| ()), started.elapsed());
        }

        result
    }

    /// Send a typed request on the configured topic and decode the response
    ///
    /// A `phx_reply` with status `error` becomes `Error::Server`. A reply of
    /// any other event is decoded from its payload.
    pub async fn request<P, R>(&self, event: impl Into<Event>, payload: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let envelope = Envelope::try_new(self.inner.config.topic.clone(), event, &payload)?;
        let reply = self.send_request(envelope, None).await?;

        let response = match reply.as_reply() {
            Some(reply) => reply.into_result()?,
            None => reply.payload,
        };

        serde_json::from_value(response).map_err(|e| Error::UnexpectedReply(e.to_string()))
    }

    /// Send a message that expects no reply
    pub async fn push<P>(&self, event: impl Into<Event>, payload: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let envelope = Envelope::try_new(self.inner.config.topic.clone(), event, &payload)?;
        let text = self.inner.config.codec.encode(&envelope)?;
        let epoch = self.inner.session.ready_epoch()?;

        self.inner.send_frame(epoch, text).await?;
        self.inner.session.mark_activity();
        Ok(())
    }

    /// Receive every server push
    pub async fn subscribe<F, Fut>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.subscribers.add(None, handler).await
    }

    /// Receive server pushes for one event name
    pub async fn subscribe_event<F, Fut>(&self, event: impl Into<Event>, handler: F) -> SubscriptionId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.subscribers.add(Some(event.into()), handler).await
    }

    /// Remove a subscription; `false` if it did not exist
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(id).await
    }

    /// Be told `true` when the client becomes ready and `false` when it
    /// stops being ready
    ///
    /// The callback runs on the task that made the transition and must not
    /// block.
    pub fn on_connection_state<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(callback));
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Number of requests waiting for a reply, heartbeats included
    pub fn pending_requests(&self) -> usize {
        self.inner.session.pending_len()
    }

    /// Outstanding refs and what they wait for, oldest first
    pub fn outstanding(&self) -> Vec<(Ref, PendingKind)> {
        self.inner.session.outstanding()
    }

    /// When anything was last received on the current connection
    pub fn last_seen(&self) -> Option<Instant> {
        self.inner.session.last_seen()
    }

    /// Draw a ref from the client's generator
    pub fn next_ref(&self) -> Ref {
        self.inner.refs.next_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl ClientInner {
    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<()> {
        self.record_state();

        let (sink, source) = match self.connector.connect(&self.config.url).await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "Transport connect failed");
                self.teardown(epoch, Cause::Failed).await;
                return Err(match e {
                    Error::Connect(_) => e,
                    other => Error::Connect(other.to_string()),
                });
            }
        };
        *self.writer.lock().await = Some(Writer { epoch, sink });

        let join = match self.session.await_join(epoch) {
            Ok(handle) => handle,
            Err(e) => {
                self.teardown(epoch, Cause::Failed).await;
                return Err(e);
            }
        };
        self.record_state();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.subscribers.clone().pump(events_rx));
        let reader = tokio::spawn(Arc::clone(self).read_loop(epoch, source, events_tx));
        self.replace_tasks(ConnectionTasks {
            epoch,
            reader,
            heartbeat: None,
        });

        if let Err(e) = self.join(epoch, join).await {
            tracing::warn!(epoch, error = %e, "Join failed");
            self.teardown(epoch, Cause::Failed).await;
            return Err(e);
        }

        if !self.session.enter_ready(epoch) {
            self.teardown(epoch, Cause::Failed).await;
            return Err(Error::ConnectionLost);
        }

        let heartbeat = tokio::spawn(Arc::clone(self).heartbeat_loop(epoch));
        self.attach_heartbeat(epoch, heartbeat);
        self.record_state();

        tracing::info!(epoch, "Connected and joined");
        self.listeners.notify(true);
        Ok(())
    }

    async fn join(&self, epoch: u64, handle: PendingHandle) -> Result<()> {
        let mut payload = self.config.join_params.clone();
        payload.extend(self.credentials.join_fields());

        let envelope = Envelope::join(self.config.topic.clone(), serde_json::Value::Object(payload));
        let text = self.config.codec.encode(&envelope)?;
        self.send_frame(epoch, text)
            .await
            .map_err(|e| Error::Connect(format!("join could not be sent: {e}")))?;

        let reply = match self.session.wait(handle, self.config.join_timeout).await {
            Ok(reply) => reply,
            Err(Error::Timeout(_)) => return Err(Error::JoinTimeout(self.config.join_timeout)),
            Err(e) => return Err(e),
        };

        match reply.as_reply() {
            Some(reply) if reply.is_ok() => Ok(()),
            Some(reply) => Err(Error::Authentication(ServerError::from_response(&reply.response))),
            None => Err(Error::UnexpectedReply(format!(
                "join answered with {} instead of phx_reply",
                reply.event
            ))),
        }
    }

    async fn round_trip(&self, mut envelope: Envelope, timeout: Option<Duration>) -> Result<Envelope> {
        let reference = match &envelope.reference {
            Some(reference) => reference.clone(),
            None => {
                let reference = self.refs.next_ref();
                envelope.reference = Some(reference.clone());
                reference
            }
        };
        if reference.is_join() {
            return Err(Error::ReservedRef(reference.to_string()));
        }
        tracing::Span::current().record("reference", reference.as_str());

        let text = self.config.codec.encode(&envelope)?;
        let (epoch, handle) = self.session.register(reference.clone(), PendingKind::Request)?;

        if let Err(e) = self.send_frame(epoch, text).await {
            self.session.discard(reference.as_str());
            return Err(e);
        }
        self.session.mark_activity();

        tracing::debug!("Request sent, waiting for reply");
        let timeout = timeout.unwrap_or(self.config.request_timeout);
        self.session.wait(handle, timeout).await
    }

    async fn send_frame(&self, epoch: u64, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) if writer.epoch == epoch => {
                tracing::trace!(frame = %text, "Sending frame");
                writer.sink.send(text).await
            }
            _ => Err(Error::NotConnected),
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        epoch: u64,
        mut source: Box<dyn FrameSource>,
        events: mpsc::UnboundedSender<Envelope>,
    ) {
        loop {
            match source.receive().await {
                Some(Ok(frame)) => self.dispatch(&frame, &events),
                Some(Err(e)) => {
                    tracing::warn!(epoch, error = %e, "Transport error");
                    break;
                }
                None => {
                    tracing::info!(epoch, "Connection closed by server");
                    break;
                }
            }
        }

        drop(events);
        self.teardown(epoch, Cause::Remote).await;
    }

    fn dispatch(&self, frame: &[u8], events: &mpsc::UnboundedSender<Envelope>) {
        let envelope = match self.config.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "Dropping malformed frame");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(&e);
                }
                return;
            }
        };

        tracing::trace!(
            topic = %envelope.topic,
            event = %envelope.event,
            reference = ?envelope.ref_str(),
            "Frame received"
        );

        match self.session.route(envelope) {
            Routed::Fulfilled(fulfilled) => {
                tracing::trace!(
                    kind = fulfilled.kind.as_str(),
                    latency_ms = fulfilled.latency.as_millis() as u64,
                    "Reply matched"
                );
            }
            Routed::Heartbeat => tracing::trace!("Server heartbeat"),
            Routed::LateReply(envelope) => {
                tracing::debug!(reference = ?envelope.ref_str(), "Dropping reply with no waiting request");
            }
            Routed::Event(envelope) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_event(envelope.event.as_str());
                }
                if events.send(envelope).is_err() {
                    tracing::debug!("Event pump stopped, dropping push");
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, epoch: u64) {
        let period = self.config.heartbeat_interval;
        let start = Instant::now();
        let mut ticker = tokio::time::interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut previous_tick = start;
        loop {
            let tick = ticker.tick().await;
            if !self.session.is_current(epoch) {
                break;
            }

            let busy = self.session.active_since(previous_tick);
            previous_tick = tick;
            if busy {
                tracing::trace!("Traffic since last tick, heartbeat not needed");
                continue;
            }

            self.send_heartbeat(epoch).await;
        }
    }

    async fn send_heartbeat(self: &Arc<Self>, epoch: u64) {
        let reference = self.refs.next_ref();
        let handle = match self.session.register(reference.clone(), PendingKind::Heartbeat) {
            Ok((registered, handle)) if registered == epoch => handle,
            Ok(_) => {
                self.session.discard(reference.as_str());
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Heartbeat skipped");
                return;
            }
        };

        let envelope = Envelope::heartbeat(self.config.heartbeat_topic.clone(), reference.clone());
        let sent = match self.config.codec.encode(&envelope) {
            Ok(text) => self.send_frame(epoch, text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.session.discard(reference.as_str());
            tracing::warn!(error = %e, "Heartbeat could not be sent");
            return;
        }

        tracing::trace!(reference = %reference, "Heartbeat sent");
        if let Some(metrics) = &self.metrics {
            metrics.record_heartbeat_sent();
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.session.wait(handle, inner.config.heartbeat_interval).await {
                Ok(_) => tracing::trace!(reference = %reference, "Heartbeat acknowledged"),
                Err(Error::ConnectionLost) => {}
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "Heartbeat reply missed");
                    if let Some(metrics) = &inner.metrics {
                        metrics.record_heartbeat_missed();
                    }
                }
            }
        });
    }

    /// Close `epoch` and release its resources
    ///
    /// Safe to call repeatedly and from any task; only the first call for an
    /// epoch fails pending requests and notifies listeners.
    async fn teardown(self: &Arc<Self>, epoch: u64, cause: Cause) -> Option<Shutdown> {
        let shutdown = self.session.shut(epoch);

        let tasks = {
            let mut slot = self.lock_tasks();
            match slot.as_ref() {
                Some(tasks) if tasks.epoch == epoch => slot.take(),
                _ => None,
            }
        };
        if let Some(tasks) = tasks {
            // the reader calls this itself on remote close
            tasks.stop(cause != Cause::Remote);
        }

        let writer = {
            let mut slot = self.writer.lock().await;
            match slot.as_ref() {
                Some(writer) if writer.epoch == epoch => slot.take(),
                _ => None,
            }
        };
        if let Some(mut writer) = writer {
            if cause != Cause::Remote {
                if let Err(e) = writer.sink.close().await {
                    tracing::debug!(error = %e, "Close frame not delivered");
                }
            }
        }

        let shutdown = shutdown?;
        self.record_state();

        if shutdown.cancelled > 0 {
            tracing::debug!(epoch, cancelled = shutdown.cancelled, "Failed pending requests");
        }

        if shutdown.was_ready {
            tracing::info!(epoch, cause = ?cause, "Connection closed");
            self.listeners.notify(false);

            if cause == Cause::Remote && self.reconnect.is_some() && !self.user_closed.load(Ordering::SeqCst) {
                self.spawn_reconnect();
            }
        }

        Some(shutdown)
    }

    /// Start the reconnect loop unless one is running
    ///
    /// A loss seen while a loop is running is not dropped: the loop checks
    /// `reconnect_requested` after it finishes and starts over.
    fn spawn_reconnect(self: &Arc<Self>) {
        self.reconnect_requested.store(true, Ordering::SeqCst);
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).reconnect_loop());
    }

    fn reconnect_loop(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            self.reconnect_requested.store(false, Ordering::SeqCst);
            if let Some(strategy) = &self.reconnect {
                let mut attempt = 0u32;
                loop {
                    if self.user_closed.load(Ordering::SeqCst) {
                        tracing::debug!("Reconnection cancelled by disconnect");
                        break;
                    }

                    let Some(delay) = strategy.lock().await.next_delay(attempt) else {
                        tracing::error!(attempts = attempt, "Reconnection abandoned (max attempts reached)");
                        break;
                    };

                    tracing::info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting");
                    tokio::time::sleep(delay).await;
                    if self.user_closed.load(Ordering::SeqCst) {
                        break;
                    }

                    attempt += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reconnection_attempt();
                    }

                    let epoch = match self.session.begin_connect() {
                        Ok(Some(epoch)) => epoch,
                        // someone called connect() in the meantime
                        Ok(None) => break,
                        Err(_) => continue,
                    };

                    match self.establish(epoch).await {
                        Ok(()) => {
                            strategy.lock().await.reset();
                            if let Some(metrics) = &self.metrics {
                                metrics.record_reconnection_success();
                            }
                            tracing::info!(attempts = attempt, "Reconnected successfully");
                            break;
                        }
                        Err(e) => tracing::warn!(attempt, error = %e, "Reconnection failed"),
                    }
                }
            }
            self.reconnecting.store(false, Ordering::SeqCst);

            // the new connection may have dropped before the flag was cleared
            if self.reconnect_requested.swap(false, Ordering::SeqCst) && !self.user_closed.load(Ordering::SeqCst) {
                tracing::debug!("Connection lost while reconnecting, starting over");
                self.spawn_reconnect();
            }
        }
        .boxed()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<ConnectionTasks>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace_tasks(&self, tasks: ConnectionTasks) {
        let previous = self.lock_tasks().replace(tasks);
        if let Some(previous) = previous {
            previous.stop(true);
        }
    }

    fn attach_heartbeat(&self, epoch: u64, heartbeat: JoinHandle<()>) {
        let mut slot = self.lock_tasks();
        match slot.as_mut() {
            Some(tasks) if tasks.epoch == epoch => tasks.heartbeat = Some(heartbeat),
            _ => heartbeat.abort(),
        }
    }

    fn record_state(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_connection_state(self.session.state());
        }
    }
}
