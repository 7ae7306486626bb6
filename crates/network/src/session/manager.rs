// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Tether Contributors. All rights reserved.
//  https://github.com/tether-rs/tether
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The connection manager keeping a single session alive.
//!
//! One background task owns the connection lifecycle. Each iteration it:
//!
//! 1. Connects if disconnected, presenting fresh credentials. A failed connect backs off
//!    and restarts the iteration.
//! 2. Applies a pending forced reconnect by disconnecting and marking the session
//!    disconnected without waiting for the transport to confirm.
//! 3. Advances the transport read loop by one tick. A failed tick backs off and restarts
//!    the iteration.
//!
//! Transport callbacks are queued on a channel and applied by the same task after each
//! transport call, so the task is the only writer of the connection state and the only
//! caller of connect, disconnect and loop.

use std::{
    any::Any,
    fmt::Debug,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use tether_common::msgbus::{MessageBus, MessageHandler, ShareableMessageHandler};
use tether_core::{MUTEX_POISONED, paths::ResourceLocator};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use ustr::Ustr;
use uuid::Uuid;

use super::{
    config::SessionConfig,
    events::{AUTH_CHANGED_TOPIC, NETWORK_CHANGED_TOPIC, SessionEvents},
};
use crate::{
    backoff::{Backoff, WaitOutcome},
    credentials::CredentialsProvider,
    error::SessionError,
    state::ConnectionState,
    subscription::SubscriptionRegistry,
    tls::resolve_trust_store,
    transport::{RC_SUCCESS, Transport, TransportEvent, channel_transport_callback},
};

type TransportSlot = tokio::sync::Mutex<Option<Box<dyn Transport>>>;

/// Shared state of a session, owned by the background task and every manager handle.
struct SessionInner {
    config: SessionConfig,
    transport: TransportSlot,
    credentials: Arc<dyn CredentialsProvider>,
    events: SessionEvents,
    registry: SubscriptionRegistry,
    backoff: Backoff,
    state: AtomicU8,
    force_reconnect: AtomicBool,
    connect_attempts: AtomicU64,
    cancellation_token: CancellationToken,
}

impl Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SessionInner))
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &ConnectionState::from_atomic(&self.state))
            .field("subscriptions", &self.registry.len())
            .field("backoff_attempt", &self.backoff.attempt())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn is_connected(&self) -> bool {
        ConnectionState::from_atomic(&self.state).is_connected()
    }

    /// Sets the connection state, publishing an event only if it changed.
    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if previous == state {
            return;
        }

        tracing::info!("Session {previous} -> {state}");
        self.events.connection_changed(state.is_connected());
    }

    fn request_reconnect(&self) {
        self.backoff.reset();
        // A wait about to start is cut short as well, the interrupt is held for it
        if self.backoff.interrupt() {
            tracing::debug!("Interrupted backoff wait");
        }
        // Set last so the loop consuming it also sees the interrupt to discard
        self.force_reconnect.store(true, Ordering::Release);
        tracing::info!("Reconnect requested");
    }

    async fn run(self: Arc<Self>, mut events: UnboundedReceiver<TransportEvent>) {
        tracing::debug!("Started task 'session'");

        // A connect was accepted by the transport but the server has not answered yet
        let mut awaiting_connack = false;

        while !self.cancellation_token.is_cancelled() {
            if !self.is_connected() && !awaiting_connack {
                let result = self.connect().await;
                awaiting_connack = result.is_ok();
                self.drain_events(&mut events, &mut awaiting_connack).await;

                if let Err(e) = result {
                    tracing::warn!("{e}");
                    if self.backoff_wait().await == WaitOutcome::Shutdown {
                        break;
                    }
                    continue;
                }
            }

            // Cleared before disconnecting so a request arriving meanwhile is kept
            if self.force_reconnect.swap(false, Ordering::AcqRel) {
                tracing::info!("Forcing reconnect");
                self.backoff.reset();
                self.backoff.clear_interrupt();
                self.disconnect().await;
                // The transport never reports the disconnect when the network is gone
                self.set_state(ConnectionState::Disconnected);
                awaiting_connack = false;
                self.drain_events(&mut events, &mut awaiting_connack).await;
                continue;
            }

            let result = self.loop_once().await;
            self.drain_events(&mut events, &mut awaiting_connack).await;

            if let Err(e) = result {
                tracing::warn!("{e}");
                awaiting_connack = false;
                if self.backoff_wait().await == WaitOutcome::Shutdown {
                    break;
                }
            }
        }

        self.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        self.transport.lock().await.take();
        tracing::debug!("Completed task 'session'");
    }

    async fn connect(&self) -> Result<(), SessionError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let credentials = self
            .credentials
            .credentials()
            .map_err(|e| SessionError::ConnectFailure(format!("credentials unavailable: {e}")))?;

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(SessionError::NotInitialized)?;
        transport.set_credentials(&credentials.user_id, &credentials.token);

        let (host, port) = (&self.config.host, self.config.port);
        tracing::debug!("Connecting to {host}:{port} (attempt {attempt})");
        SessionError::from_connect(transport.connect(host, port).await)
    }

    async fn disconnect(&self) {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return;
        };

        if let Err(e) = transport.disconnect().await {
            tracing::warn!("Error disconnecting: {e:#}");
        }
    }

    async fn loop_once(&self) -> Result<(), SessionError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(SessionError::NotInitialized)?;
        SessionError::from_loop(transport.loop_once().await)
    }

    async fn backoff_wait(&self) -> WaitOutcome {
        self.backoff.wait(&self.cancellation_token).await
    }

    async fn drain_events(
        &self,
        events: &mut UnboundedReceiver<TransportEvent>,
        awaiting_connack: &mut bool,
    ) {
        while let Ok(event) = events.try_recv() {
            match event {
                TransportEvent::Connected { rc } => {
                    *awaiting_connack = false;
                    self.on_connect(rc).await;
                }
                TransportEvent::Disconnected { rc } => {
                    *awaiting_connack = false;
                    tracing::debug!("Transport disconnected (rc={rc})");
                    self.set_state(ConnectionState::Disconnected);
                }
                TransportEvent::Message { topic, payload } => self.on_message(topic, &payload),
            }
        }
    }

    async fn on_connect(&self, rc: i32) {
        if rc != RC_SUCCESS {
            tracing::warn!("Server refused session (rc={rc})");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.backoff.reset();

        // Held across the transition and the replay, which `subscribe` also locks, so
        // each topic is subscribed once for this connect
        let mut guard = self.transport.lock().await;
        self.set_state(ConnectionState::Connected);
        if let Some(transport) = guard.as_mut() {
            self.replay_subscriptions(&mut **transport).await;
        }
    }

    async fn replay_subscriptions(&self, transport: &mut dyn Transport) {
        let topics = self.registry.all();
        if topics.is_empty() {
            return;
        }

        tracing::debug!("Replaying {} subscription(s)", topics.len());
        for topic in topics {
            let result = transport.subscribe(&topic, self.config.qos).await;
            if let Err(e) = SessionError::from_forward("subscribe", result) {
                tracing::error!("Failed to resubscribe to {topic}: {e}");
            }
        }
    }

    fn on_message(&self, topic: String, payload: &[u8]) {
        match std::str::from_utf8(payload) {
            Ok(text) => {
                tracing::trace!("Received message on {topic}");
                self.events.message_received(topic, text.to_string());
            }
            Err(source) => {
                let e = SessionError::Decode { topic, source };
                tracing::error!("{e}, dropping message");
            }
        }
    }
}

/// Forces a reconnect on any message, whatever its payload.
#[derive(Debug)]
struct ForceReconnectHandler {
    id: Ustr,
    session: Weak<SessionInner>,
}

impl ForceReconnectHandler {
    fn new(topic: &str, session: Weak<SessionInner>) -> Self {
        Self {
            id: Ustr::from(&format!("{topic}-{}", Uuid::new_v4())),
            session,
        }
    }
}

impl MessageHandler for ForceReconnectHandler {
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, _message: &dyn Any) {
        if let Some(session) = self.session.upgrade() {
            session.request_reconnect();
        }
    }
}

/// Keeps a single publish/subscribe session alive.
///
/// Handles are cheap to clone and share one background task. The task runs until
/// [`ConnectionManager::shutdown`] is called or the runtime stops.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<SessionInner>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    bus_handlers: Arc<Vec<(&'static str, ShareableMessageHandler)>>,
}

impl Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ConnectionManager))
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Configures `transport` and starts the background session task.
    ///
    /// The TLS trust store is the system bundle when present, otherwise the bundled
    /// fallback resource from `resources`. The session listens on the bus for
    /// `session.auth_changed` and `session.network_changed`, both of which force a
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `config` is invalid.
    /// - No tokio runtime is running.
    /// - The transport rejects the trust store.
    pub fn initialize(
        config: SessionConfig,
        mut transport: Box<dyn Transport>,
        credentials: Arc<dyn CredentialsProvider>,
        bus: Arc<MessageBus>,
        resources: &dyn ResourceLocator,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("Session requires a tokio runtime: {e}"))?;
        let backoff = Backoff::new(config.backoff()?);

        let trust_store = resolve_trust_store(
            &config.system_trust_store,
            resources,
            &config.fallback_trust_store_resource,
        );
        transport.set_tls_trust_store(&trust_store)?;

        let (callback, events_rx) = channel_transport_callback();
        transport.set_callback(callback);

        let inner = Arc::new(SessionInner {
            config,
            transport: tokio::sync::Mutex::new(Some(transport)),
            credentials,
            events: SessionEvents::new(bus.clone()),
            registry: SubscriptionRegistry::new(),
            backoff,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            force_reconnect: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            cancellation_token: CancellationToken::new(),
        });

        let mut bus_handlers = Vec::with_capacity(2);
        for topic in [AUTH_CHANGED_TOPIC, NETWORK_CHANGED_TOPIC] {
            let handler = ShareableMessageHandler(Arc::new(ForceReconnectHandler::new(
                topic,
                Arc::downgrade(&inner),
            )));
            bus.subscribe(topic, handler.clone(), None)?;
            bus_handlers.push((topic, handler));
        }

        tracing::info!(
            "Starting session for {}:{}",
            inner.config.host,
            inner.config.port
        );
        let task = runtime.spawn(inner.clone().run(events_rx));

        Ok(Self {
            inner,
            task: Arc::new(Mutex::new(Some(task))),
            bus_handlers: Arc::new(bus_handlers),
        })
    }

    /// Adds `topic` to the replayed subscriptions.
    ///
    /// A new topic is also subscribed immediately when the session is connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the immediate transport subscribe fails. The topic stays
    /// registered and is subscribed on the next connect.
    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        // Ordered against replay on connect, see `SessionInner::on_connect`
        let mut guard = self.inner.transport.lock().await;
        if !self.inner.registry.add(topic) {
            tracing::debug!("Already subscribed to {topic}");
            return Ok(());
        }
        tracing::debug!("Added subscription {topic}");

        if !self.is_connected() {
            return Ok(());
        }

        let transport = guard.as_mut().ok_or(SessionError::NotInitialized)?;
        let result = transport.subscribe(topic, self.inner.config.qos).await;
        SessionError::from_forward("subscribe", result)
    }

    /// Publishes `payload` on `topic` through the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The session was shut down ([`SessionError::NotInitialized`]).
    /// - The transport fails the publish.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let mut guard = self.inner.transport.lock().await;
        let transport = guard.as_mut().ok_or(SessionError::NotInitialized)?;
        let result = transport.publish(topic, payload, self.inner.config.qos).await;
        SessionError::from_forward("publish", result)
    }

    /// Tears down the current session and reconnects, skipping any backoff in progress.
    ///
    /// Safe to call from any thread at any time.
    pub fn force_reconnect(&self) {
        self.inner.request_reconnect();
    }

    /// Stops the background task, disconnecting the transport and releasing it.
    ///
    /// Further publishes fail with [`SessionError::NotInitialized`].
    pub async fn shutdown(&self) {
        let bus = self.inner.events.bus();
        for (topic, handler) in self.bus_handlers.iter() {
            bus.unsubscribe(topic, handler);
        }

        self.inner.cancellation_token.cancel();

        let task = self.task.lock().expect(MUTEX_POISONED).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!("Session task failed: {e}");
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_atomic(&self.inner.state)
    }

    /// Returns the attempt number the next backoff wait will use.
    #[must_use]
    pub fn backoff_attempt(&self) -> u32 {
        self.inner.backoff.attempt()
    }

    /// Returns the registered topics in replay order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.registry.all()
    }

    /// Returns the total count of connect attempts.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns whether the background task has finished.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.task
            .lock()
            .expect(MUTEX_POISONED)
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}
