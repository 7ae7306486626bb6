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

//! A scriptable in-memory [`Transport`] for tests.
//!
//! [`MockTransport`] is cheaply cloneable: keep one clone in the test to script outcomes,
//! inject events and inspect recorded calls while the session owns the other.

use std::{
    collections::VecDeque,
    fmt::Debug,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tether_core::MUTEX_POISONED;
use tokio::time::Instant;

use crate::transport::{RC_SUCCESS, Transport, TransportCallback, TransportEvent};

/// A closure run by a [`MockTransport`] on each disconnect call.
pub type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

/// A call received by a [`MockTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    SetCredentials { user_id: String, token: String },
    SetTlsTrustStore(PathBuf),
    Connect { host: String, port: u16 },
    Disconnect,
    Subscribe { topic: String, qos: u8 },
    Publish { topic: String, payload: Vec<u8>, qos: u8 },
}

/// A scripted result for a connect or loop call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockOutcome {
    /// Return the given result code.
    Code(i32),
    /// Fail with the given error message.
    Error(String),
}

impl MockOutcome {
    fn into_result(self) -> anyhow::Result<i32> {
        match self {
            Self::Code(rc) => Ok(rc),
            Self::Error(msg) => Err(anyhow::anyhow!(msg)),
        }
    }
}

struct MockState {
    callback: Option<TransportCallback>,
    connect_script: VecDeque<MockOutcome>,
    loop_script: VecDeque<MockOutcome>,
    calls: Vec<TransportCall>,
    connect_times: Vec<Instant>,
    loop_count: u64,
    auto_connack: bool,
    disconnect_hook: Option<DisconnectHook>,
}

/// An in-memory transport with scripted outcomes.
///
/// Unscripted connect and loop calls succeed. A successful connect reports
/// `Connected { rc: 0 }` through the callback unless auto-acknowledgement is disabled,
/// and a disconnect reports `Disconnected { rc: 0 }`.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    loop_interval: Duration,
}

impl Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(MUTEX_POISONED);
        f.debug_struct(stringify!(MockTransport))
            .field("calls", &state.calls.len())
            .field("loop_count", &state.loop_count)
            .field("loop_interval", &self.loop_interval)
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new [`MockTransport`] whose loop ticks take 10ms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                callback: None,
                connect_script: VecDeque::new(),
                loop_script: VecDeque::new(),
                calls: Vec::new(),
                connect_times: Vec::new(),
                loop_count: 0,
                auto_connack: true,
                disconnect_hook: None,
            })),
            loop_interval: Duration::from_millis(10),
        }
    }

    /// Sets how long each loop tick waits before returning.
    #[must_use]
    pub fn with_loop_interval(mut self, loop_interval: Duration) -> Self {
        self.loop_interval = loop_interval;
        self
    }

    /// Sets whether a successful connect reports `Connected` by itself.
    #[must_use]
    pub fn with_auto_connack(self, auto_connack: bool) -> Self {
        self.state.lock().expect(MUTEX_POISONED).auto_connack = auto_connack;
        self
    }

    /// Sets a closure to run inside each disconnect call, before it returns.
    pub fn set_disconnect_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        self.state.lock().expect(MUTEX_POISONED).disconnect_hook = Some(Arc::new(hook));
    }

    /// Queues outcomes for the next connect calls.
    pub fn push_connect_outcomes<I: IntoIterator<Item = MockOutcome>>(&self, outcomes: I) {
        self.state
            .lock()
            .expect(MUTEX_POISONED)
            .connect_script
            .extend(outcomes);
    }

    /// Queues outcomes for the next loop calls.
    pub fn push_loop_outcomes<I: IntoIterator<Item = MockOutcome>>(&self, outcomes: I) {
        self.state
            .lock()
            .expect(MUTEX_POISONED)
            .loop_script
            .extend(outcomes);
    }

    /// Delivers `event` through the registered callback, returning whether one was set.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let callback = self.state.lock().expect(MUTEX_POISONED).callback.clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    /// Returns all recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().expect(MUTEX_POISONED).calls.clone()
    }

    /// Returns the topics of all recorded subscribe calls in order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Returns the count of recorded calls matching `predicate`.
    #[must_use]
    pub fn count_calls<F: Fn(&TransportCall) -> bool>(&self, predicate: F) -> usize {
        self.state
            .lock()
            .expect(MUTEX_POISONED)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Returns the count of connect calls.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.count_calls(|call| matches!(call, TransportCall::Connect { .. }))
    }

    /// Returns the count of disconnect calls.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.count_calls(|call| matches!(call, TransportCall::Disconnect))
    }

    /// Returns the instant of each connect call.
    #[must_use]
    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().expect(MUTEX_POISONED).connect_times.clone()
    }

    /// Returns the count of completed loop ticks.
    #[must_use]
    pub fn loop_count(&self) -> u64 {
        self.state.lock().expect(MUTEX_POISONED).loop_count
    }

    fn record(&self, call: TransportCall) {
        self.state.lock().expect(MUTEX_POISONED).calls.push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_callback(&mut self, callback: TransportCallback) {
        self.state.lock().expect(MUTEX_POISONED).callback = Some(callback);
    }

    fn set_credentials(&mut self, user_id: &str, token: &str) {
        self.record(TransportCall::SetCredentials {
            user_id: user_id.to_string(),
            token: token.to_string(),
        });
    }

    fn set_tls_trust_store(&mut self, path: &Path) -> anyhow::Result<()> {
        self.record(TransportCall::SetTlsTrustStore(path.to_path_buf()));
        Ok(())
    }

    async fn connect(&mut self, host: &str, port: u16) -> anyhow::Result<i32> {
        let (outcome, auto_connack) = {
            let mut state = self.state.lock().expect(MUTEX_POISONED);
            state.calls.push(TransportCall::Connect {
                host: host.to_string(),
                port,
            });
            state.connect_times.push(Instant::now());
            let outcome = state
                .connect_script
                .pop_front()
                .unwrap_or(MockOutcome::Code(RC_SUCCESS));
            (outcome, state.auto_connack)
        };

        let result = outcome.into_result();
        if auto_connack && matches!(result, Ok(RC_SUCCESS)) {
            self.emit(TransportEvent::Connected { rc: RC_SUCCESS });
        }
        result
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.record(TransportCall::Disconnect);
        let hook = self.state.lock().expect(MUTEX_POISONED).disconnect_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
        self.emit(TransportEvent::Disconnected { rc: RC_SUCCESS });
        Ok(())
    }

    async fn loop_once(&mut self) -> anyhow::Result<i32> {
        tokio::time::sleep(self.loop_interval).await;

        let mut state = self.state.lock().expect(MUTEX_POISONED);
        state.loop_count += 1;
        state
            .loop_script
            .pop_front()
            .unwrap_or(MockOutcome::Code(RC_SUCCESS))
            .into_result()
    }

    async fn subscribe(&mut self, topic: &str, qos: u8) -> anyhow::Result<i32> {
        self.record(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(RC_SUCCESS)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: u8) -> anyhow::Result<i32> {
        self.record(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(RC_SUCCESS)
    }
}
