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

//! The boundary between the session manager and a publish/subscribe wire client.
//!
//! A [`Transport`] owns the socket, framing and TLS handshake. The manager only sees
//! result codes, untyped errors, and the [`TransportEvent`]s the transport reports
//! through its registered [`TransportCallback`].

use std::{fmt::Debug, path::Path, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

/// Result code reported by a transport for a successful operation.
pub const RC_SUCCESS: i32 = 0;

/// An inbound notification from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server answered a connect; `rc` is [`RC_SUCCESS`] when the session was accepted.
    Connected { rc: i32 },
    /// The session ended.
    Disconnected { rc: i32 },
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },
}

/// Function type for receiving transport events.
///
/// Transports may invoke the callback from inside `connect` or `loop_once`, or from a
/// thread of their own.
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Creates a channel-based transport callback.
///
/// Returns a tuple containing the callback and a receiver for the events.
#[must_use]
pub fn channel_transport_callback() -> (TransportCallback, UnboundedReceiver<TransportEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = Arc::new(move |event: TransportEvent| {
        if let Err(e) = tx.send(event) {
            tracing::debug!("Failed to send transport event to channel: {e}");
        }
    });
    (callback, rx)
}

/// A publish/subscribe wire client driven by the session manager.
///
/// Errors are untyped: implementations may fail in any way and the manager treats every
/// error, and every result code other than [`RC_SUCCESS`], as a failure of that call.
#[async_trait]
pub trait Transport: Debug + Send {
    /// Registers the sink for connect, disconnect and message events.
    fn set_callback(&mut self, callback: TransportCallback);

    /// Sets the credentials presented on the next connect.
    fn set_credentials(&mut self, user_id: &str, token: &str);

    /// Sets the CA bundle used to verify the server certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the trust store cannot be used.
    fn set_tls_trust_store(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Opens a session with the server at `host:port`.
    ///
    /// A success code means the request was sent; acceptance is reported through a
    /// [`TransportEvent::Connected`] event.
    async fn connect(&mut self, host: &str, port: u16) -> anyhow::Result<i32>;

    /// Closes the session.
    async fn disconnect(&mut self) -> anyhow::Result<()>;

    /// Advances network IO by one tick, delivering any pending events.
    async fn loop_once(&mut self) -> anyhow::Result<i32>;

    /// Subscribes to `topic` at the given quality of service level.
    async fn subscribe(&mut self, topic: &str, qos: u8) -> anyhow::Result<i32>;

    /// Publishes `payload` on `topic`.
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: u8) -> anyhow::Result<i32>;
}
