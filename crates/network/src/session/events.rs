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

//! Message bus topics and payloads of the session client.
//!
//! The session publishes [`ConnectionChanged`] and [`MessageReceived`] and listens for
//! any message on [`AUTH_CHANGED_TOPIC`] or [`NETWORK_CHANGED_TOPIC`], which force a
//! reconnect whatever the payload.

use std::sync::Arc;

use tether_common::msgbus::MessageBus;

/// Published by the credentials owner when the stored credentials change.
pub const AUTH_CHANGED_TOPIC: &str = "session.auth_changed";

/// Published by the network monitor when connectivity changes.
pub const NETWORK_CHANGED_TOPIC: &str = "session.network_changed";

/// Published by the session on each connection state change.
pub const CONNECTION_CHANGED_TOPIC: &str = "session.connection_changed";

/// Published by the session for each inbound message.
pub const MESSAGE_RECEIVED_TOPIC: &str = "session.message_received";

/// Payload of [`CONNECTION_CHANGED_TOPIC`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionChanged {
    pub connected: bool,
}

/// Payload of [`MESSAGE_RECEIVED_TOPIC`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageReceived {
    /// The topic the message arrived on.
    pub topic: String,
    /// The decoded UTF-8 payload.
    pub payload: String,
}

/// Payload published on [`AUTH_CHANGED_TOPIC`] by credential owners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthChanged;

/// Payload published on [`NETWORK_CHANGED_TOPIC`] by network monitors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkChanged;

/// The outward notification surface of the session.
#[derive(Clone, Debug)]
pub struct SessionEvents {
    bus: Arc<MessageBus>,
}

impl SessionEvents {
    #[must_use]
    pub const fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }

    #[must_use]
    pub const fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Publishes a [`ConnectionChanged`] event.
    pub fn connection_changed(&self, connected: bool) {
        self.bus
            .publish(CONNECTION_CHANGED_TOPIC, &ConnectionChanged { connected });
    }

    /// Publishes a [`MessageReceived`] event.
    pub fn message_received(&self, topic: String, payload: String) {
        self.bus
            .publish(MESSAGE_RECEIVED_TOPIC, &MessageReceived { topic, payload });
    }
}
