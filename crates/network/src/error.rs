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

//! Error types for the session client.

use std::str::Utf8Error;

use thiserror::Error;

/// A typed error for session operations.
///
/// Connect and loop failures are recovered inside the reconnect loop and only surface in
/// logs. Callers of [`crate::session::ConnectionManager`] see the remaining variants.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport rejected or failed a connect.
    #[error("Connect failed: {0}")]
    ConnectFailure(String),
    /// The transport read loop failed.
    #[error("Loop failed: {0}")]
    LoopFailure(String),
    /// An inbound payload was not valid UTF-8.
    #[error("Failed to decode payload on '{topic}': {source}")]
    Decode {
        topic: String,
        #[source]
        source: Utf8Error,
    },
    /// No transport is installed, the session was shut down.
    #[error("Session not initialized")]
    NotInitialized,
    /// Forwarding a publish or subscribe to the transport failed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Normalizes a transport result into a connect outcome.
    pub(crate) fn from_connect(result: anyhow::Result<i32>) -> Result<(), Self> {
        match result {
            Ok(crate::transport::RC_SUCCESS) => Ok(()),
            Ok(rc) => Err(Self::ConnectFailure(format!("result code {rc}"))),
            Err(e) => Err(Self::ConnectFailure(format!("{e:#}"))),
        }
    }

    /// Normalizes a transport result into a loop outcome.
    pub(crate) fn from_loop(result: anyhow::Result<i32>) -> Result<(), Self> {
        match result {
            Ok(crate::transport::RC_SUCCESS) => Ok(()),
            Ok(rc) => Err(Self::LoopFailure(format!("result code {rc}"))),
            Err(e) => Err(Self::LoopFailure(format!("{e:#}"))),
        }
    }

    /// Normalizes a transport result for an application-facing call.
    pub(crate) fn from_forward(op: &str, result: anyhow::Result<i32>) -> Result<(), Self> {
        match result {
            Ok(crate::transport::RC_SUCCESS) => Ok(()),
            Ok(rc) => Err(Self::Transport(format!("{op} returned result code {rc}"))),
            Err(e) => Err(Self::Transport(format!("{op} failed: {e:#}"))),
        }
    }
}
