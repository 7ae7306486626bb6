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

//! Configuration for the session client.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tether_core::correctness::{check_nonempty_string, check_predicate_true};

use crate::{
    backoff::ExponentialBackoff,
    tls::{FALLBACK_TRUST_STORE_RESOURCE, SYSTEM_TRUST_STORE},
};

/// Default server host.
pub const DEFAULT_HOST: &str = "orcart.facebook.com";

/// Default server port.
pub const DEFAULT_PORT: u16 = 443;

/// Configuration for a [`super::ConnectionManager`].
///
/// Every field has a default, so a partial TOML document is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// The server host.
    pub host: String,
    /// The server port.
    pub port: u16,
    /// The quality of service level for subscribe and publish calls.
    pub qos: u8,
    /// The system CA bundle, preferred when it exists.
    pub system_trust_store: PathBuf,
    /// The bundled CA resource used when the system bundle is missing.
    pub fallback_trust_store_resource: String,
    /// The delay (milliseconds) before the first reconnect attempt.
    pub reconnect_delay_initial_ms: u64,
    /// The maximum reconnect delay (milliseconds) before jitter.
    pub reconnect_delay_max_ms: u64,
    /// The exponential backoff factor for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// The jitter fraction applied to reconnection delays, in [0.0, 1.0).
    pub reconnect_jitter: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            qos: 0,
            system_trust_store: PathBuf::from(SYSTEM_TRUST_STORE),
            fallback_trust_store_resource: FALLBACK_TRUST_STORE_RESOURCE.to_string(),
            reconnect_delay_initial_ms: 1_000,
            reconnect_delay_max_ms: 300_000,
            reconnect_backoff_factor: 2.0,
            reconnect_jitter: 0.2,
        }
    }
}

impl SessionConfig {
    /// Parses a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails [`Self::validate`].
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or fallback resource is empty, the QoS level is not
    /// 0, 1 or 2, or the backoff parameters are invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_nonempty_string(&self.host, "host")?;
        check_nonempty_string(
            &self.fallback_trust_store_resource,
            "fallback_trust_store_resource",
        )?;
        check_predicate_true(self.qos <= 2, "`qos` must be 0, 1 or 2")?;
        self.backoff()?;
        Ok(())
    }

    /// Builds the reconnect backoff policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the backoff parameters are invalid.
    pub fn backoff(&self) -> anyhow::Result<ExponentialBackoff> {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_delay_initial_ms),
            Duration::from_millis(self.reconnect_delay_max_ms),
            self.reconnect_backoff_factor,
            self.reconnect_jitter,
        )
    }
}
