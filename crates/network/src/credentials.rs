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

//! Credentials presented to the server on each connect.

use std::fmt::Debug;

use tether_core::env::get_env_var;

/// Environment variable holding the user ID.
pub const USER_ID_ENV_VAR: &str = "TETHER_USER_ID";

/// Environment variable holding the access token.
pub const TOKEN_ENV_VAR: &str = "TETHER_TOKEN";

/// A user ID and access token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(Credentials))
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Creates a new [`Credentials`] instance.
    #[must_use]
    pub fn new<U: Into<String>, T: Into<String>>(user_id: U, token: T) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }

    /// Reads credentials from `TETHER_USER_ID` and `TETHER_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if either variable is not set.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(
            get_env_var(USER_ID_ENV_VAR)?,
            get_env_var(TOKEN_ENV_VAR)?,
        ))
    }
}

/// Supplies the current credentials each time the session connects.
///
/// Implementations backed by mutable storage pair with a `session.auth_changed` publish,
/// which forces the session to reconnect with the new values.
pub trait CredentialsProvider: Debug + Send + Sync {
    /// Returns the credentials to present on the next connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are unavailable.
    fn credentials(&self) -> anyhow::Result<Credentials>;
}

/// A provider always returning the same credentials.
#[derive(Clone, Debug)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

impl CredentialsProvider for StaticCredentials {
    fn credentials(&self) -> anyhow::Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// A provider reading the environment on every connect.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialsProvider for EnvCredentials {
    fn credentials(&self) -> anyhow::Result<Credentials> {
        Credentials::from_env()
    }
}
