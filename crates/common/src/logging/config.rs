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

use std::{collections::BTreeMap, env};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use super::{LOG_ENV_VAR, parse_level_filter_str};

/// Configuration for the tracing subscriber installed by [`super::init_logging`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Maximum log level to write to stdout.
    #[serde(
        serialize_with = "serialize_level",
        deserialize_with = "deserialize_level"
    )]
    pub stdout_level: LevelFilter,
    /// Per-module log levels, keyed by tracing target (e.g. `tether_network::session`).
    #[serde(
        serialize_with = "serialize_levels",
        deserialize_with = "deserialize_levels"
    )]
    pub module_levels: BTreeMap<String, LevelFilter>,
    /// If logger is using ANSI color codes.
    pub is_colored: bool,
    /// If the configuration should be logged at initialization.
    pub print_config: bool,
}

impl Default for LoggerConfig {
    /// Creates a new default [`LoggerConfig`] instance.
    fn default() -> Self {
        Self {
            stdout_level: LevelFilter::INFO,
            module_levels: BTreeMap::new(),
            is_colored: false,
            print_config: false,
        }
    }
}

impl LoggerConfig {
    /// Parses a spec string such as `stdout=debug;tether_network=trace;is_colored`.
    ///
    /// # Errors
    ///
    /// Returns an error if a pair is malformed or a level is invalid.
    pub fn from_spec(spec: &str) -> anyhow::Result<Self> {
        let mut config = Self::default();
        for kv in spec.split(';') {
            let kv = kv.trim();
            if kv.is_empty() {
                continue;
            }

            match kv.to_lowercase().as_str() {
                "is_colored" => config.is_colored = true,
                "print_config" => config.print_config = true,
                _ => {
                    let Some((k, v)) = kv.split_once('=') else {
                        anyhow::bail!("Invalid spec pair: {kv}");
                    };
                    let level = parse_level_filter_str(v)?;
                    let k = k.trim();
                    if k.eq_ignore_ascii_case("stdout") {
                        config.stdout_level = level;
                    } else {
                        config.module_levels.insert(k.to_string(), level);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Retrieves the logger configuration from the `TETHER_LOG` environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let spec = env::var(LOG_ENV_VAR)?;
        Self::from_spec(&spec)
    }

    /// Returns the filter directives string, most general directive first.
    #[must_use]
    pub fn directives(&self) -> String {
        let mut directives = vec![self.stdout_level.to_string().to_lowercase()];
        for (module, level) in &self.module_levels {
            directives.push(format!("{module}={}", level.to_string().to_lowercase()));
        }
        directives.join(",")
    }

    /// Builds the [`EnvFilter`] for this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a module directive cannot be parsed.
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        EnvFilter::try_new(self.directives())
            .map_err(|e| anyhow::anyhow!("Invalid logging directives: {e}"))
    }
}

fn serialize_level<S: Serializer>(level: &LevelFilter, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&level.to_string())
}

fn deserialize_level<'de, D: Deserializer<'de>>(d: D) -> Result<LevelFilter, D::Error> {
    let s = String::deserialize(d)?;
    parse_level_filter_str(&s).map_err(serde::de::Error::custom)
}

fn serialize_levels<S: Serializer>(
    levels: &BTreeMap<String, LevelFilter>,
    s: S,
) -> Result<S::Ok, S::Error> {
    let as_strings: BTreeMap<&str, String> = levels
        .iter()
        .map(|(k, v)| (k.as_str(), v.to_string()))
        .collect();
    as_strings.serialize(s)
}

fn deserialize_levels<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, LevelFilter>, D::Error> {
    let raw = BTreeMap::<String, String>::deserialize(d)?;
    raw.into_iter()
        .map(|(k, v)| {
            parse_level_filter_str(&v)
                .map(|level| (k, level))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}
