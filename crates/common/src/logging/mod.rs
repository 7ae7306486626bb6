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

//! The logging framework for tether.
//!
//! All components log through the `tracing` macros. This module only installs a
//! `tracing_subscriber` formatter, either from the `RUST_LOG` environment variable
//! ([`init_tracing`]) or from a [`LoggerConfig`] ([`init_logging`]).

pub mod config;

use std::{
    env,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

pub use self::config::LoggerConfig;

/// Environment variable holding a [`LoggerConfig`] spec string.
pub const LOG_ENV_VAR: &str = "TETHER_LOG";

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Returns whether a subscriber was installed by this module.
pub fn logging_is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::Relaxed)
}

/// Initialize tracing.
///
/// Tracing can be configured to filter modules and write up to a specific level by passing
/// a configuration using the `RUST_LOG` environment variable. Nothing is installed when the
/// variable is not set.
///
/// # Errors
///
/// Returns an error if tracing subscriber fails to initialize.
pub fn init_tracing() -> anyhow::Result<()> {
    if let Ok(v) = env::var("RUST_LOG") {
        let env_filter = EnvFilter::new(v.clone());

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))?;

        LOGGING_INITIALIZED.store(true, Ordering::Relaxed);
        tracing::debug!("Initialized tracing logs with RUST_LOG={v}");
    }
    Ok(())
}

/// Initialize logging from the given `config`.
///
/// Should only be called once during an applications run, ideally at the beginning.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is already set.
pub fn init_logging(config: &LoggerConfig) -> anyhow::Result<()> {
    let env_filter = config.env_filter()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(config.is_colored)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    LOGGING_INITIALIZED.store(true, Ordering::Relaxed);

    if config.print_config {
        tracing::info!("Logging initialized with {config:?}");
    }
    Ok(())
}

/// Parses a string into a [`LevelFilter`].
///
/// Accepts the usual level names case-insensitively, plus `WARNING` as an alias for `WARN`.
///
/// # Errors
///
/// Returns an error if the string is not a valid level.
pub fn parse_level_filter_str(s: &str) -> anyhow::Result<LevelFilter> {
    let mut level = s.trim().to_uppercase();
    if level == "WARNING" {
        level = "WARN".to_string();
    }
    LevelFilter::from_str(&level).map_err(|_| anyhow::anyhow!("Invalid log level, was '{s}'"))
}
