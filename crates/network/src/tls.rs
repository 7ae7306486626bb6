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

//! Resolution of the CA bundle handed to the transport for TLS verification.

use std::path::{Path, PathBuf};

use tether_core::paths::ResourceLocator;

/// Path of the system CA bundle on Debian-like systems.
pub const SYSTEM_TRUST_STORE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Name of the CA bundle resource shipped with the application.
pub const FALLBACK_TRUST_STORE_RESOURCE: &str = "ca-certificates-fallback.crt";

/// Returns `system` if it exists, otherwise the bundled `fallback` resource path.
///
/// The fallback path is returned even when it does not exist, so the transport reports
/// the missing file when it loads it.
#[must_use]
pub fn resolve_trust_store(
    system: &Path,
    resources: &dyn ResourceLocator,
    fallback: &str,
) -> PathBuf {
    if system.exists() {
        tracing::debug!("Using system trust store {}", system.display());
        return system.to_path_buf();
    }

    let path = resources.resource_path(fallback);
    if path.exists() {
        tracing::info!(
            "System trust store {} not found, using bundled {}",
            system.display(),
            path.display()
        );
    } else {
        tracing::warn!(
            "Neither system trust store {} nor bundled {} exist",
            system.display(),
            path.display()
        );
    }
    path
}
