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

//! Utility functions for resolving bundled resource paths.
//!
//! Applications ship auxiliary files (such as a fallback CA bundle) in a `resources`
//! directory. The location can be overridden with the `TETHER_RESOURCES_PATH`
//! environment variable, otherwise it is expected next to the running executable.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

/// Environment variable overriding the bundled resources directory.
pub const RESOURCES_PATH_ENV_VAR: &str = "TETHER_RESOURCES_PATH";

/// Name of the resources directory relative to the executable.
pub const RESOURCES_DIR_NAME: &str = "resources";

/// Maps a bundled resource name to its filesystem path.
pub trait ResourceLocator: Debug + Send + Sync {
    /// Returns the path for the resource with the given `name`.
    ///
    /// The path is not required to exist.
    fn resource_path(&self, name: &str) -> PathBuf;
}

/// Resolves resources under a single root directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundledResources {
    root: PathBuf,
}

impl BundledResources {
    /// Creates a new [`BundledResources`] rooted at `root`.
    #[must_use]
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Creates a locator rooted at [`get_resources_path`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(get_resources_path())
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for BundledResources {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ResourceLocator for BundledResources {
    fn resource_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Returns the bundled resources directory path.
///
/// Resolution order:
/// 1. `TETHER_RESOURCES_PATH` if set.
/// 2. `resources/` in the directory of the current executable.
/// 3. `resources/` in the current working directory.
#[must_use]
pub fn get_resources_path() -> PathBuf {
    if let Ok(path) = std::env::var(RESOURCES_PATH_ENV_VAR) {
        return PathBuf::from(path);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RESOURCES_DIR_NAME)
}

/// Returns the path of the bundled resource with the given `name`.
#[must_use]
pub fn resource_path(name: &str) -> PathBuf {
    get_resources_path().join(name)
}
