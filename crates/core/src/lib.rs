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

//! Core foundational utilities for the tether session client.
//!
//! The `tether-core` crate is intentionally small. It supplies the building blocks shared
//! by the other workspace crates:
//!
//! - Correctness validation functions.
//! - Environment variable helpers.
//! - Bundled resource path resolution.

#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod correctness;
pub mod env;
pub mod paths;

/// Message for when a mutex guard cannot be acquired due to poisoning.
///
/// Mutex guards should use `expect` rather than handle poison errors.
/// A poisoned mutex indicates a thread panicked while holding the lock,
/// meaning protected data may be in an inconsistent state.
pub const MUTEX_POISONED: &str = "Mutex poisoned";
