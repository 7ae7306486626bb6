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

//! Session machinery for the tether publish/subscribe client.
//!
//! The [`session::ConnectionManager`] keeps a single session alive over an unreliable
//! network: it reconnects with jittered exponential [`backoff`], replays the
//! [`subscription`] registry after every connect, and reports connection changes and
//! inbound messages on a [`tether_common::msgbus::MessageBus`].
//!
//! The wire client itself sits behind the [`transport::Transport`] trait.
//!
//! # Feature flags
//!
//! - `stubs`: Exposes the `stubs::MockTransport` test double to other crates.

#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backoff;
pub mod credentials;
pub mod error;
pub mod session;
pub mod state;
pub mod subscription;
pub mod tls;
pub mod transport;

#[cfg(any(test, feature = "stubs"))]
pub mod stubs;
