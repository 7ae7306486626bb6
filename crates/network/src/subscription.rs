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

//! Subscription tracking for the session client.
//!
//! The server forgets subscriptions when a session drops, so every topic the application
//! asked for is remembered here and replayed after each successful connect. Topics are
//! deduplicated and kept in insertion order. There is no removal.

use std::sync::Mutex;

use indexmap::IndexSet;
use tether_core::MUTEX_POISONED;

/// An append-only, insertion-ordered set of subscribed topics.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<IndexSet<String>>,
}

impl SubscriptionRegistry {
    /// Creates a new empty [`SubscriptionRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `topic`, returning `true` if it was not already present.
    pub fn add(&self, topic: &str) -> bool {
        let mut topics = self.topics.lock().expect(MUTEX_POISONED);
        if topics.contains(topic) {
            return false;
        }
        topics.insert(topic.to_string())
    }

    /// Returns all topics in insertion order, for replay after reconnect.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.topics
            .lock()
            .expect(MUTEX_POISONED)
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.lock().expect(MUTEX_POISONED).contains(topic)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.lock().expect(MUTEX_POISONED).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.lock().expect(MUTEX_POISONED).is_empty()
    }
}
