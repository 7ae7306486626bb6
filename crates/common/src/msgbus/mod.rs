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

//! A thread-safe publish/subscribe message bus.
//!
//! Components publish messages on a topic and handlers subscribe with a topic pattern.
//! Patterns may contain `*` and `?` wildcards (see [`matching::is_matching`]).
//!
//! The bus is shared between components as an `Arc<MessageBus>`. Handlers are invoked
//! synchronously on the publishing thread, after the subscription lock is released, so
//! a handler may itself publish or subscribe.

pub mod handler;
pub mod matching;

use std::{
    any::Any,
    cmp::Ordering,
    fmt::Display,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use tether_core::{
    MUTEX_POISONED,
    correctness::{FAILED, check_valid_string_ascii},
};
use ustr::Ustr;

pub use self::handler::{MessageHandler, ShareableMessageHandler, TypedMessageHandler};
use self::matching::is_matching;

/// A validated topic a message is published on. Wildcards are not permitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Ustr);

impl Topic {
    /// Creates a new validated [`Topic`].
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is empty, not ASCII, or contains a wildcard.
    pub fn new<T: AsRef<str>>(value: T) -> anyhow::Result<Self> {
        let value = value.as_ref();
        check_valid_string_ascii(value, stringify!(value))?;
        if value.contains(['*', '?']) {
            anyhow::bail!("Topic must not contain wildcards, was '{value}'");
        }
        Ok(Self(Ustr::from(value)))
    }

    /// Returns the topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated subscription pattern, possibly containing `*` and `?` wildcards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern(Ustr);

impl Pattern {
    /// Creates a new validated [`Pattern`].
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is empty, contains whitespace, or is not ASCII.
    pub fn new<T: AsRef<str>>(value: T) -> anyhow::Result<Self> {
        let value = value.as_ref();
        check_valid_string_ascii(value, stringify!(value))?;
        Ok(Self(Ustr::from(value)))
    }

    /// Returns whether this pattern matches `topic`.
    #[must_use]
    pub fn matches(&self, topic: &Topic) -> bool {
        is_matching(topic.as_str().as_bytes(), self.0.as_str().as_bytes())
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handler registered against a pattern.
///
/// Two subscriptions are equal when they share both pattern and handler ID. Ordering is by
/// descending priority, then by registration sequence.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// The shareable message handler for the subscription.
    pub handler: ShareableMessageHandler,
    /// Store a copy of the handler ID for faster equality checks.
    pub handler_id: Ustr,
    /// The pattern for the subscription.
    pub pattern: Pattern,
    /// Higher priority handlers receive messages first.
    pub priority: u8,
    sequence: u64,
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.handler_id == other.handler_id
    }
}

impl Eq for Subscription {}

impl PartialOrd for Subscription {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Subscription {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// A thread-safe message bus instance.
#[derive(Debug, Default)]
pub struct MessageBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_sequence: AtomicU64,
    pub_count: AtomicU64,
}

impl MessageBus {
    /// Creates a new empty [`MessageBus`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to messages on topics matching `pattern`.
    ///
    /// Subscribing the same handler to the same pattern twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is invalid.
    pub fn subscribe<T: AsRef<str>>(
        &self,
        pattern: T,
        handler: ShareableMessageHandler,
        priority: Option<u8>,
    ) -> anyhow::Result<()> {
        let pattern = Pattern::new(pattern)?;
        let sub = Subscription {
            handler_id: handler.id(),
            handler,
            pattern,
            priority: priority.unwrap_or(0),
            sequence: self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed),
        };

        let mut subs = self.subscriptions.lock().expect(MUTEX_POISONED);
        if subs.contains(&sub) {
            tracing::warn!("{sub:?} already exists");
            return Ok(());
        }

        tracing::debug!("Subscribing {sub:?}");
        subs.push(sub);
        subs.sort();
        Ok(())
    }

    /// Unsubscribes `handler` from `pattern`, returning whether a subscription was removed.
    pub fn unsubscribe<T: AsRef<str>>(&self, pattern: T, handler: &ShareableMessageHandler) -> bool {
        let Ok(pattern) = Pattern::new(pattern) else {
            return false;
        };
        let handler_id = handler.id();

        let mut subs = self.subscriptions.lock().expect(MUTEX_POISONED);
        let before = subs.len();
        subs.retain(|s| !(s.pattern == pattern && s.handler_id == handler_id));
        let removed = subs.len() != before;
        if removed {
            tracing::debug!("Unsubscribed handler {handler_id} from {pattern}");
        }
        removed
    }

    /// Returns whether `handler` is subscribed to `pattern`.
    #[must_use]
    pub fn is_subscribed<T: AsRef<str>>(&self, pattern: T, handler: &ShareableMessageHandler) -> bool {
        let Ok(pattern) = Pattern::new(pattern) else {
            return false;
        };
        let handler_id = handler.id();
        self.subscriptions
            .lock()
            .expect(MUTEX_POISONED)
            .iter()
            .any(|s| s.pattern == pattern && s.handler_id == handler_id)
    }

    /// Returns whether any handler would receive a message published on `topic`.
    #[must_use]
    pub fn has_subscribers<T: AsRef<str>>(&self, topic: T) -> bool {
        self.subscriptions_count(topic) > 0
    }

    /// Returns the count of subscriptions matching `topic`.
    #[must_use]
    pub fn subscriptions_count<T: AsRef<str>>(&self, topic: T) -> usize {
        let Ok(topic) = Topic::new(topic) else {
            return 0;
        };
        self.subscriptions
            .lock()
            .expect(MUTEX_POISONED)
            .iter()
            .filter(|s| s.pattern.matches(&topic))
            .count()
    }

    /// Returns all subscribed patterns, in delivery order.
    #[must_use]
    pub fn patterns(&self) -> Vec<Pattern> {
        self.subscriptions
            .lock()
            .expect(MUTEX_POISONED)
            .iter()
            .map(|s| s.pattern)
            .collect()
    }

    /// Returns the count of messages published on this bus.
    #[must_use]
    pub fn pub_count(&self) -> u64 {
        self.pub_count.load(AtomicOrdering::Relaxed)
    }

    /// Publishes `message` to every handler whose pattern matches `topic`.
    ///
    /// Invalid topics are logged and dropped.
    pub fn publish<T: AsRef<str>>(&self, topic: T, message: &dyn Any) {
        let topic = match Topic::new(topic.as_ref()) {
            Ok(topic) => topic,
            Err(e) => {
                tracing::error!("{FAILED} to publish: {e}");
                return;
            }
        };

        let handlers: Vec<ShareableMessageHandler> = {
            let subs = self.subscriptions.lock().expect(MUTEX_POISONED);
            subs.iter()
                .filter(|s| s.pattern.matches(&topic))
                .map(|s| s.handler.clone())
                .collect()
        };

        self.pub_count.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!("Publishing on {topic} to {} handler(s)", handlers.len());

        for handler in handlers {
            handler.0.handle(message);
        }
    }
}
