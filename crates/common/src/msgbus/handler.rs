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

//! Message handler functionality for the message bus.
//!
//! Handlers receive messages as `&dyn Any`. A [`TypedMessageHandler`] downcasts to a
//! concrete payload type and silently ignores anything else, so several payload types
//! can share a topic pattern.

use std::{any::Any, fmt::Debug, marker::PhantomData, sync::Arc};

use ustr::Ustr;
use uuid::Uuid;

/// A handler which can be subscribed to the [`super::MessageBus`].
pub trait MessageHandler: Send + Sync {
    /// Returns the unique identifier for this handler.
    fn id(&self) -> Ustr;
    /// Handles a message of any type.
    fn handle(&self, message: &dyn Any);
}

/// A handler invoking `callback` for messages of type `T` only.
pub struct TypedMessageHandler<T: 'static + ?Sized, F: Fn(&T) + Send + Sync + 'static> {
    id: Ustr,
    callback: F,
    _phantom: PhantomData<fn(&T)>,
}

impl<T: 'static, F: Fn(&T) + Send + Sync + 'static> TypedMessageHandler<T, F> {
    /// Creates a new handler with an optional custom ID.
    pub fn new<S: AsRef<str>>(id: Option<S>, callback: F) -> Self {
        let id = id.map_or_else(generate_unique_handler_id, |s| Ustr::from(s.as_ref()));
        Self {
            id,
            callback,
            _phantom: PhantomData,
        }
    }

    /// Creates a new handler with an auto-generated ID.
    pub fn from(callback: F) -> Self {
        Self::new::<Ustr>(None, callback)
    }
}

impl<T: 'static, F: Fn(&T) + Send + Sync + 'static> MessageHandler for TypedMessageHandler<T, F> {
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, message: &dyn Any) {
        if let Some(typed_msg) = message.downcast_ref::<T>() {
            (self.callback)(typed_msg);
        }
    }
}

impl<T: 'static, F: Fn(&T) + Send + Sync + 'static> Debug for TypedMessageHandler<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(TypedMessageHandler))
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

fn generate_unique_handler_id() -> Ustr {
    Ustr::from(&Uuid::new_v4().to_string())
}

/// A reference counted handler which can be shared between subscriptions and threads.
#[derive(Clone)]
#[repr(transparent)]
pub struct ShareableMessageHandler(pub Arc<dyn MessageHandler>);

impl ShareableMessageHandler {
    /// Returns the ID of the wrapped handler.
    #[must_use]
    pub fn id(&self) -> Ustr {
        self.0.id()
    }
}

impl From<Arc<dyn MessageHandler>> for ShareableMessageHandler {
    fn from(value: Arc<dyn MessageHandler>) -> Self {
        Self(value)
    }
}

impl<T: 'static, F: Fn(&T) + Send + Sync + 'static> From<TypedMessageHandler<T, F>>
    for ShareableMessageHandler
{
    fn from(value: TypedMessageHandler<T, F>) -> Self {
        Self(Arc::new(value))
    }
}

impl Debug for ShareableMessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ShareableMessageHandler))
            .field("id", &self.0.id())
            .finish()
    }
}
