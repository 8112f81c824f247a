//! The publish/subscribe seam between the core and the broker connection.
//!
//! Everything that touches the network lives behind [`Transport`]. The core
//! hands it topics, payloads and callbacks; it hands back opaque
//! [`Substate`] tokens that the core stores and returns on unsubscribe
//! without ever looking inside.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::TransportError;

/// Callback invoked with `(topic, payload)` for every message on a subscribed topic.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Token identifying one live subscription, owned by the transport that issued it.
#[derive(Clone)]
pub struct Substate(Arc<dyn Any + Send + Sync>);

impl Substate {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Recover the transport's own representation.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Substate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Substate(..)")
    }
}

/// Broker capability injected by the caller.
///
/// Implementations must tolerate several calls in flight at once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire a message at the broker.
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to `topic`. `prior` is whatever the last unsubscribe left
    /// behind for this owner and topic, if anything.
    async fn subscribe(
        &self,
        prior: Option<Substate>,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<Substate, TransportError>;

    /// Release a subscription. `Some` signals a partial teardown whose
    /// residue must be passed back on the next subscribe.
    async fn unsubscribe(&self, substate: Substate) -> Result<Option<Substate>, TransportError>;
}

/// Exact-topic callback table shared by a transport and the router.
#[derive(Default)]
pub struct TopicCallbacks {
    callbacks: DashMap<String, MessageCallback>,
}

impl TopicCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`, replacing any earlier one.
    pub fn insert(&self, topic: impl Into<String>, callback: MessageCallback) {
        self.callbacks.insert(topic.into(), callback);
    }

    pub fn remove(&self, topic: &str) -> Option<MessageCallback> {
        self.callbacks.remove(topic).map(|(_, cb)| cb)
    }

    pub fn get(&self, topic: &str) -> Option<MessageCallback> {
        self.callbacks.get(topic).map(|entry| Arc::clone(entry.value()))
    }

    /// Call the callback registered for `topic`. Returns `false` when none is.
    ///
    /// The table lock is released before the callback runs.
    pub fn dispatch(&self, topic: &str, payload: &str) -> bool {
        match self.get(topic) {
            Some(callback) => {
                callback(topic, payload);
                true
            }
            None => false,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.callbacks.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
