//! The handle every entity shares: transport plus subscription bookkeeping.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entity::EntityIdentity;
use crate::error::TransportError;
use crate::registry::SubscriptionRegistry;
use crate::transport::{MessageCallback, Qos, Transport};

/// Wraps a [`Transport`] with de-duplicated subscriptions and the entity
/// serial counter. One per broker connection.
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    next_serial: AtomicU64,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: SubscriptionRegistry::new(),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Hand out the next entity serial. Never repeats for this client.
    ///
    /// Serials are only unique per client, which is the scope the registry
    /// compares them in. Share one `Client` per broker connection.
    pub fn next_entity_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Publish with QoS 0 and no retain flag.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.publish_with(topic, payload, Qos::AtMostOnce, false).await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.transport.publish(topic, payload, qos, retain).await
    }

    pub async fn subscribe(
        &self,
        owner: &EntityIdentity,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<(), TransportError> {
        self.registry
            .subscribe(self.transport.as_ref(), owner, topic, callback)
            .await
    }

    pub async fn unsubscribe(&self, owner: &EntityIdentity, topic: &str) -> Result<(), TransportError> {
        self.registry
            .unsubscribe(self.transport.as_ref(), owner, topic)
            .await
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("subscriptions", &self.registry.len())
            .field("next_serial", &self.next_serial.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
