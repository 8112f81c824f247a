//! Entities: the individually addressable facets of a device.
//!
//! An [`Entity`] owns its topic pair and a cached state, and keeps a shared
//! handle on the [`Client`]. The kind-specific part is the [`EntityState`]
//! it wraps: [`RelayState`], [`ShutterState`] or [`SensorState`].
//!
//! Inbound messages are applied to the cached state first, then forwarded
//! to the attached listener (if any) as a [`StateUpdate`].

pub mod relay;
pub mod sensor;
pub mod shutter;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{PayloadError, TopicError, TransportError};
use crate::topic::{EntityKind, Topics};
use crate::transport::MessageCallback;

pub use relay::{Relay, RelayState};
pub use sensor::{Sensor, SensorKind, SensorState, SensorValue};
pub use shutter::{Shutter, ShutterState};

/// Kind-specific state held by an [`Entity`].
pub trait EntityState: Send + 'static {
    const KIND: EntityKind;

    /// Fold one inbound payload into the state.
    ///
    /// # Errors
    ///
    /// Returns the reason the payload was not understood. The state must be
    /// left untouched in that case.
    fn apply(&mut self, payload: &str) -> Result<(), PayloadError>;
}

/// Identity of one entity instance, used to key its subscriptions.
///
/// `serial` comes from the client's monotonic counter, so two entities never
/// compare equal even when they share device, kind and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityIdentity {
    serial: u64,
    device_id: Arc<str>,
    kind: EntityKind,
    index: u8,
}

impl EntityIdentity {
    pub fn new(serial: u64, device_id: &str, kind: EntityKind, index: u8) -> Self {
        Self {
            serial,
            device_id: Arc::from(device_id),
            kind,
            index,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}#{}", self.device_id, self.kind, self.index, self.serial)
    }
}

/// Notification sent to a listener after an entity applied an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub entity: EntityIdentity,
    pub payload: String,
}

struct Shared<S> {
    identity: EntityIdentity,
    state: Mutex<S>,
    listener: Mutex<Option<mpsc::Sender<StateUpdate>>>,
}

impl<S: EntityState> Shared<S> {
    fn status_change_received(&self, payload: &str) {
        if let Err(e) = self.state.lock().apply(payload) {
            debug!("Dropping {} update for {}: {}", S::KIND, self.identity, e);
        }

        // Clone out so the lock is not held across the send.
        let listener = self.listener.lock().clone();
        if let Some(tx) = listener {
            let update = StateUpdate {
                entity: self.identity.clone(),
                payload: payload.to_string(),
            };
            if let Err(e) = tx.try_send(update) {
                warn!("State listener for {} not accepting updates: {}", self.identity, e);
            }
        }
    }
}

/// A relay, shutter or sensor aggregate bound to its device's topics.
pub struct Entity<S: EntityState> {
    shared: Arc<Shared<S>>,
    topics: Topics,
    client: Arc<Client>,
}

impl<S: EntityState> Entity<S> {
    /// Create an entity. No subscription is made until
    /// [`subscribe_topics`](Self::subscribe_topics).
    pub fn new(
        client: Arc<Client>,
        device_id: &str,
        device_name: &str,
        index: u8,
        state: S,
    ) -> Result<Self, TopicError> {
        let topics = Topics::new(device_name, S::KIND, index)?;
        let identity = EntityIdentity::new(client.next_entity_serial(), device_id, S::KIND, index);

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                state: Mutex::new(state),
                listener: Mutex::new(None),
            }),
            topics,
            client,
        })
    }

    pub fn identity(&self) -> &EntityIdentity {
        &self.shared.identity
    }

    /// Position of the entity on its device.
    pub fn index(&self) -> u8 {
        self.shared.identity.index
    }

    pub fn kind(&self) -> EntityKind {
        S::KIND
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Subscribe to the state topic.
    ///
    /// Each inbound message updates the cached state and then notifies the
    /// listener, always in that order.
    pub async fn subscribe_topics(&self) -> Result<(), TransportError> {
        // Weak, so the transport's callback table does not keep a dropped entity alive.
        let weak: Weak<Shared<S>> = Arc::downgrade(&self.shared);
        let callback: MessageCallback = Arc::new(move |_topic, payload| {
            if let Some(shared) = weak.upgrade() {
                shared.status_change_received(payload);
            }
        });

        self.client
            .subscribe(self.identity(), &self.topics.state, callback)
            .await
    }

    pub async fn unsubscribe_topics(&self) -> Result<(), TransportError> {
        self.client
            .unsubscribe(self.identity(), &self.topics.state)
            .await
    }

    /// Publish `payload` on the command topic. A no-op for read-only kinds.
    pub async fn set_state(&self, payload: &str) -> Result<(), TransportError> {
        match &self.topics.command {
            Some(topic) => self.client.publish(topic, payload).await,
            None => {
                debug!("{} is read-only, ignoring command {}", self.identity(), payload);
                Ok(())
            }
        }
    }

    /// Apply an inbound state payload as if it had arrived on the state topic.
    pub fn status_change_received(&self, payload: &str) {
        self.shared.status_change_received(payload);
    }

    /// Forward every future state message to `listener`.
    ///
    /// Sends never wait: if the channel is full the update is logged and dropped.
    pub fn set_state_listener(&self, listener: mpsc::Sender<StateUpdate>) {
        *self.shared.listener.lock() = Some(listener);
    }

    pub fn clear_state_listener(&self) {
        *self.shared.listener.lock() = None;
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.shared.state.lock();
        f(&*state)
    }
}

impl<S: EntityState> fmt::Debug for Entity<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("identity", self.identity())
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    fn relay(transport: &Arc<MockTransport>, index: u8) -> Relay {
        let client = Arc::new(Client::new(transport.clone()));
        Relay::new(client, "dev-1", "board", index, RelayState::default()).unwrap()
    }

    #[test]
    fn should_give_distinct_identities_to_twin_entities() {
        let transport = MockTransport::shared();
        let client = Arc::new(Client::new(transport));
        let a = Relay::new(client.clone(), "dev-1", "board", 3, RelayState::default()).unwrap();
        let b = Relay::new(client, "dev-1", "board", 3, RelayState::default()).unwrap();
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.topics(), b.topics());
    }

    #[test]
    fn should_refuse_empty_device_name() {
        let client = Arc::new(Client::new(MockTransport::shared()));
        let result = Relay::new(client, "dev-1", "", 0, RelayState::default());
        assert!(matches!(result, Err(TopicError::EmptyDeviceName)));
    }

    #[tokio::test]
    async fn should_subscribe_to_state_topic() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 4);
        relay.subscribe_topics().await.unwrap();
        assert_eq!(transport.subscribed_topics(), vec!["pglab/board/relay/4/state"]);
    }

    #[tokio::test]
    async fn should_update_state_before_notifying_listener() {
        let transport = MockTransport::shared();
        let relay = Arc::new(relay(&transport, 0));
        relay.subscribe_topics().await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        relay.set_state_listener(tx);
        transport.deliver("pglab/board/relay/0/state", "ON");

        let update = rx.recv().await.unwrap();
        assert_eq!(update.payload, "ON");
        assert_eq!(&update.entity, relay.identity());
        // The cached state was already updated when the listener received the message.
        assert_eq!(relay.state(), Some(true));
    }

    #[tokio::test]
    async fn should_notify_listener_even_for_unparsable_payload() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 0);
        relay.subscribe_topics().await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        relay.set_state_listener(tx);

        transport.deliver("pglab/board/relay/0/state", "garbage");

        assert_eq!(rx.recv().await.unwrap().payload, "garbage");
        assert_eq!(relay.state(), None);
    }

    #[tokio::test]
    async fn should_not_block_when_listener_is_full() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 0);
        relay.subscribe_topics().await.unwrap();
        let (tx, _rx) = mpsc::channel(1);
        relay.set_state_listener(tx);

        transport.deliver("pglab/board/relay/0/state", "ON");
        transport.deliver("pglab/board/relay/0/state", "OFF");

        assert_eq!(relay.state(), Some(false));
    }

    #[tokio::test]
    async fn should_stop_forwarding_after_listener_cleared() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 0);
        relay.subscribe_topics().await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        relay.set_state_listener(tx);
        relay.clear_state_listener();

        transport.deliver("pglab/board/relay/0/state", "ON");

        assert!(rx.try_recv().is_err());
        assert_eq!(relay.state(), Some(true));
    }

    #[tokio::test]
    async fn should_ignore_messages_after_entity_dropped() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 0);
        relay.subscribe_topics().await.unwrap();
        drop(relay);

        // The callback outlives the entity but must not panic.
        assert!(transport.deliver("pglab/board/relay/0/state", "ON"));
    }

    #[tokio::test]
    async fn should_unsubscribe_state_topic() {
        let transport = MockTransport::shared();
        let relay = relay(&transport, 2);
        relay.subscribe_topics().await.unwrap();
        relay.unsubscribe_topics().await.unwrap();

        assert_eq!(transport.unsubscribe_calls(), 1);
        assert!(!transport.deliver("pglab/board/relay/2/state", "ON"));
    }
}
