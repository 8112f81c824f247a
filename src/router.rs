//! Inbound message dispatch and the list of discovered devices.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::device::Device;
use crate::entity::StateUpdate;
use crate::mqtt::MqttMessage;
use crate::topic::is_discovery_topic;
use crate::transport::TopicCallbacks;

/// Every device the router has configured, in discovery order.
#[derive(Default)]
pub struct DeviceList {
    devices: RwLock<Vec<Arc<Device>>>,
    changed: Notify,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.name() == Some(name))
            .cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<Device>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.id() == Some(id))
            .cloned()
    }

    fn contains_hash(&self, hash: u64) -> bool {
        self.devices.read().iter().any(|d| d.hash() == hash)
    }

    /// Insert `device`, replacing a listed device with the same id.
    fn upsert(&self, device: Arc<Device>) {
        {
            let mut devices = self.devices.write();
            match devices.iter_mut().find(|d| d.id() == device.id()) {
                Some(slot) => *slot = device,
                None => devices.push(device),
            }
        }
        self.changed.notify_waiters();
    }

    fn remove(&self, device: &Arc<Device>) {
        self.devices.write().retain(|d| !Arc::ptr_eq(d, device));
        self.changed.notify_waiters();
    }

    /// Wait until a device called `name` is listed. `None` once `timeout` passes.
    pub async fn wait_for(&self, name: &str, timeout: Duration) -> Option<Arc<Device>> {
        let found = async {
            loop {
                // Registered before the check so an insert in between is not missed.
                let notified = self.changed.notified();
                if let Some(device) = self.by_name(name) {
                    return device;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, found).await.ok()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

/// What [`Router::handle_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to an entity's state callback.
    Entity,
    /// A new or changed device was configured and listed.
    Discovered,
    /// Re-announcement of a listed device.
    Unchanged,
    /// Discovery message that failed to parse, validate or subscribe.
    Rejected,
    /// Neither an entity topic nor a discovery topic.
    Ignored,
}

pub struct Router {
    client: Arc<Client>,
    callbacks: Arc<TopicCallbacks>,
    devices: Arc<DeviceList>,
    listener: Option<mpsc::Sender<StateUpdate>>,
}

impl Router {
    /// `callbacks` must be the table the transport registers entity callbacks in.
    pub fn new(client: Arc<Client>, callbacks: Arc<TopicCallbacks>) -> Self {
        Self {
            client,
            callbacks,
            devices: Arc::new(DeviceList::new()),
            listener: None,
        }
    }

    /// Attach `listener` to every device configured from now on.
    pub fn with_listener(mut self, listener: mpsc::Sender<StateUpdate>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn devices(&self) -> Arc<DeviceList> {
        Arc::clone(&self.devices)
    }

    /// Route one inbound message.
    ///
    /// Entity state topics win over the discovery prefix. Anything else is dropped.
    pub async fn handle_message(&self, topic: &str, payload: &str) -> RouteOutcome {
        if self.callbacks.dispatch(topic, payload) {
            return RouteOutcome::Entity;
        }
        if is_discovery_topic(topic) {
            return self.discover(topic, payload).await;
        }
        debug!("No handler for {}", topic);
        RouteOutcome::Ignored
    }

    async fn discover(&self, topic: &str, payload: &str) -> RouteOutcome {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding discovery on {}: invalid JSON ({})", topic, e);
                return RouteOutcome::Rejected;
            }
        };

        let mut device = Device::new();
        if device.config(self.client.clone(), &value, false).await.is_err() {
            return RouteOutcome::Rejected;
        }
        if self.devices.contains_hash(device.hash()) {
            debug!("Device {:?} re-announced unchanged", device.name());
            return RouteOutcome::Unchanged;
        }

        // Same topics as the new tree, so release them before subscribing again.
        let previous = device.id().and_then(|id| self.devices.by_id(id));
        if let Some(old) = &previous {
            info!("Device {:?} changed, replacing", old.name());
            release(old).await;
        }

        if let Some(listener) = &self.listener {
            device.set_state_listener(listener);
        }
        if let Err(e) = device.subscribe_all().await {
            error!("Failed to subscribe entities of {:?}: {}", device.name(), e);
            release(&device).await;
            // Its subscriptions are already gone.
            if let Some(old) = previous {
                warn!("Unlisting {:?} after failed replacement", old.name());
                self.devices.remove(&old);
            }
            return RouteOutcome::Rejected;
        }

        info!(
            "Discovered {:?} ({} relays, {} shutters)",
            device.name(),
            device.relays().len(),
            device.shutters().len()
        );
        self.devices.upsert(Arc::new(device));
        RouteOutcome::Discovered
    }

    /// Route messages until the channel closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<MqttMessage>) {
        while let Some(msg) = rx.recv().await {
            self.handle_message(&msg.topic, &msg.payload).await;
        }
        info!("Message channel closed, router stopping");
    }
}

async fn release(device: &Device) {
    if let Err(e) = device.unsubscribe_all().await {
        warn!("Failed to release entities of {:?}: {}", device.name(), e);
    }
}
