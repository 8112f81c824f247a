//! A PG LAB device and the entity tree built from its discovery message.

pub mod discovery;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::entity::{
    Relay, RelayState, Sensor, SensorKind, SensorState, Shutter, ShutterState, StateUpdate,
};
use crate::error::{DeviceError, TransportError};

pub use discovery::{DeviceType, DiscoveryMessage, EBoardParameters, MANUFACTURER, RELAY_SLOTS};

/// Where a device is in its configuration lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Unconfigured,
    Validating,
    Failed,
    Configured,
}

/// Slot indices to populate, in creation order.
#[derive(Debug, Default, PartialEq, Eq)]
struct Layout {
    shutters: Vec<u8>,
    relays: Vec<u8>,
}

impl Layout {
    /// Shutter `i` drives relays `2i` and `2i + 1` and exists when relay `2i`
    /// is connected. Relays past the shutter pairs are gated one by one.
    fn of(message: &DiscoveryMessage) -> Self {
        let Some(params) = &message.parameters else {
            return Self::default();
        };
        let cutoff = 2 * usize::from(params.shutters);

        let shutters = (0..params.shutters)
            .filter(|i| params.is_relay_connected(2 * usize::from(*i)))
            .collect();
        let relays = (cutoff..RELAY_SLOTS)
            .filter(|i| params.is_relay_connected(*i))
            .filter_map(|i| u8::try_from(i).ok())
            .collect();

        Self { shutters, relays }
    }
}

/// A discovered device owning its relays, shutters and sensor aggregate.
#[derive(Debug)]
pub struct Device {
    state: DeviceState,
    info: Option<DiscoveryMessage>,
    hash: u64,
    relays: Vec<Relay>,
    shutters: Vec<Shutter>,
    sensors: Option<Sensor>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Unconfigured,
            info: None,
            hash: unconfigured_hash(),
            relays: Vec::new(),
            shutters: Vec::new(),
            sensors: None,
        }
    }

    /// Validate `payload` and build the entity tree, subscribing every
    /// entity when `subscribe` is set.
    ///
    /// On failure the device is left in [`DeviceState::Failed`] with no
    /// entities. Calling this again on a configured device replaces its
    /// entities without unsubscribing the old ones; use
    /// [`unsubscribe_all`](Self::unsubscribe_all) first if that matters.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Validation`] for a bad discovery message,
    /// [`DeviceError::Transport`] if a subscription fails.
    pub async fn config(
        &mut self,
        client: Arc<Client>,
        payload: &Value,
        subscribe: bool,
    ) -> Result<(), DeviceError> {
        self.state = DeviceState::Validating;

        let message = match DiscoveryMessage::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Invalid discovery message ({})", e);
                self.fail();
                return Err(e.into());
            }
        };

        match self.build(&client, &message, subscribe).await {
            Ok((shutters, relays, sensors)) => {
                info!(
                    "Configured {} {} ({}): {} shutters, {} relays",
                    message.device_type,
                    message.name,
                    message.id,
                    shutters.len(),
                    relays.len()
                );
                self.hash = identity_hash(&message);
                self.shutters = shutters;
                self.relays = relays;
                self.sensors = Some(sensors);
                self.info = Some(message);
                self.state = DeviceState::Configured;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to configure device {}: {}", message.name, e);
                self.fail();
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        client: &Arc<Client>,
        message: &DiscoveryMessage,
        subscribe: bool,
    ) -> Result<(Vec<Shutter>, Vec<Relay>, Sensor), DeviceError> {
        let layout = Layout::of(message);
        let (id, name) = (message.id.as_str(), message.name.as_str());

        let mut shutters = Vec::with_capacity(layout.shutters.len());
        for index in layout.shutters {
            let shutter = Shutter::new(client.clone(), id, name, index, ShutterState::default())?;
            if subscribe {
                if let Err(e) = shutter.subscribe_topics().await {
                    release(&shutters, &[], None).await;
                    return Err(e.into());
                }
            }
            shutters.push(shutter);
        }

        let mut relays = Vec::with_capacity(layout.relays.len());
        for index in layout.relays {
            let relay = Relay::new(client.clone(), id, name, index, RelayState::default())?;
            if subscribe {
                if let Err(e) = relay.subscribe_topics().await {
                    release(&shutters, &relays, None).await;
                    return Err(e.into());
                }
            }
            relays.push(relay);
        }

        let kinds = SensorKind::for_device(message.device_type);
        let sensors = Sensor::new(client.clone(), id, name, 0, SensorState::new(kinds))?;
        if subscribe {
            if let Err(e) = sensors.subscribe_topics().await {
                release(&shutters, &relays, None).await;
                return Err(e.into());
            }
        }

        Ok((shutters, relays, sensors))
    }

    fn fail(&mut self) {
        self.state = DeviceState::Failed;
        self.shutters.clear();
        self.relays.clear();
        self.sensors = None;
    }

    /// Subscribe every entity, stopping at the first failure.
    pub async fn subscribe_all(&self) -> Result<(), TransportError> {
        for shutter in &self.shutters {
            shutter.subscribe_topics().await?;
        }
        for relay in &self.relays {
            relay.subscribe_topics().await?;
        }
        if let Some(sensors) = &self.sensors {
            sensors.subscribe_topics().await?;
        }
        Ok(())
    }

    /// Unsubscribe every entity, carrying on past failures. Returns the first one.
    pub async fn unsubscribe_all(&self) -> Result<(), TransportError> {
        release(&self.shutters, &self.relays, self.sensors.as_ref())
            .await
            .map_or(Ok(()), Err)
    }

    /// Forward state updates from every entity to `listener`.
    pub fn set_state_listener(&self, listener: &mpsc::Sender<StateUpdate>) {
        for shutter in &self.shutters {
            shutter.set_state_listener(listener.clone());
        }
        for relay in &self.relays {
            relay.set_state_listener(listener.clone());
        }
        if let Some(sensors) = &self.sensors {
            sensors.set_state_listener(listener.clone());
        }
    }

    /// Whether relay `index` sits on a fitted board. Always false for
    /// devices other than E-Boards.
    pub fn is_relay_connected(&self, index: usize) -> bool {
        self.info
            .as_ref()
            .is_some_and(|info| info.is_relay_connected(index))
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Identity hash over id, name, MAC and the E-Board layout. Changes
    /// whenever a re-announcement alters any of them.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn info(&self) -> Option<&DiscoveryMessage> {
        self.info.as_ref()
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    pub fn shutters(&self) -> &[Shutter] {
        &self.shutters
    }

    pub fn sensors(&self) -> Option<&Sensor> {
        self.sensors.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.id.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.name.as_str())
    }

    pub fn mac(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.mac.as_str())
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.info.as_ref().map(|i| i.ip)
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.info.as_ref().map(|i| i.device_type)
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.manufacturer.as_str())
    }

    pub fn hardware_version(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.hardware_version.as_str())
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.firmware_version.as_str())
    }

    pub fn parameters(&self) -> Option<&EBoardParameters> {
        self.info.as_ref().and_then(|i| i.parameters.as_ref())
    }

    pub fn is_eboard(&self) -> bool {
        self.device_type() == Some(DeviceType::EBoard)
    }

    pub fn is_eswitch(&self) -> bool {
        self.device_type() == Some(DeviceType::ESwitch)
    }
}

/// Best-effort teardown; returns the first error.
async fn release(
    shutters: &[Shutter],
    relays: &[Relay],
    sensors: Option<&Sensor>,
) -> Option<TransportError> {
    let mut first = None;
    let mut note = |result: Result<(), TransportError>| {
        if let Err(e) = result {
            debug!("Unsubscribe failed: {}", e);
            first.get_or_insert(e);
        }
    };

    for shutter in shutters {
        note(shutter.unsubscribe_topics().await);
    }
    for relay in relays {
        note(relay.unsubscribe_topics().await);
    }
    if let Some(sensors) = sensors {
        note(sensors.unsubscribe_topics().await);
    }
    first
}

fn unconfigured_hash() -> u64 {
    let mut hasher = DefaultHasher::new();
    (None::<&str>, None::<&str>).hash(&mut hasher);
    hasher.finish()
}

fn identity_hash(message: &DiscoveryMessage) -> u64 {
    let mut hasher = DefaultHasher::new();
    (&message.id, &message.name, &message.mac).hash(&mut hasher);
    if let Some(params) = &message.parameters {
        (params.shutters, &params.boards).hash(&mut hasher);
    }
    hasher.finish()
}
