//! Relay entity: a plain on/off output.

use crate::error::{PayloadError, TransportError};
use crate::topic::EntityKind;

use super::{Entity, EntityState};

pub const RELAY_STATE_ON: &str = "ON";
pub const RELAY_STATE_OFF: &str = "OFF";

/// Last echoed relay position. `None` until the device reports one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayState(Option<bool>);

impl RelayState {
    pub fn get(self) -> Option<bool> {
        self.0
    }
}

impl EntityState for RelayState {
    const KIND: EntityKind = EntityKind::Relay;

    fn apply(&mut self, payload: &str) -> Result<(), PayloadError> {
        self.0 = Some(match payload {
            RELAY_STATE_ON => true,
            RELAY_STATE_OFF => false,
            other => return Err(PayloadError::UnknownToken(other.to_string())),
        });
        Ok(())
    }
}

pub type Relay = Entity<RelayState>;

impl Entity<RelayState> {
    /// Ask the device to close the relay. The cached state only changes
    /// once the device echoes it back.
    pub async fn turn_on(&self) -> Result<(), TransportError> {
        self.set_state(RELAY_STATE_ON).await
    }

    pub async fn turn_off(&self) -> Result<(), TransportError> {
        self.set_state(RELAY_STATE_OFF).await
    }

    /// `Some(true)` when on, `Some(false)` when off, `None` if never reported.
    pub fn state(&self) -> Option<bool> {
        self.with_state(|s| s.get())
    }
}
