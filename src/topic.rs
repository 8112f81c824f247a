//! Topic layout: `pglab/<device>/<kind>/[<index>/]<set|state|value>`.

use std::fmt;

use crate::error::TopicError;

/// Root segment shared by every PG LAB topic.
pub const TOPIC_ROOT: &str = "pglab";

/// Devices announce themselves below this prefix.
pub const DISCOVERY_TOPIC: &str = "pglab/discovery";

/// Wildcard subscription covering every discovery announcement.
pub const DISCOVERY_SUBSCRIPTION: &str = "pglab/discovery/#";

/// The addressable facets a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Relay,
    Shutter,
    Sensor,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Shutter => "shutter",
            Self::Sensor => "sensor",
        }
    }

    /// `(command, state)` suffixes. Sensors are read-only.
    pub fn suffixes(self) -> (Option<&'static str>, &'static str) {
        match self {
            Self::Relay | Self::Shutter => (Some("set"), "state"),
            Self::Sensor => (None, "value"),
        }
    }

    /// Sensors publish one aggregate topic per device, without an index segment.
    pub fn is_indexed(self) -> bool {
        !matches!(self, Self::Sensor)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command and state topics of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub command: Option<String>,
    pub state: String,
}

impl Topics {
    /// Build the topic pair for `(device_name, kind, index)`.
    pub fn new(device_name: &str, kind: EntityKind, index: u8) -> Result<Self, TopicError> {
        if device_name.is_empty() {
            return Err(TopicError::EmptyDeviceName);
        }

        let base = if kind.is_indexed() {
            format!("{TOPIC_ROOT}/{device_name}/{kind}/{index}")
        } else {
            format!("{TOPIC_ROOT}/{device_name}/{kind}")
        };

        let (command, state) = kind.suffixes();
        Ok(Self {
            command: command.map(|suffix| format!("{base}/{suffix}")),
            state: format!("{base}/{state}"),
        })
    }
}

/// True when `topic` lies below the discovery prefix.
pub fn is_discovery_topic(topic: &str) -> bool {
    topic.starts_with(DISCOVERY_TOPIC)
}
