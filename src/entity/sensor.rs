//! Device status sensors, reported together as one JSON object.

use std::fmt;

use serde_json::Value;

use crate::device::DeviceType;
use crate::error::PayloadError;
use crate::topic::EntityKind;

use super::{Entity, EntityState};

/// Readings a device may report on its sensor topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// CPU temperature, degrees Celsius.
    Temperature,
    /// Supply voltage.
    Voltage,
    /// Seconds since the last reboot.
    RebootTime,
}

impl SensorKind {
    /// Key used in the JSON payload.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temp",
            Self::Voltage => "volt",
            Self::RebootTime => "rtime",
        }
    }

    /// Sensors exposed by each device type.
    pub fn for_device(device_type: DeviceType) -> &'static [Self] {
        match device_type {
            DeviceType::EBoard => &[Self::Temperature, Self::Voltage, Self::RebootTime],
            DeviceType::ERelay | DeviceType::ESwitch => &[],
        }
    }

    /// Convert a JSON value into this kind's numeric type.
    pub fn cast(self, value: &Value) -> Option<SensorValue> {
        match self {
            Self::Temperature | Self::Voltage => value.as_f64().map(SensorValue::Float),
            Self::RebootTime => value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .map(SensorValue::Integer),
        }
    }

    fn default_value(self) -> SensorValue {
        match self {
            Self::Temperature | Self::Voltage => SensorValue::Float(0.0),
            Self::RebootTime => SensorValue::Integer(0),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    Integer(i64),
    Float(f64),
}

impl SensorValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Integer(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Last known value of every tracked sensor, in the device's declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    values: Vec<(SensorKind, SensorValue)>,
}

impl SensorState {
    /// Track `kinds`, each starting at zero.
    pub fn new(kinds: &[SensorKind]) -> Self {
        Self {
            values: kinds.iter().map(|k| (*k, k.default_value())).collect(),
        }
    }

    pub fn get(&self, kind: SensorKind) -> Option<SensorValue> {
        self.values.iter().find(|(k, _)| *k == kind).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorKind, SensorValue)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl EntityState for SensorState {
    const KIND: EntityKind = EntityKind::Sensor;

    /// Sparse update: unknown keys are ignored and missing keys keep their value.
    ///
    /// A zero reading never overwrites the stored value, so a sensor that
    /// really drops to zero keeps showing its last non-zero reading.
    /// Possibly a bug; existing consumers see this behaviour, so it stays
    /// until confirmed either way.
    fn apply(&mut self, payload: &str) -> Result<(), PayloadError> {
        let parsed: Value = serde_json::from_str(payload)?;
        let object = parsed.as_object().ok_or(PayloadError::NotAnObject)?;

        for (kind, stored) in &mut self.values {
            let Some(new_value) = object.get(kind.as_str()).and_then(|v| kind.cast(v)) else {
                continue;
            };
            if !new_value.is_zero() {
                *stored = new_value;
            }
        }
        Ok(())
    }
}

pub type Sensor = Entity<SensorState>;

impl Entity<SensorState> {
    /// Snapshot of every tracked reading.
    pub fn state(&self) -> SensorState {
        self.with_state(Clone::clone)
    }

    pub fn value(&self, kind: SensorKind) -> Option<SensorValue> {
        self.with_state(|s| s.get(kind))
    }

    /// Number of tracked readings.
    pub fn size(&self) -> usize {
        self.with_state(SensorState::len)
    }
}
