//! Discovery message schema and validation.
//!
//! A device announces itself with a flat JSON object:
//!
//! ```json
//! {
//!   "mac": "AA:BB:CC:DD:EE:FF", "ip": "192.168.1.20",
//!   "id": "dd53ac85", "name": "E-BOARD-DD53AC85", "type": "E-Board",
//!   "manufacturer": "PG LAB Electronics", "hw": "1.0.0", "fw": "1.2.3",
//!   "params": { "shutters": 2, "boards": "11000000" }
//! }
//! ```
//!
//! `params` is only read (and then required) for E-Board devices. Unknown
//! keys are ignored.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::de::{self, Deserializer, Unexpected};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FieldError, FieldErrors, ValidationError};

pub const MANUFACTURER: &str = "PG LAB Electronics";

/// Relay slots on an E-Board: 8 boards of 8 relays.
pub const RELAY_SLOTS: usize = 64;
pub const BOARD_COUNT: usize = 8;
pub const MAX_SHUTTERS: i64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Board controller driving up to 64 relays.
    EBoard,
    ERelay,
    ESwitch,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EBoard => "E-Board",
            Self::ERelay => "E-Relay",
            Self::ESwitch => "E-Switch",
        }
    }
}

impl FromStr for DeviceType {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "E-Board" => Ok(Self::EBoard),
            "E-Relay" => Ok(Self::ERelay),
            "E-Switch" => Ok(Self::ESwitch),
            other => Err(FieldError::DeviceType(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// E-Board specific layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EBoardParameters {
    /// Shutters occupy relay pairs starting at slot 0.
    pub shutters: u8,
    /// One `'0'`/`'1'` flag per 8-relay board.
    pub boards: String,
}

impl EBoardParameters {
    /// Whether the board carrying relay `index` is fitted.
    pub fn is_relay_connected(&self, index: usize) -> bool {
        if index >= RELAY_SLOTS {
            return false;
        }
        self.boards.as_bytes().get(index / 8) == Some(&b'1')
    }
}

/// A discovery message whose every field passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub mac: String,
    pub ip: IpAddr,
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub parameters: Option<EBoardParameters>,
}

#[derive(Deserialize)]
struct RawDiscovery {
    mac: Option<String>,
    ip: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    name: Option<String>,
    #[serde(rename = "type")]
    device_type: Option<String>,
    manufacturer: Option<String>,
    hw: Option<String>,
    fw: Option<String>,
    #[serde(default)]
    params: Option<RawParameters>,
}

#[derive(Deserialize)]
struct RawParameters {
    shutters: Option<i64>,
    boards: Option<String>,
}

impl DiscoveryMessage {
    /// Validate a decoded discovery payload.
    ///
    /// # Errors
    ///
    /// [`ValidationError::Malformed`] when the value is not an object of
    /// string fields, [`ValidationError::Fields`] listing every failing field
    /// otherwise.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let raw = RawDiscovery::deserialize(value).map_err(ValidationError::Malformed)?;
        raw.validate()
    }

    pub fn from_payload(payload: &str) -> Result<Self, ValidationError> {
        let raw: RawDiscovery = serde_json::from_str(payload).map_err(ValidationError::Malformed)?;
        raw.validate()
    }

    pub fn is_relay_connected(&self, index: usize) -> bool {
        self.parameters
            .as_ref()
            .is_some_and(|p| p.is_relay_connected(index))
    }
}

impl RawDiscovery {
    fn validate(self) -> Result<DiscoveryMessage, ValidationError> {
        let mut errors = FieldErrors::default();

        let mac = check(&mut errors, "mac", self.mac, |v| {
            if is_mac(&v) {
                Ok(v)
            } else {
                Err(FieldError::Mac(v))
            }
        });
        let ip = check(&mut errors, "ip", self.ip, |v| {
            v.parse::<IpAddr>().map_err(|_| FieldError::Ip(v))
        });
        let id = check(&mut errors, "id", self.id, non_empty("id"));
        let name = check(&mut errors, "name", self.name, non_empty("name"));
        let device_type = check(&mut errors, "type", self.device_type, |v| v.parse::<DeviceType>());
        let manufacturer = check(&mut errors, "manufacturer", self.manufacturer, |v| {
            if v == MANUFACTURER {
                Ok(v)
            } else {
                Err(FieldError::Manufacturer(v))
            }
        });
        let hardware_version = check(&mut errors, "hw", self.hw, version("hw"));
        let firmware_version = check(&mut errors, "fw", self.fw, version("fw"));

        let parameters = match device_type {
            Some(DeviceType::EBoard) => validate_parameters(&mut errors, self.params),
            _ => None,
        };

        match (
            mac,
            ip,
            id,
            name,
            device_type,
            manufacturer,
            hardware_version,
            firmware_version,
        ) {
            (Some(mac), Some(ip), Some(id), Some(name), Some(device_type), Some(manufacturer), Some(hw), Some(fw))
                if errors.is_empty() =>
            {
                Ok(DiscoveryMessage {
                    mac,
                    ip,
                    id,
                    name,
                    device_type,
                    manufacturer,
                    hardware_version: hw,
                    firmware_version: fw,
                    parameters,
                })
            }
            _ => Err(ValidationError::Fields(errors)),
        }
    }
}

fn validate_parameters(
    errors: &mut FieldErrors,
    params: Option<RawParameters>,
) -> Option<EBoardParameters> {
    let Some(params) = params else {
        errors.push(FieldError::Missing("params"));
        return None;
    };

    let shutters = check(errors, "shutters", params.shutters, |v| {
        u8::try_from(v)
            .ok()
            .filter(|_| (0..=MAX_SHUTTERS).contains(&v))
            .ok_or(FieldError::ShutterCount(v))
    });
    let boards = check(errors, "boards", params.boards, |v| {
        if is_boards(&v) {
            Ok(v)
        } else {
            Err(FieldError::Boards(v))
        }
    });

    Some(EBoardParameters {
        shutters: shutters?,
        boards: boards?,
    })
}

/// Strings pass through, numbers and booleans are stringified, null counts as absent.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(Value::Array(_)) => Err(de::Error::invalid_type(Unexpected::Seq, &"a string")),
        Some(Value::Object(_)) => Err(de::Error::invalid_type(Unexpected::Map, &"a string")),
    }
}

/// Record a missing field or a failed check; return the checked value otherwise.
fn check<T, U>(
    errors: &mut FieldErrors,
    field: &'static str,
    value: Option<T>,
    validate: impl FnOnce(T) -> Result<U, FieldError>,
) -> Option<U> {
    let Some(value) = value else {
        errors.push(FieldError::Missing(field));
        return None;
    };
    match validate(value) {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn non_empty(field: &'static str) -> impl FnOnce(String) -> Result<String, FieldError> {
    move |v| {
        if v.is_empty() {
            Err(FieldError::Empty(field))
        } else {
            Ok(v)
        }
    }
}

fn version(field: &'static str) -> impl FnOnce(String) -> Result<String, FieldError> {
    move |v| {
        if is_version(&v) {
            Ok(v)
        } else {
            Err(FieldError::Version { field, value: v })
        }
    }
}

/// Six hex pairs separated by `:` or `-`.
fn is_mac(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 17
        && bytes.iter().enumerate().all(|(i, b)| {
            if i % 3 == 2 {
                *b == b':' || *b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
}

/// `major.minor.patch`, where the patch digits may be left empty (`"1.2."`).
fn is_version(value: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let mut parts = value.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(major), Some(minor), Some(patch), None) => {
            digits(major) && digits(minor) && (patch.is_empty() || digits(patch))
        }
        _ => false,
    }
}

fn is_boards(value: &str) -> bool {
    value.len() == BOARD_COUNT && value.bytes().all(|b| b == b'0' || b == b'1')
}
