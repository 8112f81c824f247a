//! Error types shared across the crate.

use std::fmt;

/// Topic construction failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("device name must not be empty")]
    EmptyDeviceName,
}

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// The core never retries; these are handed straight back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The rumqttc client refused the request (usually a closed event loop).
    #[error("MQTT client error")]
    Client(#[from] rumqttc::ClientError),

    /// The substate handed back on unsubscribe was not produced by this transport.
    #[error("substate was not issued by this transport")]
    ForeignSubstate,

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// A single discovery field that failed validation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("field `{0}` must not be empty")]
    Empty(&'static str),

    #[error("MAC address `{0}` is not valid")]
    Mac(String),

    #[error("IP address `{0}` is not valid")]
    Ip(String),

    #[error("device type `{0}` is not supported")]
    DeviceType(String),

    #[error("unexpected manufacturer `{0}`")]
    Manufacturer(String),

    #[error("field `{field}` has an invalid version `{value}`")]
    Version { field: &'static str, value: String },

    #[error("shutter count {0} is out of range 0..=32")]
    ShutterCount(i64),

    #[error("boards connection string `{0}` is not valid")]
    Boards(String),
}

/// Every problem found in a discovery message.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The payload could not be read as a discovery object at all.
    #[error("malformed discovery message")]
    Malformed(#[source] serde_json::Error),

    /// The payload was readable but one or more fields are invalid.
    #[error("invalid discovery message: {0}")]
    Fields(FieldErrors),
}

/// Ordered list of field failures, in the order the fields were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
            first = false;
        }
        Ok(())
    }
}

/// Why an inbound state payload was dropped. Logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unrecognised state token `{0}`")]
    UnknownToken(String),

    #[error("sensor payload is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("sensor payload is not a JSON object")]
    NotAnObject,
}

/// Failure of [`Device::config`](crate::device::Device::config).
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("discovery validation failed")]
    Validation(#[from] ValidationError),

    #[error("transport failure while wiring entities")]
    Transport(#[from] TransportError),

    #[error("cannot build entity topics")]
    Topic(#[from] TopicError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value `{value}`")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be > 0")]
    Zero(&'static str),
}
