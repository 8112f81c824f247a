//! Broker connection built on rumqttc.

pub mod client;
pub mod transport;

pub use client::MqttClient;
pub use transport::MqttTransport;

/// One inbound publish, handed from the event loop to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}
