//! Client library for PG LAB Electronics devices on an MQTT broker.
//!
//! Devices announce themselves on `pglab/discovery/...`. The [`Router`]
//! turns each valid announcement into a [`Device`] that owns one entity per
//! fitted relay, shutter and sensor aggregate. Entities cache the last state
//! echoed by the device and publish commands on their `set` topics.
//!
//! All broker I/O goes through the [`Transport`] trait; [`mqtt`] provides the
//! rumqttc implementation.

pub mod client;
pub mod config;
pub mod device;
pub mod entity;
pub mod error;
pub mod mqtt;
pub mod registry;
pub mod router;
pub mod topic;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::Client;
pub use device::{Device, DeviceState, DeviceType};
pub use entity::{Relay, Sensor, Shutter, StateUpdate};
pub use router::{DeviceList, RouteOutcome, Router};
pub use transport::{Qos, Substate, Transport};
