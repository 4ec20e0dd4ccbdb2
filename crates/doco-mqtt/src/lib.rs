//! doco MQTT - Message bus integration
//!
//! This crate wraps rumqttc to provide the connection handling doco needs:
//! a last-will availability topic, reconnects paced by the caller, and
//! inbound command messages delivered over a channel.

pub mod bus;
pub mod topics;

pub use bus::{BusConfig, BusError, BusEvent, MessageBus, MqttBus};
pub use topics::{DoorTopics, OFF, OFFLINE, ON, ONLINE};
