//! Message bus plumbing: the publish seam and the MQTT implementation.

use async_trait::async_trait;

use crate::error::TransportError;

pub mod backoff;
pub mod mqtt;

pub use backoff::Backoff;
pub use mqtt::{MqttDriver, MqttPublisher, MqttSettings};

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outbound half of the bus, as seen by the control loops.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` on `topic` with at-least-once delivery, not retained.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}
