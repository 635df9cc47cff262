//! Wire format: JSON envelopes and the MQTT topic layout.

pub mod envelope;
pub mod topics;

pub use envelope::{
    CommandEnvelope, TargetField, TelemetryEnvelope, decode_command, decode_profile,
    decode_telemetry, encode_command, encode_telemetry,
};
pub use topics::{InboundTopic, Topics};
