//! Error types shared by the codec and the transport layer.

use thiserror::Error;

/// Failure to read an inbound payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The bytes are not a parseable JSON document.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The document parsed but is not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// A profile override other than `day`, `night` or `auto`.
    #[error("unknown profile \"{0}\"")]
    UnknownProfile(String),
}

/// Failure to talk to the message broker.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("publish to {topic} timed out after {timeout_ms} ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },
    #[error("failed to encode telemetry: {0}")]
    Encode(#[from] serde_json::Error),
}
