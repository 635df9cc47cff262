//! Versioned JSON envelopes for setpoint commands and telemetry.
//!
//! Decoding only checks that the bytes are a JSON object. Version, message
//! type and target are carried as read so that admission can tell a wrong
//! envelope apart from unreadable bytes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::devices::DeviceKind;
use crate::environment::Profile;
use crate::error::DecodeError;

/// The only envelope version this crate speaks.
pub const ENVELOPE_VERSION: u32 = 1;
pub const SETPOINT_MESSAGE_TYPE: &str = "setpoint";
pub const TELEMETRY_MESSAGE_TYPE: &str = "telemetry";

/// The `targetPowerKw` field as found on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetField {
    /// Absent or `null`.
    Missing,
    /// Present but not a number.
    Invalid,
    Kw(f64),
}

/// A decoded, not yet validated, setpoint command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    /// `v`, when it is an integral number.
    pub version: Option<i64>,
    pub message_type: Option<String>,
    pub message_id: Option<String>,
    pub target: TargetField,
    /// `validUntilMs` deadline in epoch milliseconds, when numeric.
    pub valid_until_ms: Option<i64>,
}

impl CommandEnvelope {
    /// A well-formed version 1 setpoint command.
    pub fn setpoint(message_id: &str, target_power_kw: f64, valid_until_ms: Option<i64>) -> Self {
        Self {
            version: Some(ENVELOPE_VERSION as i64),
            message_type: Some(SETPOINT_MESSAGE_TYPE.to_string()),
            message_id: Some(message_id.to_string()),
            target: TargetField::Kw(target_power_kw),
            valid_until_ms,
        }
    }
}

/// Decodes a command envelope without semantic validation.
///
/// # Errors
///
/// `DecodeError::Malformed` for bytes that are not JSON and
/// `DecodeError::NotAnObject` for JSON that is not an object.
pub fn decode_command(bytes: &[u8]) -> Result<CommandEnvelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let command = obj
        .get("payload")
        .and_then(Value::as_object)
        .and_then(|p| p.get("command"))
        .and_then(Value::as_object);

    let target = match command.and_then(|c| c.get("targetPowerKw")) {
        None | Some(Value::Null) => TargetField::Missing,
        Some(v) => v.as_f64().map_or(TargetField::Invalid, TargetField::Kw),
    };

    Ok(CommandEnvelope {
        version: obj.get("v").and_then(integral),
        message_type: obj.get("messageType").and_then(Value::as_str).map(str::to_string),
        message_id: obj.get("messageId").and_then(Value::as_str).map(str::to_string),
        target,
        valid_until_ms: command
            .and_then(|c| c.get("validUntilMs"))
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))),
    })
}

/// Encodes a command envelope in the wire layout.
pub fn encode_command(envelope: &CommandEnvelope) -> Vec<u8> {
    let mut command = Map::new();
    match envelope.target {
        TargetField::Kw(kw) => {
            command.insert("targetPowerKw".into(), json!(kw));
        }
        TargetField::Invalid => {
            command.insert("targetPowerKw".into(), Value::String("invalid".into()));
        }
        TargetField::Missing => {}
    }
    if let Some(until) = envelope.valid_until_ms {
        command.insert("validUntilMs".into(), json!(until));
    }

    let mut obj = Map::new();
    if let Some(v) = envelope.version {
        obj.insert("v".into(), json!(v));
    }
    if let Some(t) = &envelope.message_type {
        obj.insert("messageType".into(), json!(t));
    }
    if let Some(id) = &envelope.message_id {
        obj.insert("messageId".into(), json!(id));
    }
    obj.insert("payload".into(), json!({ "command": command }));
    Value::Object(obj).to_string().into_bytes()
}

fn integral(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

/// Outbound device telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    #[serde(rename = "v")]
    pub version: u32,
    pub message_type: String,
    /// Fresh per message; consumers may deduplicate on it.
    pub message_id: String,
    pub device_id: String,
    pub device_type: DeviceKind,
    /// Time of the reading (simulated time in the fleet simulator).
    pub timestamp_ms: i64,
    /// Wall-clock publish time.
    pub sent_at_ms: i64,
    pub source: String,
    pub payload: TelemetryPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub readings: Readings,
    pub status: Status,
    pub capabilities: Capabilities,
    pub site_id: String,
    pub feeder_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readings {
    pub power_kw: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soc: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub max_export_kw: f64,
    pub max_import_kw: f64,
}

impl Capabilities {
    /// All four limits equal to a symmetric `p_max_kw`.
    pub fn symmetric(p_max_kw: f64) -> Self {
        Self {
            max_charge_kw: p_max_kw,
            max_discharge_kw: p_max_kw,
            max_export_kw: p_max_kw,
            max_import_kw: p_max_kw,
        }
    }
}

/// Serializes telemetry to JSON bytes.
pub fn encode_telemetry(envelope: &TelemetryEnvelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Parses telemetry produced by [`encode_telemetry`].
pub fn decode_telemetry(bytes: &[u8]) -> Result<TelemetryEnvelope, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes `{"profile": "day" | "night" | "auto"}`.
///
/// `"auto"` or `null` clears the override and yields `None`.
pub fn decode_profile(bytes: &[u8]) -> Result<Option<Profile>, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
    match obj.get("profile") {
        None => Err(DecodeError::UnknownProfile(String::new())),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => match s.as_str() {
            "day" => Ok(Some(Profile::Day)),
            "night" => Ok(Some(Profile::Night)),
            "auto" => Ok(None),
            other => Err(DecodeError::UnknownProfile(other.to_string())),
        },
        Some(other) => Err(DecodeError::UnknownProfile(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_setpoint() {
        let bytes = br#"{"v":1,"messageType":"setpoint","messageId":"m-1",
            "payload":{"command":{"targetPowerKw":2.5,"validUntilMs":1700000000000}}}"#;
        let env = decode_command(bytes).unwrap();
        assert_eq!(env.version, Some(1));
        assert_eq!(env.message_type.as_deref(), Some("setpoint"));
        assert_eq!(env.message_id.as_deref(), Some("m-1"));
        assert_eq!(env.target, TargetField::Kw(2.5));
        assert_eq!(env.valid_until_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn integer_target_is_numeric() {
        let bytes = br#"{"v":1,"messageType":"setpoint","payload":{"command":{"targetPowerKw":3}}}"#;
        assert_eq!(decode_command(bytes).unwrap().target, TargetField::Kw(3.0));
    }

    #[test]
    fn wrong_type_still_decodes() {
        let bytes = br#"{"v":2,"messageType":"telemetry","messageId":"x"}"#;
        let env = decode_command(bytes).unwrap();
        assert_eq!(env.version, Some(2));
        assert_eq!(env.message_type.as_deref(), Some("telemetry"));
        assert_eq!(env.target, TargetField::Missing);
    }

    #[test]
    fn non_numeric_target_is_invalid() {
        let bytes = br#"{"v":1,"messageType":"setpoint","payload":{"command":{"targetPowerKw":"5"}}}"#;
        assert_eq!(decode_command(bytes).unwrap().target, TargetField::Invalid);
        let bytes = br#"{"v":1,"messageType":"setpoint","payload":{"command":{"targetPowerKw":null}}}"#;
        assert_eq!(decode_command(bytes).unwrap().target, TargetField::Missing);
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(matches!(
            decode_command(b"{not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_command(b"[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn command_encoding_is_readable_by_decoder() {
        let env = CommandEnvelope::setpoint("abc", -1.25, Some(42));
        assert_eq!(decode_command(&encode_command(&env)).unwrap(), env);
    }

    #[test]
    fn telemetry_omits_missing_soc() {
        let env = TelemetryEnvelope {
            version: 1,
            message_type: TELEMETRY_MESSAGE_TYPE.to_string(),
            message_id: "id".to_string(),
            device_id: "pv-001".to_string(),
            device_type: DeviceKind::Pv,
            timestamp_ms: 1,
            sent_at_ms: 2,
            source: "test".to_string(),
            payload: TelemetryPayload {
                readings: Readings {
                    power_kw: 1.5,
                    soc: None,
                },
                status: Status { online: true },
                capabilities: Capabilities::symmetric(5.0),
                site_id: "house-01".to_string(),
                feeder_id: "house-01".to_string(),
            },
        };
        let json: Value = serde_json::from_slice(&encode_telemetry(&env).unwrap()).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["deviceType"], "pv");
        assert_eq!(json["payload"]["readings"]["powerKw"], 1.5);
        assert!(json["payload"]["readings"].get("soc").is_none());
        assert_eq!(json["payload"]["capabilities"]["maxImportKw"], 5.0);
        assert_eq!(json["payload"]["feederId"], "house-01");
    }

    #[test]
    fn decodes_profile_override() {
        assert_eq!(decode_profile(br#"{"profile":"day"}"#).unwrap(), Some(Profile::Day));
        assert_eq!(decode_profile(br#"{"profile":"night"}"#).unwrap(), Some(Profile::Night));
        assert_eq!(decode_profile(br#"{"profile":"auto"}"#).unwrap(), None);
        assert!(matches!(
            decode_profile(br#"{"profile":"dusk"}"#),
            Err(DecodeError::UnknownProfile(_))
        ));
    }
}
