//! Builds telemetry envelopes from device state.

use uuid::Uuid;

use crate::devices::{DeviceIdentity, DeviceState};
use crate::protocol::envelope::{
    Capabilities, ENVELOPE_VERSION, Readings, Status, TELEMETRY_MESSAGE_TYPE, TelemetryEnvelope,
    TelemetryPayload,
};

/// Timestamps and origin stamped onto each envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitContext {
    /// Time of the reading in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Wall-clock send time in epoch milliseconds.
    pub sent_at_ms: i64,
    pub source: String,
}

impl EmitContext {
    /// Context for live agents where reading and send time coincide.
    pub fn live(now_ms: i64, source: &str) -> Self {
        Self {
            timestamp_ms: now_ms,
            sent_at_ms: now_ms,
            source: source.to_string(),
        }
    }
}

/// Produces the telemetry envelope for one device snapshot.
///
/// Power is rounded to 3 decimals and SOC to 2. Every call gets a fresh
/// message id.
pub fn emit(identity: &DeviceIdentity, state: &DeviceState, ctx: &EmitContext) -> TelemetryEnvelope {
    TelemetryEnvelope {
        version: ENVELOPE_VERSION,
        message_type: TELEMETRY_MESSAGE_TYPE.to_string(),
        message_id: Uuid::new_v4().to_string(),
        device_id: identity.device_id.clone(),
        device_type: identity.kind,
        timestamp_ms: ctx.timestamp_ms,
        sent_at_ms: ctx.sent_at_ms,
        source: ctx.source.clone(),
        payload: TelemetryPayload {
            readings: Readings {
                power_kw: round_to(state.p_actual_kw(), 3),
                soc: state.soc().map(|soc| round_to(soc, 2)),
            },
            status: Status { online: true },
            capabilities: Capabilities::symmetric(identity.p_max_kw),
            site_id: identity.site_id.clone(),
            feeder_id: identity.feeder_id.clone(),
        },
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
