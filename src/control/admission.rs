use std::fmt;

use tracing::{info, warn};

use crate::devices::DeviceState;
use crate::protocol::envelope::{
    CommandEnvelope, ENVELOPE_VERSION, SETPOINT_MESSAGE_TYPE, TargetField,
};

/// Outcome of offering a decoded command to a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionResult {
    /// The setpoint now in force, in kW.
    Applied(f64),
    RejectedWrongVersionOrType,
    RejectedDuplicate,
    RejectedExpired,
    RejectedMissingOrInvalidTarget,
}

impl AdmissionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, AdmissionResult::Applied(_))
    }
}

impl fmt::Display for AdmissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionResult::Applied(kw) => write!(f, "applied {kw:.3} kW"),
            AdmissionResult::RejectedWrongVersionOrType => f.write_str("wrong version or type"),
            AdmissionResult::RejectedDuplicate => f.write_str("duplicate message id"),
            AdmissionResult::RejectedExpired => f.write_str("expired"),
            AdmissionResult::RejectedMissingOrInvalidTarget => {
                f.write_str("missing or invalid target")
            }
        }
    }
}

/// Validates `envelope` and, when every check passes, records its setpoint.
///
/// Checks run in order and stop at the first failure: version and type,
/// duplicate id, expiry, target. Only an applied command mutates `state`.
pub fn admit(envelope: &CommandEnvelope, state: &mut DeviceState, now_ms: i64) -> AdmissionResult {
    let id = envelope.message_id.as_deref();

    let well_typed = envelope.version == Some(ENVELOPE_VERSION as i64)
        && envelope.message_type.as_deref() == Some(SETPOINT_MESSAGE_TYPE);
    if !well_typed {
        warn!(
            message_id = id,
            version = envelope.version,
            message_type = envelope.message_type.as_deref(),
            "ignoring command with unsupported version or type"
        );
        return AdmissionResult::RejectedWrongVersionOrType;
    }

    if let Some(id) = id {
        if state.processed_message_ids.contains(id) {
            info!(message_id = id, "ignoring duplicate setpoint");
            return AdmissionResult::RejectedDuplicate;
        }
    }

    if let Some(valid_until_ms) = envelope.valid_until_ms {
        if valid_until_ms < now_ms {
            warn!(message_id = id, valid_until_ms, now_ms, "ignoring expired setpoint");
            return AdmissionResult::RejectedExpired;
        }
    }

    let target_kw = match envelope.target {
        TargetField::Kw(kw) if kw.is_finite() => kw,
        _ => {
            warn!(message_id = id, "setpoint has no usable targetPowerKw");
            return AdmissionResult::RejectedMissingOrInvalidTarget;
        }
    };

    state.p_setpoint_kw = Some(target_kw);
    if let Some(id) = id {
        state.processed_message_ids.insert(id, now_ms);
    }
    info!(message_id = id, target_kw, "setpoint applied");
    AdmissionResult::Applied(target_kw)
}
