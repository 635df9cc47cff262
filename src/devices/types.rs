//! Common types and traits for device simulation components.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::control::ledger::IdempotencyLedger;

/// The closed set of device kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Pv,
    Battery,
    Ev,
}

impl DeviceKind {
    /// Wire and topic name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Pv => "pv",
            DeviceKind::Battery => "battery",
            DeviceKind::Ev => "ev",
        }
    }

    /// Whether the device stores energy and therefore tracks SOC.
    pub fn has_soc(&self) -> bool {
        !matches!(self, DeviceKind::Pv)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pv" => Ok(DeviceKind::Pv),
            "battery" => Ok(DeviceKind::Battery),
            "ev" => Ok(DeviceKind::Ev),
            other => Err(format!(
                "device type must be one of pv, battery, ev; got \"{other}\""
            )),
        }
    }
}

/// Immutable description of one device, fixed at configuration time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub kind: DeviceKind,
    pub site_id: String,
    pub feeder_id: String,
    /// Symmetric charge/discharge limit in kW (>= 0).
    pub p_max_kw: f64,
}

impl DeviceIdentity {
    /// Creates an identity whose feeder is the site itself.
    pub fn new(device_id: &str, kind: DeviceKind, site_id: &str, p_max_kw: f64) -> Self {
        Self {
            device_id: device_id.to_string(),
            kind,
            site_id: site_id.to_string(),
            feeder_id: site_id.to_string(),
            p_max_kw: p_max_kw.max(0.0),
        }
    }

    pub fn with_feeder(mut self, feeder_id: &str) -> Self {
        self.feeder_id = feeder_id.to_string();
        self
    }
}

/// Physical quantities advanced by the device model.
///
/// # Power Convention
/// - Positive: discharge / export
/// - Negative: charge / import (battery and EV only)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalState {
    /// Most recently simulated output in kW.
    pub p_actual_kw: f64,
    /// State of charge in percent; `None` for PV.
    pub soc: Option<f64>,
}

impl PhysicalState {
    pub fn idle(soc: Option<f64>) -> Self {
        Self {
            p_actual_kw: 0.0,
            soc,
        }
    }
}

/// Mutable per-device state, owned by exactly one control loop.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub physical: PhysicalState,
    /// Last admitted setpoint in kW; `None` before any command.
    pub p_setpoint_kw: Option<f64>,
    /// Ids of setpoint commands already applied.
    pub processed_message_ids: IdempotencyLedger,
}

impl DeviceState {
    /// Creates the start-up state for a device of `kind`.
    ///
    /// `initial_soc` is ignored for PV, which never carries a SOC.
    pub fn new(kind: DeviceKind, initial_soc: f64) -> Self {
        let soc = kind.has_soc().then(|| initial_soc.clamp(0.0, 100.0));
        Self {
            physical: PhysicalState::idle(soc),
            p_setpoint_kw: None,
            processed_message_ids: IdempotencyLedger::default(),
        }
    }

    pub fn p_actual_kw(&self) -> f64 {
        self.physical.p_actual_kw
    }

    pub fn soc(&self) -> Option<f64> {
        self.physical.soc
    }
}

/// Exogenous inputs for one model step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInputs {
    /// Elapsed time since the previous step in seconds.
    pub dt_seconds: f64,
    /// Position within the daylight window, in [0, 1].
    pub daylight_fraction: f64,
}

impl StepInputs {
    pub fn new(dt_seconds: f64, daylight_fraction: f64) -> Self {
        Self {
            dt_seconds,
            daylight_fraction,
        }
    }

    /// Elapsed time in hours; negative or non-finite deltas count as zero.
    pub fn dt_hours(&self) -> f64 {
        if self.dt_seconds.is_finite() && self.dt_seconds > 0.0 {
            self.dt_seconds / 3600.0
        } else {
            0.0
        }
    }
}

/// A device physical model: a pure transition from one state to the next.
///
/// Implementations never panic on out-of-range input; they clamp.
pub trait PhysicalModel {
    /// Advances `state` by one step toward `setpoint_kw`.
    ///
    /// # Arguments
    ///
    /// * `state` - Physical state before the step
    /// * `setpoint_kw` - Commanded target, if any
    /// * `inputs` - Elapsed time and environmental inputs
    /// * `rng` - Noise source
    fn step<R: Rng>(
        &self,
        state: &PhysicalState,
        setpoint_kw: Option<f64>,
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState;

    /// Returns a human-readable type name for the device.
    fn device_type(&self) -> &'static str;
}

/// Uniform noise in `[-half_width, half_width]`; zero when `half_width <= 0`.
pub fn uniform_noise<R: Rng>(rng: &mut R, half_width: f64) -> f64 {
    if !(half_width.is_finite() && half_width > 0.0) {
        return 0.0;
    }
    rng.random_range(-half_width..=half_width)
}

/// Clamps `value` into `[lo, hi]`, mapping NaN to `lo`.
pub(crate) fn clamp_finite(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() { lo } else { value.clamp(lo, hi) }
}
