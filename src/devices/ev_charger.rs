use rand::Rng;

use crate::devices::battery::Battery;
use crate::devices::types::{PhysicalModel, PhysicalState, StepInputs};

/// SOC (percent) at which a charging session is considered complete.
pub const DEFAULT_CUTOFF_SOC: f64 = 98.0;

/// An EV charger: a charge-only storage device with a charge-complete cutoff.
///
/// SOC evolves as for [`Battery`], but power is held to `[-p_max, 0]`: a
/// positive (discharge) setpoint is treated as idle and ramp jitter never
/// pushes the vehicle into export. Once SOC reaches the cutoff, the session
/// is over and actual power is forced to zero regardless of the setpoint,
/// and SOC holds from then on.
///
/// # Power Flow Convention
/// Charging is **negative** (import), as for the battery. Output is never
/// positive.
#[derive(Debug, Clone)]
pub struct EvCharger {
    /// Underlying storage dynamics.
    pub storage: Battery,

    /// Charge-complete threshold in percent; `None` disables the cutoff.
    pub cutoff_soc: Option<f64>,
}

impl EvCharger {
    pub fn new(storage: Battery, cutoff_soc: Option<f64>) -> Self {
        Self {
            storage,
            cutoff_soc,
        }
    }

    /// Charge-only `(p_min, p_max)` power window.
    pub fn power_bounds(&self) -> (f64, f64) {
        (-self.storage.p_max_kw, 0.0)
    }

    /// Whether a session at `soc` has finished charging.
    pub fn session_complete(&self, soc: Option<f64>) -> bool {
        match (self.cutoff_soc, soc) {
            (Some(cutoff), Some(soc)) => soc >= cutoff,
            _ => false,
        }
    }
}

impl PhysicalModel for EvCharger {
    fn step<R: Rng>(
        &self,
        state: &PhysicalState,
        setpoint_kw: Option<f64>,
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState {
        if self.session_complete(state.soc) {
            return PhysicalState::idle(state.soc);
        }
        let mut next = self
            .storage
            .step_within(state, setpoint_kw, self.power_bounds(), inputs, rng);
        if self.session_complete(next.soc) {
            next.p_actual_kw = 0.0;
        }
        next
    }

    fn device_type(&self) -> &'static str {
        "EvCharger"
    }
}
