use rand::Rng;

use crate::devices::ramp::RampPolicy;
use crate::devices::types::{PhysicalModel, PhysicalState, StepInputs, clamp_finite};

/// A controllable energy store with symmetric power limits.
///
/// `Battery` ramps actual power toward a clamped setpoint using its
/// [`RampPolicy`] and integrates the resulting energy into SOC, which is kept
/// within `[soc_min, soc_max]` percent.
///
/// # Power Flow Convention
/// - Positive power: discharging (SOC falls)
/// - Negative power: charging (SOC rises)
#[derive(Debug, Clone)]
pub struct Battery {
    /// Symmetric charge/discharge limit in kilowatts.
    pub p_max_kw: f64,

    /// Usable capacity in kilowatt-hours. Zero disables SOC integration.
    pub capacity_kwh: f64,

    /// Lower SOC bound in percent.
    pub soc_min: f64,

    /// Upper SOC bound in percent.
    pub soc_max: f64,

    /// How actual power approaches the target.
    pub ramp: RampPolicy,
}

impl Battery {
    /// Creates a new battery.
    ///
    /// # Arguments
    ///
    /// * `p_max_kw` - Symmetric power limit in kW (negative values clamp to 0)
    /// * `capacity_kwh` - Usable capacity in kWh
    /// * `soc_min` - Lower SOC bound in percent
    /// * `soc_max` - Upper SOC bound in percent
    /// * `ramp` - Ramp policy
    ///
    /// SOC bounds are clamped into [0, 100] and swapped if given in reverse.
    pub fn new(p_max_kw: f64, capacity_kwh: f64, soc_min: f64, soc_max: f64, ramp: RampPolicy) -> Self {
        let lo = clamp_finite(soc_min, 0.0, 100.0);
        let hi = if soc_max.is_nan() { 100.0 } else { soc_max.clamp(0.0, 100.0) };
        let (soc_min, soc_max) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Self {
            p_max_kw: p_max_kw.max(0.0),
            capacity_kwh: capacity_kwh.max(0.0),
            soc_min,
            soc_max,
            ramp,
        }
    }

    /// Symmetric `(p_min, p_max)` power window.
    pub fn power_bounds(&self) -> (f64, f64) {
        (-self.p_max_kw, self.p_max_kw)
    }

    /// Clamps a requested setpoint to the power limits; absent or non-finite means idle.
    pub fn target_kw(&self, setpoint_kw: Option<f64>) -> f64 {
        let (p_min, p_max) = self.power_bounds();
        clamp_target(setpoint_kw, p_min, p_max)
    }

    /// Integrates `p_kw` over `dt_hours` into a new SOC.
    pub fn integrate_soc(&self, soc: f64, p_kw: f64, dt_hours: f64) -> f64 {
        let delta = if self.capacity_kwh > 0.0 {
            -(p_kw * dt_hours) / self.capacity_kwh * 100.0
        } else {
            0.0
        };
        clamp_finite(soc + delta, self.soc_min, self.soc_max)
    }

    /// Ramps toward the clamped setpoint inside `[p_min, p_max]` and integrates SOC.
    ///
    /// Both the target and the ramped (possibly jittered) power are held to
    /// the window.
    pub fn step_within<R: Rng>(
        &self,
        state: &PhysicalState,
        setpoint_kw: Option<f64>,
        (p_min, p_max): (f64, f64),
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState {
        let target = clamp_target(setpoint_kw, p_min, p_max);
        let p_actual_kw = self
            .ramp
            .next_power(state.p_actual_kw, target, p_min, p_max, rng);
        let soc = state
            .soc
            .map(|soc| self.integrate_soc(soc, p_actual_kw, inputs.dt_hours()));

        PhysicalState { p_actual_kw, soc }
    }
}

fn clamp_target(setpoint_kw: Option<f64>, p_min: f64, p_max: f64) -> f64 {
    let sp = setpoint_kw.filter(|v| v.is_finite()).unwrap_or(0.0);
    clamp_finite(sp, p_min, p_max)
}

impl PhysicalModel for Battery {
    fn step<R: Rng>(
        &self,
        state: &PhysicalState,
        setpoint_kw: Option<f64>,
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState {
        self.step_within(state, setpoint_kw, self.power_bounds(), inputs, rng)
    }

    fn device_type(&self) -> &'static str {
        "Battery"
    }
}
