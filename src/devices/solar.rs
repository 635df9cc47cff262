use std::f64::consts::PI;

use rand::Rng;
use tracing::debug;

use crate::devices::types::{PhysicalModel, PhysicalState, StepInputs, clamp_finite, uniform_noise};

/// Default multiplicative noise on PV output (+/-5%).
pub const DEFAULT_NOISE_FRACTION: f64 = 0.05;

/// A read-only solar PV generator following a half-sine daylight curve.
///
/// Output is `p_max * sin(pi * daylight_fraction) * (1 + noise)`, clamped to
/// `[0, p_max]`. Setpoints are never applied.
///
/// # Power Flow Convention
/// Returns **non-negative** values (export).
#[derive(Debug, Clone)]
pub struct SolarPv {
    /// Maximum power output in kilowatts under ideal conditions.
    pub kw_peak: f64,

    /// Half-width of the uniform noise as a fraction of output.
    pub noise_fraction: f64,
}

impl SolarPv {
    /// Creates a new solar PV generator.
    ///
    /// Negative peak power and noise are clamped to zero.
    pub fn new(kw_peak: f64, noise_fraction: f64) -> Self {
        Self {
            kw_peak: kw_peak.max(0.0),
            noise_fraction: noise_fraction.max(0.0),
        }
    }

    /// Noise-free generation shape for a daylight fraction, in [0, 1].
    pub fn shape(daylight_fraction: f64) -> f64 {
        let frac = clamp_finite(daylight_fraction, 0.0, 1.0);
        (PI * frac).sin().max(0.0)
    }
}

impl PhysicalModel for SolarPv {
    fn step<R: Rng>(
        &self,
        _state: &PhysicalState,
        setpoint_kw: Option<f64>,
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState {
        if let Some(sp) = setpoint_kw {
            debug!("PV ignoring setpoint {sp:.2} kW (read-only)");
        }

        let shape = Self::shape(inputs.daylight_fraction);
        let kw = if shape > 0.0 {
            let noise_mult = 1.0 + uniform_noise(rng, self.noise_fraction);
            clamp_finite(self.kw_peak * shape * noise_mult, 0.0, self.kw_peak)
        } else {
            0.0
        };

        PhysicalState {
            p_actual_kw: kw,
            soc: None,
        }
    }

    fn device_type(&self) -> &'static str {
        "SolarPV"
    }
}
