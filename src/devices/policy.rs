//! Default targets for controllable devices that have no admitted setpoint.

use rand::Rng;
use serde::Deserialize;

use crate::devices::types::DeviceKind;

/// SOC above which an autonomous battery discharges.
const BATTERY_HIGH_SOC: f64 = 55.0;
/// SOC below which an autonomous battery charges.
const BATTERY_LOW_SOC: f64 = 45.0;
/// Self-balancing power of an autonomous battery in kW.
const BATTERY_BALANCE_KW: f64 = 1.5;

/// What a controllable device does while no setpoint has been admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Hold zero output until commanded.
    #[default]
    Idle,
    /// Pick a plausible target from SOC and the load multiplier.
    Autonomous,
}

impl TargetPolicy {
    /// The setpoint to feed the model this step.
    ///
    /// An admitted setpoint always wins. PV never receives a default.
    pub fn effective_setpoint<R: Rng>(
        &self,
        kind: DeviceKind,
        admitted_kw: Option<f64>,
        soc: Option<f64>,
        p_max_kw: f64,
        load_multiplier: f64,
        rng: &mut R,
    ) -> Option<f64> {
        if admitted_kw.is_some() {
            return admitted_kw;
        }
        match (self, kind) {
            (TargetPolicy::Idle, _) | (_, DeviceKind::Pv) => None,
            (TargetPolicy::Autonomous, DeviceKind::Battery) => {
                let soc = soc?;
                let kw = if soc > BATTERY_HIGH_SOC {
                    BATTERY_BALANCE_KW
                } else if soc < BATTERY_LOW_SOC {
                    -BATTERY_BALANCE_KW
                } else {
                    0.0
                };
                Some(kw * load_multiplier)
            }
            (TargetPolicy::Autonomous, DeviceKind::Ev) => {
                if p_max_kw <= 0.0 {
                    return Some(0.0);
                }
                let draw = rng.random_range(0.0..=p_max_kw);
                Some(-draw * load_multiplier)
            }
        }
    }
}
