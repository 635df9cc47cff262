//! Device simulation components for DER modeling.

use rand::Rng;

/// Stationary battery storage model.
pub mod battery;
/// Electric vehicle charger model.
pub mod ev_charger;
pub mod policy;
pub mod ramp;
/// Solar photovoltaic generation model.
pub mod solar;
pub mod types;

// Re-export the main types for convenience
pub use battery::Battery;
pub use ev_charger::EvCharger;
pub use policy::TargetPolicy;
pub use ramp::RampPolicy;
pub use solar::SolarPv;
pub use types::{
    DeviceIdentity, DeviceKind, DeviceState, PhysicalModel, PhysicalState, StepInputs,
};

/// The physical model of one device, chosen once at configuration time.
#[derive(Debug, Clone)]
pub enum DeviceModel {
    Pv(SolarPv),
    Battery(Battery),
    Ev(EvCharger),
}

impl PhysicalModel for DeviceModel {
    fn step<R: Rng>(
        &self,
        state: &PhysicalState,
        setpoint_kw: Option<f64>,
        inputs: &StepInputs,
        rng: &mut R,
    ) -> PhysicalState {
        match self {
            DeviceModel::Pv(pv) => pv.step(state, setpoint_kw, inputs, rng),
            DeviceModel::Battery(battery) => battery.step(state, setpoint_kw, inputs, rng),
            DeviceModel::Ev(ev) => ev.step(state, setpoint_kw, inputs, rng),
        }
    }

    fn device_type(&self) -> &'static str {
        match self {
            DeviceModel::Pv(pv) => pv.device_type(),
            DeviceModel::Battery(battery) => battery.device_type(),
            DeviceModel::Ev(ev) => ev.device_type(),
        }
    }
}
