//! Randomised invariants of the device models and admission.

mod common;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use der_sim::control::{AdmissionResult, admit};
use der_sim::devices::{
    Battery, DeviceKind, DeviceModel, DeviceState, EvCharger, PhysicalModel, PhysicalState,
    RampPolicy, SolarPv, StepInputs,
};
use der_sim::protocol::CommandEnvelope;

fn ramp_strategy() -> impl Strategy<Value = RampPolicy> {
    prop_oneof![
        (0.01f64..=1.0).prop_map(|factor| RampPolicy::Exponential { factor }),
        (0.01f64..5.0, 0.0f64..1.0).prop_map(|(rate_kw_per_step, jitter_kw)| {
            RampPolicy::RateLimited {
                rate_kw_per_step,
                jitter_kw,
            }
        }),
    ]
}

fn setpoint_strategy() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        (-50.0f64..50.0).prop_map(Some),
        Just(Some(f64::NAN)),
        Just(Some(f64::INFINITY)),
    ]
}

proptest! {
    #[test]
    fn storage_respects_power_and_soc_bounds(
        p_max in 0.0f64..20.0,
        capacity in 0.0f64..100.0,
        soc_min in 0.0f64..50.0,
        span in 0.0f64..50.0,
        ramp in ramp_strategy(),
        ev in any::<bool>(),
        steps in prop::collection::vec((setpoint_strategy(), -10.0f64..3600.0), 1..60),
        seed in any::<u64>(),
    ) {
        let soc_max = soc_min + span;
        let storage = Battery::new(p_max, capacity, soc_min, soc_max, ramp);
        let model = if ev {
            DeviceModel::Ev(EvCharger::new(storage, Some(98.0)))
        } else {
            DeviceModel::Battery(storage)
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = PhysicalState::idle(Some((soc_min + soc_max) / 2.0));

        for (setpoint, dt) in steps {
            state = model.step(&state, setpoint, &StepInputs::new(dt, 0.5), &mut rng);
            prop_assert!(state.p_actual_kw.abs() <= p_max + 1e-9);
            if ev {
                prop_assert!(state.p_actual_kw <= 0.0);
            }
            let soc = state.soc.unwrap();
            prop_assert!(soc >= soc_min - 1e-9 && soc <= soc_max + 1e-9);
        }
    }

    #[test]
    fn pv_is_non_negative_and_ignores_setpoints(
        kw_peak in 0.0f64..20.0,
        noise in 0.0f64..0.5,
        daylight in -1.0f64..2.0,
        setpoint in setpoint_strategy(),
        seed in any::<u64>(),
    ) {
        let pv = SolarPv::new(kw_peak, noise);
        let inputs = StepInputs::new(5.0, daylight);
        let with = pv.step(&PhysicalState::idle(None), setpoint, &inputs, &mut StdRng::seed_from_u64(seed));
        let without = pv.step(&PhysicalState::idle(None), None, &inputs, &mut StdRng::seed_from_u64(seed));
        prop_assert!(with.p_actual_kw >= 0.0 && with.p_actual_kw <= kw_peak);
        prop_assert_eq!(with, without);
    }

    #[test]
    fn duplicates_never_move_the_setpoint(
        first in -10.0f64..10.0,
        others in prop::collection::vec(-10.0f64..10.0, 1..20),
    ) {
        let mut state = DeviceState::new(DeviceKind::Battery, 50.0);
        let now = common::NOW_MS;
        prop_assert_eq!(
            admit(&CommandEnvelope::setpoint("id", first, None), &mut state, now),
            AdmissionResult::Applied(first)
        );
        for (i, target) in others.into_iter().enumerate() {
            let result = admit(&CommandEnvelope::setpoint("id", target, None), &mut state, now + i as i64);
            prop_assert_eq!(result, AdmissionResult::RejectedDuplicate);
            prop_assert_eq!(state.p_setpoint_kw, Some(first));
        }
    }

    #[test]
    fn past_deadlines_are_always_rejected(
        target in -10.0f64..10.0,
        lag in 1i64..1_000_000,
    ) {
        let mut state = DeviceState::new(DeviceKind::Ev, 50.0);
        let now = common::NOW_MS;
        let env = CommandEnvelope::setpoint("late", target, Some(now - lag));
        prop_assert_eq!(admit(&env, &mut state, now), AdmissionResult::RejectedExpired);
        prop_assert_eq!(state.p_setpoint_kw, None);
    }
}
