//! Fleet behaviour under the baseline configuration.

mod common;

use der_sim::config::SimulatorConfig;
use der_sim::control::AdmissionResult;
use der_sim::devices::DeviceKind;
use der_sim::environment::Profile;
use der_sim::protocol::{Topics, decode_telemetry, encode_telemetry};
use der_sim::sim::Dispatch;
use der_sim::telemetry::EmitContext;

use common::{NOW_MS, setpoint_bytes};

#[test]
fn baseline_fleet_runs_a_simulated_day() {
    let mut fleet = SimulatorConfig::baseline().build_fleet();
    let step = 300.0;
    for i in 0..288 {
        let hour = (i as f64 * step / 3600.0) % 24.0;
        fleet.tick_all(step, hour);
        for agent in fleet.agents() {
            let state = agent.state();
            let p_max = agent.identity().p_max_kw;
            assert!(state.p_actual_kw().abs() <= p_max + 1e-9);
            if agent.identity().kind == DeviceKind::Pv {
                assert!(state.p_actual_kw() >= 0.0);
            }
            if let Some(soc) = state.soc() {
                assert!((0.0..=100.0).contains(&soc));
            }
        }
    }
    let bat = fleet.get("bat-001").unwrap().state().soc().unwrap();
    assert!((10.0..=90.0).contains(&bat));
}

#[test]
fn pv_is_dark_at_night_and_producing_at_noon() {
    let mut fleet = SimulatorConfig::baseline().build_fleet();
    fleet.tick_all(5.0, 2.0);
    assert_eq!(fleet.summary().pv_kw, 0.0);
    fleet.tick_all(5.0, 13.0);
    assert!(fleet.summary().pv_kw > 4.0);
}

#[test]
fn commands_route_through_topics() {
    let mut fleet = SimulatorConfig::baseline().build_fleet();
    let topics = Topics::default();
    let topic = topics.parse(&topics.setpoint(DeviceKind::Ev, "ev-003")).unwrap();
    let outcome = fleet.dispatch(&topic, &setpoint_bytes("ev3", -3.6, None), NOW_MS);
    assert_eq!(outcome, Dispatch::Admission(AdmissionResult::Applied(-3.6)));
    assert_eq!(fleet.get("ev-003").unwrap().state().p_setpoint_kw, Some(-3.6));
    assert_eq!(fleet.get("ev-004").unwrap().state().p_setpoint_kw, None);

    let again = fleet.dispatch(&topic, &setpoint_bytes("ev3", -1.0, None), NOW_MS);
    assert_eq!(again, Dispatch::Admission(AdmissionResult::RejectedDuplicate));

    let garbage = fleet.dispatch(&topic, b"not json", NOW_MS);
    assert_eq!(garbage, Dispatch::Undecodable);
    assert_eq!(fleet.get("ev-003").unwrap().state().p_setpoint_kw, Some(-3.6));
}

#[test]
fn profile_override_shifts_autonomous_battery_power() {
    let config = SimulatorConfig::from_toml_str(
        r#"
[[devices]]
id = "bat-001"
type = "battery"
site_id = "house-01"
p_max_kw = 4.0
initial_soc = 80.0
ramp = { model = "exponential", factor = 1.0 }
"#,
    )
    .unwrap();

    let mut day = config.build_fleet();
    day.set_profile_override(Some(Profile::Day));
    day.tick_all(5.0, 13.0);

    let mut night = config.build_fleet();
    night.set_profile_override(Some(Profile::Night));
    night.tick_all(5.0, 13.0);

    let day_kw = day.get("bat-001").unwrap().state().p_actual_kw();
    let night_kw = night.get("bat-001").unwrap().state().p_actual_kw();
    assert!((day_kw - 1.5 * 1.25).abs() < 1e-9);
    assert!(night_kw > 0.0 && night_kw < day_kw);
}

#[test]
fn telemetry_round_trips_through_json() {
    let mut fleet = SimulatorConfig::baseline().build_fleet();
    fleet.tick_all(5.0, 12.0);
    let ctx = EmitContext {
        timestamp_ms: NOW_MS,
        sent_at_ms: NOW_MS + 3,
        source: "simulator".to_string(),
    };
    for envelope in fleet.telemetry(&ctx) {
        let bytes = encode_telemetry(&envelope).unwrap();
        assert_eq!(decode_telemetry(&bytes).unwrap(), envelope);
    }
}
