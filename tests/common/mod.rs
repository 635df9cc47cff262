//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;

use der_sim::devices::{
    Battery, DeviceIdentity, DeviceKind, DeviceModel, DeviceState, EvCharger, RampPolicy, SolarPv,
};
use der_sim::error::TransportError;
use der_sim::protocol::{CommandEnvelope, encode_command};
use der_sim::sim::DeviceAgent;
use der_sim::transport::Publisher;

/// Fixed "now" used by command tests (2023-11-14T22:13:20Z).
pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

/// Battery agent with the canonical exponential ramp.
pub fn battery_agent(p_max_kw: f64, capacity_kwh: f64, soc: f64, soc_min: f64, soc_max: f64) -> DeviceAgent {
    DeviceAgent::new(
        DeviceIdentity::new("bat-001", DeviceKind::Battery, "house-01", p_max_kw),
        DeviceModel::Battery(Battery::new(
            p_max_kw,
            capacity_kwh,
            soc_min,
            soc_max,
            RampPolicy::default(),
        )),
        DeviceState::new(DeviceKind::Battery, soc),
        rng(),
    )
}

/// EV agent (7.2 kW, 60 kWh) with the 98 % charge-complete cutoff.
pub fn ev_agent(soc: f64) -> DeviceAgent {
    DeviceAgent::new(
        DeviceIdentity::new("ev-001", DeviceKind::Ev, "house-01", 7.2),
        DeviceModel::Ev(EvCharger::new(
            Battery::new(7.2, 60.0, 0.0, 100.0, RampPolicy::default()),
            Some(98.0),
        )),
        DeviceState::new(DeviceKind::Ev, soc),
        rng(),
    )
}

/// 5 kW PV agent with default noise.
pub fn pv_agent() -> DeviceAgent {
    DeviceAgent::new(
        DeviceIdentity::new("pv-001", DeviceKind::Pv, "house-01", 5.0),
        DeviceModel::Pv(SolarPv::new(5.0, 0.05)),
        DeviceState::new(DeviceKind::Pv, 0.0),
        rng(),
    )
}

/// Wire bytes of a well-formed setpoint.
pub fn setpoint_bytes(message_id: &str, target_kw: f64, valid_until_ms: Option<i64>) -> Vec<u8> {
    encode_command(&CommandEnvelope::setpoint(message_id, target_kw, valid_until_ms))
}

/// Publisher that records every message it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| sent.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((topic.to_string(), payload));
        }
        Ok(())
    }
}

/// Publisher that fails every call and counts the attempts.
#[derive(Default)]
pub struct FailingPublisher {
    pub attempts: AtomicUsize,
}

impl FailingPublisher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Publish {
            topic: topic.to_string(),
            reason: "broker unavailable".to_string(),
        })
    }
}
