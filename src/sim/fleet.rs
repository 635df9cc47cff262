use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::control::AdmissionResult;
use crate::devices::DeviceKind;
use crate::environment::Profile;
use crate::error::DecodeError;
use crate::protocol::{InboundTopic, TelemetryEnvelope, decode_profile};
use crate::sim::agent::DeviceAgent;
use crate::telemetry::EmitContext;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Admission(AdmissionResult),
    ProfileChanged(Option<Profile>),
    /// No device carries that id.
    UnknownDevice,
    /// The id exists but belongs to a device of another kind.
    KindMismatch { actual: DeviceKind },
    Undecodable,
}

/// Aggregate readings logged periodically by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FleetSummary {
    pub pv_kw: f64,
    pub battery_kw: f64,
    /// Mean battery SOC, when any battery is present.
    pub battery_soc: Option<f64>,
    pub ev_kw: f64,
    pub evs_charging: usize,
}

impl fmt::Display for FleetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pv={:.1}kW bat={:.1}kW ev={:.1}kW ({} charging)",
            self.pv_kw, self.battery_kw, self.ev_kw, self.evs_charging
        )?;
        if let Some(soc) = self.battery_soc {
            write!(f, " bat_soc={soc:.1}%")?;
        }
        Ok(())
    }
}

/// Owner of every simulated device and the shared day/night override.
#[derive(Debug)]
pub struct Fleet<R = StdRng> {
    agents: Vec<DeviceAgent<R>>,
    by_id: HashMap<String, usize>,
    profile_override: Option<Profile>,
}

impl<R> Default for Fleet<R> {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            by_id: HashMap::new(),
            profile_override: None,
        }
    }
}

impl<R: Rng> Fleet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device. Returns `false` and keeps the existing one when the id is taken.
    pub fn add(&mut self, agent: DeviceAgent<R>) -> bool {
        let id = agent.identity().device_id.clone();
        if self.by_id.contains_key(&id) {
            warn!(device_id = %id, "duplicate device id ignored");
            return false;
        }
        self.by_id.insert(id, self.agents.len());
        self.agents.push(agent);
        true
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceAgent<R>> {
        self.by_id.get(device_id).map(|&i| &self.agents[i])
    }

    pub fn agents(&self) -> impl Iterator<Item = &DeviceAgent<R>> {
        self.agents.iter()
    }

    pub fn profile_override(&self) -> Option<Profile> {
        self.profile_override
    }

    pub fn set_profile_override(&mut self, profile: Option<Profile>) {
        if self.profile_override != profile {
            info!(
                profile = profile.map_or("auto".to_string(), |p| p.to_string()),
                "profile override changed"
            );
        }
        self.profile_override = profile;
    }

    /// Routes a setpoint payload to the device with `device_id` and `kind`.
    ///
    /// Misrouted setpoints are logged once here and never reach a device.
    pub fn handle_command(
        &mut self,
        kind: DeviceKind,
        device_id: &str,
        bytes: &[u8],
        now_ms: i64,
    ) -> Dispatch {
        let Some(&index) = self.by_id.get(device_id) else {
            warn!(device_id, %kind, "setpoint for unknown device");
            return Dispatch::UnknownDevice;
        };
        let agent = &mut self.agents[index];
        let actual = agent.identity().kind;
        if actual != kind {
            warn!(device_id, %kind, %actual, "setpoint kind mismatch");
            return Dispatch::KindMismatch { actual };
        }
        match agent.handle_command(bytes, now_ms) {
            Ok(result) => Dispatch::Admission(result),
            Err(_) => Dispatch::Undecodable,
        }
    }

    /// Applies a `{"profile": ...}` payload.
    pub fn handle_profile(&mut self, bytes: &[u8]) -> Result<Option<Profile>, DecodeError> {
        let profile = decode_profile(bytes).inspect_err(|err| {
            warn!(error = %err, "dropping undecodable profile override");
        })?;
        self.set_profile_override(profile);
        Ok(profile)
    }

    /// Dispatches a message received on a classified topic.
    pub fn dispatch(&mut self, topic: &InboundTopic, bytes: &[u8], now_ms: i64) -> Dispatch {
        match topic {
            InboundTopic::Setpoint { kind, device_id } => {
                self.handle_command(*kind, device_id, bytes, now_ms)
            }
            InboundTopic::Profile => match self.handle_profile(bytes) {
                Ok(profile) => Dispatch::ProfileChanged(profile),
                Err(_) => Dispatch::Undecodable,
            },
        }
    }

    /// Advances every device by `dt_seconds` at local `hour`.
    pub fn tick_all(&mut self, dt_seconds: f64, hour: f64) {
        let profile_override = self.profile_override;
        for agent in &mut self.agents {
            agent.tick(dt_seconds, hour, profile_override);
        }
    }

    /// Telemetry for every device, in insertion order.
    pub fn telemetry(&self, ctx: &EmitContext) -> Vec<TelemetryEnvelope> {
        self.agents.iter().map(|agent| agent.telemetry(ctx)).collect()
    }

    pub fn summary(&self) -> FleetSummary {
        let mut summary = FleetSummary::default();
        let mut soc_sum = 0.0;
        let mut batteries = 0usize;
        for agent in &self.agents {
            let state = agent.state();
            match agent.identity().kind {
                DeviceKind::Pv => summary.pv_kw += state.p_actual_kw(),
                DeviceKind::Battery => {
                    summary.battery_kw += state.p_actual_kw();
                    if let Some(soc) = state.soc() {
                        soc_sum += soc;
                        batteries += 1;
                    }
                }
                DeviceKind::Ev => {
                    summary.ev_kw += state.p_actual_kw();
                    if state.p_actual_kw() < 0.0 {
                        summary.evs_charging += 1;
                    }
                }
            }
        }
        summary.battery_soc = (batteries > 0).then(|| soc_sum / batteries as f64);
        summary
    }
}
