use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::control::{AdmissionResult, admit};
use crate::devices::{
    DeviceIdentity, DeviceModel, DeviceState, PhysicalModel, PhysicalState, StepInputs,
    TargetPolicy,
};
use crate::environment::{EnvironmentProfile, Profile};
use crate::error::DecodeError;
use crate::protocol::{CommandEnvelope, TelemetryEnvelope, decode_command};
use crate::telemetry::{EmitContext, emit};

/// Sole owner of one simulated device.
///
/// Commands only touch the setpoint and the idempotency ledger; physics
/// advances on [`tick`](Self::tick).
#[derive(Debug, Clone)]
pub struct DeviceAgent<R = StdRng> {
    identity: DeviceIdentity,
    model: DeviceModel,
    state: DeviceState,
    policy: TargetPolicy,
    environment: EnvironmentProfile,
    rng: R,
}

impl<R: Rng> DeviceAgent<R> {
    /// Creates an agent with the idle target policy and the default environment.
    pub fn new(identity: DeviceIdentity, model: DeviceModel, state: DeviceState, rng: R) -> Self {
        Self {
            identity,
            model,
            state,
            policy: TargetPolicy::Idle,
            environment: EnvironmentProfile::default(),
            rng,
        }
    }

    pub fn with_policy(mut self, policy: TargetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentProfile) -> Self {
        self.environment = environment;
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Decodes and admits a raw setpoint payload.
    ///
    /// Undecodable payloads are logged and leave the state untouched.
    pub fn handle_command(&mut self, bytes: &[u8], now_ms: i64) -> Result<AdmissionResult, DecodeError> {
        let envelope = decode_command(bytes).inspect_err(|err| {
            warn!(device_id = %self.identity.device_id, error = %err, "dropping undecodable setpoint");
        })?;
        Ok(self.admit(&envelope, now_ms))
    }

    pub fn admit(&mut self, envelope: &CommandEnvelope, now_ms: i64) -> AdmissionResult {
        admit(envelope, &mut self.state, now_ms)
    }

    /// Advances the device by `dt_seconds` at local `hour`.
    pub fn tick(&mut self, dt_seconds: f64, hour: f64, profile_override: Option<Profile>) -> PhysicalState {
        let profile = self.environment.active_profile(hour, profile_override);
        let load_multiplier = self.environment.load_multiplier(hour, profile);
        let setpoint = self.policy.effective_setpoint(
            self.identity.kind,
            self.state.p_setpoint_kw,
            self.state.soc(),
            self.identity.p_max_kw,
            load_multiplier,
            &mut self.rng,
        );
        let inputs = StepInputs::new(dt_seconds, self.environment.daylight_fraction(hour));
        self.state.physical = self
            .model
            .step(&self.state.physical, setpoint, &inputs, &mut self.rng);

        debug!(
            device_id = %self.identity.device_id,
            model = self.model.device_type(),
            %profile,
            p_actual_kw = self.state.p_actual_kw(),
            soc = self.state.soc(),
            "stepped"
        );
        self.state.physical
    }

    pub fn telemetry(&self, ctx: &EmitContext) -> TelemetryEnvelope {
        emit(&self.identity, &self.state, ctx)
    }
}
