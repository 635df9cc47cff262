//! Agent (JSON or TOML) and simulator (TOML) configuration with presets.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

use crate::devices::solar::DEFAULT_NOISE_FRACTION;
use crate::devices::{
    Battery, DeviceIdentity, DeviceKind, DeviceModel, DeviceState, EvCharger, RampPolicy, SolarPv,
    TargetPolicy,
};
use crate::environment::EnvironmentProfile;
use crate::protocol::topics::{DEFAULT_PREFIX, Topics};
use crate::runtime::LoopSettings;
use crate::sim::{DeviceAgent, Fleet, SimClock};
use crate::transport::MqttSettings;

/// Configuration error with field path and constraint description.
#[derive(Error, Debug)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"devices[2].p_max_kw"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn default_topic_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_initial_soc() -> f64 {
    50.0
}

fn default_soc_max() -> f64 {
    100.0
}

fn default_sunrise() -> f64 {
    6.0
}

fn default_sunset() -> f64 {
    18.0
}

fn default_agent_source() -> String {
    "pi-agent".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn read_file(path: &Path, field: &str) -> Result<String, ConfigError> {
    fs::read_to_string(path)
        .map_err(|e| ConfigError::new(field, format!("cannot read \"{}\": {e}", path.display())))
}

/// Topic segments must not contain separators or MQTT wildcards.
fn check_topic_segment(field: &str, value: &str, errors: &mut Vec<ConfigError>) {
    if value.is_empty() {
        errors.push(ConfigError::new(field, "must not be empty"));
    } else if value.contains(['/', '+', '#']) {
        errors.push(ConfigError::new(field, "must not contain '/', '+' or '#'"));
    }
}

fn check_soc_bounds(prefix: &str, soc_min: f64, soc_max: f64, errors: &mut Vec<ConfigError>) {
    for (name, value) in [("soc_min", soc_min), ("soc_max", soc_max)] {
        if !(0.0..=100.0).contains(&value) {
            errors.push(ConfigError::new(
                format!("{prefix}{name}"),
                "must be a percentage in [0, 100]",
            ));
        }
    }
    if soc_min > soc_max {
        errors.push(ConfigError::new(
            format!("{prefix}soc_min"),
            format!("must be <= {prefix}soc_max"),
        ));
    }
}

fn check_ramp(field: &str, ramp: &RampPolicy, errors: &mut Vec<ConfigError>) {
    match *ramp {
        RampPolicy::Exponential { factor } => {
            if !(factor > 0.0 && factor <= 1.0) {
                errors.push(ConfigError::new(
                    format!("{field}.factor"),
                    "must be in (0, 1]",
                ));
            }
        }
        RampPolicy::RateLimited {
            rate_kw_per_step,
            jitter_kw,
        } => {
            if !(rate_kw_per_step.is_finite() && rate_kw_per_step > 0.0) {
                errors.push(ConfigError::new(
                    format!("{field}.rate_kw_per_step"),
                    "must be > 0",
                ));
            }
            if !(jitter_kw.is_finite() && jitter_kw >= 0.0) {
                errors.push(ConfigError::new(format!("{field}.jitter_kw"), "must be >= 0"));
            }
        }
    }
}

fn check_power(field: &str, p_max_kw: f64, errors: &mut Vec<ConfigError>) {
    if !(p_max_kw.is_finite() && p_max_kw >= 0.0) {
        errors.push(ConfigError::new(field, "must be a finite value >= 0"));
    }
}

/// Configuration of a single-device agent.
///
/// The first eight fields form the agent's JSON file as deployed on field
/// devices; the rest are optional and defaulted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub device_id: String,
    pub device_type: DeviceKind,
    pub site_id: String,
    pub p_max_kw: f64,
    /// Seconds between telemetry publishes; values below 1 count as 1.
    pub publish_interval_seconds: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Defaults to `site_id`.
    #[serde(default)]
    pub feeder_id: Option<String>,
    /// Usable storage in kWh; defaults to one hour at `p_max_kw`.
    #[serde(default)]
    pub capacity_kwh: Option<f64>,
    #[serde(default = "default_initial_soc")]
    pub initial_soc: f64,
    #[serde(default)]
    pub soc_min: f64,
    #[serde(default = "default_soc_max")]
    pub soc_max: f64,
    /// EV charge-complete threshold; no cutoff when absent.
    #[serde(default)]
    pub cutoff_soc: Option<f64>,
    #[serde(default)]
    pub ramp: RampPolicy,
    #[serde(default = "default_sunrise")]
    pub sunrise_hour: f64,
    #[serde(default = "default_sunset")]
    pub sunset_hour: f64,
    #[serde(default = "default_agent_source")]
    pub source: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl AgentConfig {
    /// Loads a config file, parsed as TOML for a `.toml` extension and JSON otherwise.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path, "config")?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::new("json", e.to_string()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.broker_host.trim().is_empty() {
            errors.push(ConfigError::new("broker_host", "must not be empty"));
        }
        if self.broker_port == 0 {
            errors.push(ConfigError::new("broker_port", "must be > 0"));
        }
        check_topic_segment("device_id", &self.device_id, &mut errors);
        check_topic_segment("site_id", &self.site_id, &mut errors);
        if let Some(feeder) = &self.feeder_id {
            check_topic_segment("feeder_id", feeder, &mut errors);
        }
        check_power("p_max_kw", self.p_max_kw, &mut errors);
        if self.topic_prefix.contains(['+', '#']) {
            errors.push(ConfigError::new("topic_prefix", "must not contain '+' or '#'"));
        }
        if let Some(capacity) = self.capacity_kwh {
            if !(capacity.is_finite() && capacity > 0.0) {
                errors.push(ConfigError::new("capacity_kwh", "must be > 0"));
            }
        }
        check_soc_bounds("", self.soc_min, self.soc_max, &mut errors);
        if !(self.soc_min..=self.soc_max).contains(&self.initial_soc) {
            errors.push(ConfigError::new(
                "initial_soc",
                "must lie within [soc_min, soc_max]",
            ));
        }
        if let Some(cutoff) = self.cutoff_soc {
            if !(0.0..=100.0).contains(&cutoff) {
                errors.push(ConfigError::new("cutoff_soc", "must be in [0, 100]"));
            }
        }
        check_ramp("ramp", &self.ramp, &mut errors);
        if !(0.0..=24.0).contains(&self.sunrise_hour)
            || !(0.0..=24.0).contains(&self.sunset_hour)
            || self.sunrise_hour >= self.sunset_hour
        {
            errors.push(ConfigError::new(
                "sunrise_hour",
                "must be < sunset_hour, both within [0, 24]",
            ));
        }
        if self.publish_timeout_ms == 0 {
            errors.push(ConfigError::new("publish_timeout_ms", "must be > 0"));
        }

        errors
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_seconds.max(1))
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.topic_prefix)
    }

    pub fn identity(&self) -> DeviceIdentity {
        let identity =
            DeviceIdentity::new(&self.device_id, self.device_type, &self.site_id, self.p_max_kw);
        match &self.feeder_id {
            Some(feeder) => identity.with_feeder(feeder),
            None => identity,
        }
    }

    pub fn model(&self) -> DeviceModel {
        let storage = || {
            Battery::new(
                self.p_max_kw,
                self.capacity_kwh.unwrap_or(self.p_max_kw),
                self.soc_min,
                self.soc_max,
                self.ramp,
            )
        };
        match self.device_type {
            DeviceKind::Pv => DeviceModel::Pv(SolarPv::new(self.p_max_kw, DEFAULT_NOISE_FRACTION)),
            DeviceKind::Battery => DeviceModel::Battery(storage()),
            DeviceKind::Ev => DeviceModel::Ev(EvCharger::new(storage(), self.cutoff_soc)),
        }
    }

    /// Builds the device agent described by this config.
    pub fn build_agent<R: Rng>(&self, rng: R) -> DeviceAgent<R> {
        DeviceAgent::new(
            self.identity(),
            self.model(),
            DeviceState::new(self.device_type, self.initial_soc),
            rng,
        )
        .with_policy(TargetPolicy::Idle)
        .with_environment(EnvironmentProfile::new(self.sunrise_hour, self.sunset_hour))
    }

    /// Broker settings with the agent's own setpoint subscription.
    pub fn mqtt_settings(&self) -> MqttSettings {
        let mut settings = MqttSettings::new(&self.broker_host, self.broker_port, &self.device_id)
            .subscribe(self.topics().setpoint(self.device_type, &self.device_id));
        settings.publish_timeout = Duration::from_millis(self.publish_timeout_ms);
        settings
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            topics: self.topics(),
            interval: self.publish_interval(),
            source: self.source.clone(),
        }
    }
}

/// Top-level simulator configuration parsed from TOML.
///
/// All sections have defaults matching the baseline fleet. Load from TOML
/// with [`SimulatorConfig::from_toml_file`] or use
/// [`SimulatorConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default = "baseline_devices")]
    pub devices: Vec<DeviceConfig>,
}

/// Message broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub publish_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "der-simulator".to_string(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Master random seed.
    pub seed: u64,
    /// Simulated seconds per tick (must be > 0).
    pub step_seconds: f64,
    /// Wall-clock seconds between ticks (must be > 0).
    pub tick_interval_seconds: f64,
    /// Stop after this many ticks; runs until shutdown when absent.
    pub max_ticks: Option<u64>,
    pub topic_prefix: String,
    pub source: String,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    /// Start of the day profile (inclusive).
    pub day_start_hour: f64,
    /// End of the day profile (exclusive).
    pub day_end_hour: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            step_seconds: 5.0,
            tick_interval_seconds: 5.0,
            max_ticks: None,
            topic_prefix: default_topic_prefix(),
            source: "simulator".to_string(),
            sunrise_hour: 6.0,
            sunset_hour: 20.0,
            day_start_hour: 6.0,
            day_end_hour: 18.0,
        }
    }
}

/// One simulated device. Unset fields take per-kind defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub site_id: String,
    #[serde(default)]
    pub feeder_id: Option<String>,
    pub p_max_kw: f64,
    #[serde(default)]
    pub capacity_kwh: Option<f64>,
    /// Start SOC in percent; EVs draw one from [20, 80] when absent.
    #[serde(default)]
    pub initial_soc: Option<f64>,
    #[serde(default)]
    pub soc_min: Option<f64>,
    #[serde(default)]
    pub soc_max: Option<f64>,
    #[serde(default)]
    pub cutoff_soc: Option<f64>,
    #[serde(default)]
    pub ramp: Option<RampPolicy>,
    #[serde(default)]
    pub policy: Option<TargetPolicy>,
}

const SIM_BATTERY_CAPACITY_KWH: f64 = 20.0;
const SIM_BATTERY_SOC_MIN: f64 = 10.0;
const SIM_BATTERY_SOC_MAX: f64 = 90.0;
const SIM_EV_CAPACITY_KWH: f64 = 60.0;
const SIM_EV_CUTOFF_SOC: f64 = 98.0;
const SIM_EV_SOC_RANGE: (f64, f64) = (20.0, 80.0);
const SIM_RAMP_JITTER_KW: f64 = 0.2;
/// Shortest simulated step and wall-clock tick interval.
const MIN_PERIOD_SECONDS: f64 = 0.001;
const MIN_PERIOD: Duration = Duration::from_millis(1);

impl DeviceConfig {
    fn new(id: &str, kind: DeviceKind, site_id: &str, p_max_kw: f64) -> Self {
        Self {
            id: id.to_string(),
            kind,
            site_id: site_id.to_string(),
            feeder_id: None,
            p_max_kw,
            capacity_kwh: None,
            initial_soc: None,
            soc_min: None,
            soc_max: None,
            cutoff_soc: None,
            ramp: None,
            policy: None,
        }
    }

    fn with_capacity(mut self, capacity_kwh: f64) -> Self {
        self.capacity_kwh = Some(capacity_kwh);
        self
    }

    fn soc_bounds(&self) -> (f64, f64) {
        let (lo, hi) = match self.kind {
            DeviceKind::Battery => (SIM_BATTERY_SOC_MIN, SIM_BATTERY_SOC_MAX),
            _ => (0.0, 100.0),
        };
        (self.soc_min.unwrap_or(lo), self.soc_max.unwrap_or(hi))
    }

    fn ramp(&self) -> RampPolicy {
        self.ramp.unwrap_or(match self.kind {
            DeviceKind::Battery => RampPolicy::RateLimited {
                rate_kw_per_step: 0.5,
                jitter_kw: SIM_RAMP_JITTER_KW,
            },
            _ => RampPolicy::RateLimited {
                rate_kw_per_step: 1.0,
                jitter_kw: SIM_RAMP_JITTER_KW,
            },
        })
    }

    fn model(&self) -> DeviceModel {
        let (soc_min, soc_max) = self.soc_bounds();
        match self.kind {
            DeviceKind::Pv => DeviceModel::Pv(SolarPv::new(self.p_max_kw, DEFAULT_NOISE_FRACTION)),
            DeviceKind::Battery => DeviceModel::Battery(Battery::new(
                self.p_max_kw,
                self.capacity_kwh.unwrap_or(SIM_BATTERY_CAPACITY_KWH),
                soc_min,
                soc_max,
                self.ramp(),
            )),
            DeviceKind::Ev => DeviceModel::Ev(EvCharger::new(
                Battery::new(
                    self.p_max_kw,
                    self.capacity_kwh.unwrap_or(SIM_EV_CAPACITY_KWH),
                    soc_min,
                    soc_max,
                    self.ramp(),
                ),
                Some(self.cutoff_soc.unwrap_or(SIM_EV_CUTOFF_SOC)),
            )),
        }
    }

    fn initial_soc<R: Rng>(&self, rng: &mut R) -> f64 {
        match (self.initial_soc, self.kind) {
            (Some(soc), _) => soc,
            (None, DeviceKind::Ev) => rng.random_range(SIM_EV_SOC_RANGE.0..=SIM_EV_SOC_RANGE.1),
            (None, _) => 50.0,
        }
    }

    fn validate(&self, index: usize, errors: &mut Vec<ConfigError>) {
        let prefix = format!("devices[{index}].");
        check_topic_segment(&format!("{prefix}id"), &self.id, errors);
        check_topic_segment(&format!("{prefix}site_id"), &self.site_id, errors);
        if let Some(feeder) = &self.feeder_id {
            check_topic_segment(&format!("{prefix}feeder_id"), feeder, errors);
        }
        check_power(&format!("{prefix}p_max_kw"), self.p_max_kw, errors);
        if let Some(capacity) = self.capacity_kwh {
            if !(capacity.is_finite() && capacity > 0.0) {
                errors.push(ConfigError::new(format!("{prefix}capacity_kwh"), "must be > 0"));
            }
        }
        let (soc_min, soc_max) = self.soc_bounds();
        check_soc_bounds(&prefix, soc_min, soc_max, errors);
        if let Some(soc) = self.initial_soc {
            if !(soc_min..=soc_max).contains(&soc) {
                errors.push(ConfigError::new(
                    format!("{prefix}initial_soc"),
                    "must lie within the SOC bounds",
                ));
            }
        }
        if let Some(cutoff) = self.cutoff_soc {
            if !(0.0..=100.0).contains(&cutoff) {
                errors.push(ConfigError::new(format!("{prefix}cutoff_soc"), "must be in [0, 100]"));
            }
        }
        if let Some(ramp) = &self.ramp {
            check_ramp(&format!("{prefix}ramp"), ramp, errors);
        }
    }
}

fn baseline_devices() -> Vec<DeviceConfig> {
    vec![
        DeviceConfig::new("pv-001", DeviceKind::Pv, "house-01", 5.0),
        DeviceConfig::new("bat-001", DeviceKind::Battery, "house-01", 4.0)
            .with_capacity(SIM_BATTERY_CAPACITY_KWH),
        DeviceConfig::new("ev-001", DeviceKind::Ev, "house-01", 7.2).with_capacity(60.0),
        DeviceConfig::new("ev-002", DeviceKind::Ev, "house-01", 11.0).with_capacity(75.0),
        DeviceConfig::new("ev-003", DeviceKind::Ev, "house-02", 3.6).with_capacity(40.0),
        DeviceConfig::new("ev-004", DeviceKind::Ev, "house-02", 6.6).with_capacity(50.0),
    ]
}

impl SimulatorConfig {
    /// Returns the baseline fleet: one PV array, one battery and four EVs over two houses.
    pub fn baseline() -> Self {
        Self {
            broker: BrokerConfig::default(),
            simulation: SimulationConfig::default(),
            devices: baseline_devices(),
        }
    }

    /// Returns a single house with PV and battery, and no EVs.
    pub fn solar_home() -> Self {
        Self {
            devices: baseline_devices()
                .into_iter()
                .filter(|d| d.kind != DeviceKind::Ev)
                .collect(),
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "solar_home"];

    /// Loads a fleet from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "solar_home" => Ok(Self::solar_home()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a fleet from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path, "scenario")?)
    }

    /// Parses a fleet from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Applies `BROKER_HOST` and `BROKER_PORT` from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `BROKER_PORT` is not a port number.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("BROKER_PORT") {
            self.broker.port = port
                .trim()
                .parse()
                .map_err(|e| ConfigError::new("BROKER_PORT", format!("\"{port}\": {e}")))?;
        }
        Ok(())
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.broker.host.trim().is_empty() {
            errors.push(ConfigError::new("broker.host", "must not be empty"));
        }
        if self.broker.port == 0 {
            errors.push(ConfigError::new("broker.port", "must be > 0"));
        }
        if self.broker.publish_timeout_ms == 0 {
            errors.push(ConfigError::new("broker.publish_timeout_ms", "must be > 0"));
        }

        let s = &self.simulation;
        if !(s.step_seconds.is_finite() && s.step_seconds >= MIN_PERIOD_SECONDS) {
            errors.push(ConfigError::new("simulation.step_seconds", "must be >= 0.001"));
        }
        if !(s.tick_interval_seconds.is_finite() && s.tick_interval_seconds >= MIN_PERIOD_SECONDS) {
            errors.push(ConfigError::new(
                "simulation.tick_interval_seconds",
                "must be >= 0.001",
            ));
        }
        if s.topic_prefix.contains(['+', '#']) {
            errors.push(ConfigError::new(
                "simulation.topic_prefix",
                "must not contain '+' or '#'",
            ));
        }
        if s.sunrise_hour >= s.sunset_hour {
            errors.push(ConfigError::new(
                "simulation.sunrise_hour",
                "must be < simulation.sunset_hour",
            ));
        }
        if s.day_start_hour >= s.day_end_hour {
            errors.push(ConfigError::new(
                "simulation.day_start_hour",
                "must be < simulation.day_end_hour",
            ));
        }

        if self.devices.is_empty() {
            errors.push(ConfigError::new("devices", "at least one device is required"));
        }
        let mut seen = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if !seen.insert(device.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("devices[{i}].id"),
                    format!("duplicate device id \"{}\"", device.id),
                ));
            }
            device.validate(i, &mut errors);
        }

        errors
    }

    pub fn environment(&self) -> EnvironmentProfile {
        let s = &self.simulation;
        EnvironmentProfile::new(s.sunrise_hour, s.sunset_hour)
            .with_day_window(s.day_start_hour, s.day_end_hour)
    }

    /// Builds every configured device, each with its own seeded RNG.
    pub fn build_fleet(&self) -> Fleet {
        let environment = self.environment();
        let mut fleet = Fleet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(self.simulation.seed.wrapping_add(i as u64));
            let mut identity =
                DeviceIdentity::new(&device.id, device.kind, &device.site_id, device.p_max_kw);
            if let Some(feeder) = &device.feeder_id {
                identity = identity.with_feeder(feeder);
            }
            let state = DeviceState::new(device.kind, device.initial_soc(&mut rng));
            let agent = DeviceAgent::new(identity, device.model(), state, rng)
                .with_policy(device.policy.unwrap_or(TargetPolicy::Autonomous))
                .with_environment(environment);
            fleet.add(agent);
        }
        fleet
    }

    pub fn clock(&self, start: chrono::NaiveDateTime) -> SimClock {
        let clock = SimClock::new(start, self.simulation.step_seconds);
        match self.simulation.max_ticks {
            Some(limit) => clock.with_limit(limit),
            None => clock,
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.simulation.topic_prefix)
    }

    /// Broker settings subscribing to every setpoint and the profile topic.
    pub fn mqtt_settings(&self) -> MqttSettings {
        let topics = self.topics();
        let mut settings =
            MqttSettings::new(&self.broker.host, self.broker.port, &self.broker.client_id)
                .subscribe(topics.setpoint_filter())
                .subscribe(topics.profile());
        settings.publish_timeout = Duration::from_millis(self.broker.publish_timeout_ms);
        settings
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            topics: self.topics(),
            interval: Duration::try_from_secs_f64(self.simulation.tick_interval_seconds)
                .unwrap_or(Duration::from_secs(1))
                .max(MIN_PERIOD),
            source: self.simulation.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_JSON: &str = r#"{
        "broker_host": "localhost",
        "broker_port": 1883,
        "device_id": "bat-001",
        "device_type": "battery",
        "site_id": "house-01",
        "p_max_kw": 4.0,
        "publish_interval_seconds": 5
    }"#;

    #[test]
    fn agent_json_uses_defaults() {
        let cfg = AgentConfig::from_json_str(AGENT_JSON).unwrap();
        assert_eq!(cfg.topic_prefix, "der");
        assert_eq!(cfg.initial_soc, 50.0);
        assert_eq!(cfg.source, "pi-agent");
        assert_eq!(cfg.ramp, RampPolicy::default());
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.identity().feeder_id, "house-01");
    }

    #[test]
    fn agent_interval_is_at_least_one_second() {
        let mut cfg = AgentConfig::from_json_str(AGENT_JSON).unwrap();
        cfg.publish_interval_seconds = 0;
        assert_eq!(cfg.publish_interval(), Duration::from_secs(1));
    }

    #[test]
    fn agent_capacity_defaults_to_one_hour() {
        let cfg = AgentConfig::from_json_str(AGENT_JSON).unwrap();
        match cfg.model() {
            DeviceModel::Battery(b) => assert_eq!(b.capacity_kwh, 4.0),
            other => panic!("unexpected model {other:?}"),
        }
    }

    #[test]
    fn agent_rejects_unknown_device_type() {
        let json = AGENT_JSON.replace("\"battery\"", "\"heatpump\"");
        assert!(AgentConfig::from_json_str(&json).is_err());
    }

    #[test]
    fn agent_rejects_missing_field() {
        let json = AGENT_JSON.replace("\"site_id\": \"house-01\",", "");
        let err = AgentConfig::from_json_str(&json).unwrap_err();
        assert!(err.message.contains("site_id"));
    }

    #[test]
    fn agent_toml_is_accepted() {
        let toml = r#"
broker_host = "broker"
broker_port = 1883
device_id = "ev-001"
device_type = "ev"
site_id = "house-01"
p_max_kw = 7.2
publish_interval_seconds = 2
topic_prefix = "site/der/"
cutoff_soc = 98.0

[ramp]
model = "rate_limited"
rate_kw_per_step = 1.0
"#;
        let cfg = AgentConfig::from_toml_str(toml).unwrap();
        assert!(cfg.validate().is_empty());
        assert_eq!(
            cfg.topics().setpoint(DeviceKind::Ev, "ev-001"),
            "site/der/setpoints/ev/ev-001"
        );
        assert_eq!(cfg.mqtt_settings().subscriptions, vec!["site/der/setpoints/ev/ev-001"]);
    }

    #[test]
    fn agent_validation_collects_all_errors() {
        let mut cfg = AgentConfig::from_json_str(AGENT_JSON).unwrap();
        cfg.device_id = "bat/001".to_string();
        cfg.p_max_kw = -1.0;
        cfg.soc_min = 60.0;
        cfg.soc_max = 40.0;
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"device_id".to_string()));
        assert!(fields.contains(&"p_max_kw".to_string()));
        assert!(fields.contains(&"soc_min".to_string()));
        assert!(fields.contains(&"initial_soc".to_string()));
    }

    #[test]
    fn baseline_preset_valid() {
        let cfg = SimulatorConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
        assert_eq!(cfg.devices.len(), 6);
    }

    #[test]
    fn all_presets_are_valid() {
        for name in SimulatorConfig::PRESETS {
            let cfg = SimulatorConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(errors.is_empty(), "preset \"{name}\" should be valid: {errors:?}");
        }
    }

    #[test]
    fn from_preset_unknown() {
        let e = SimulatorConfig::from_preset("nonexistent").unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = SimulatorConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.simulation.seed, 99);
        assert_eq!(cfg.simulation.step_seconds, 5.0);
        assert_eq!(cfg.devices.len(), 6);
    }

    #[test]
    fn toml_devices_replace_baseline() {
        let toml = r#"
[broker]
host = "mosquitto"

[[devices]]
id = "bat-9"
type = "battery"
site_id = "house-09"
p_max_kw = 3.0
initial_soc = 70.0
policy = "idle"
ramp = { model = "exponential", factor = 0.4 }
"#;
        let cfg = SimulatorConfig::from_toml_str(toml).unwrap();
        assert!(cfg.validate().is_empty());
        let fleet = cfg.build_fleet();
        assert_eq!(fleet.len(), 1);
        let agent = fleet.get("bat-9").unwrap();
        assert_eq!(agent.state().soc(), Some(70.0));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
bogus_field = true
"#;
        assert!(SimulatorConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_duplicate_ids() {
        let mut cfg = SimulatorConfig::baseline();
        cfg.devices[3].id = "ev-001".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "devices[3].id"));
    }

    #[test]
    fn validation_catches_bad_step() {
        let mut cfg = SimulatorConfig::baseline();
        cfg.simulation.step_seconds = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.step_seconds"));
    }

    #[test]
    fn validation_rejects_sub_millisecond_periods() {
        let mut cfg = SimulatorConfig::baseline();
        cfg.simulation.step_seconds = 0.0004;
        cfg.simulation.tick_interval_seconds = 1e-10;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.step_seconds"));
        assert!(errors.iter().any(|e| e.field == "simulation.tick_interval_seconds"));
        assert_eq!(cfg.loop_settings().interval, Duration::from_millis(1));

        cfg.simulation.step_seconds = 0.001;
        cfg.simulation.tick_interval_seconds = 0.001;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn env_overrides_broker() {
        let mut cfg = SimulatorConfig::baseline();
        cfg.apply_env_overrides(|key| match key {
            "BROKER_HOST" => Some("mosquitto".to_string()),
            "BROKER_PORT" => Some("1884".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.broker.host, "mosquitto");
        assert_eq!(cfg.broker.port, 1884);

        let err = cfg
            .apply_env_overrides(|key| (key == "BROKER_PORT").then(|| "abc".to_string()))
            .unwrap_err();
        assert_eq!(err.field, "BROKER_PORT");
    }

    #[test]
    fn baseline_fleet_matches_devices() {
        let fleet = SimulatorConfig::baseline().build_fleet();
        assert_eq!(fleet.len(), 6);
        for id in ["ev-001", "ev-002", "ev-003", "ev-004"] {
            let soc = fleet.get(id).unwrap().state().soc().unwrap();
            assert!((20.0..=80.0).contains(&soc), "{id} soc {soc}");
        }
        assert_eq!(fleet.get("bat-001").unwrap().state().soc(), Some(50.0));
        assert_eq!(fleet.get("pv-001").unwrap().state().soc(), None);
    }

    #[test]
    fn simulator_subscribes_to_setpoints_and_profile() {
        let settings = SimulatorConfig::baseline().mqtt_settings();
        assert_eq!(
            settings.subscriptions,
            vec!["der/setpoints/+/+", "der/simulation/profile"]
        );
    }
}
