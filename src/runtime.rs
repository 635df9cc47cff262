//! Process plumbing shared by both binaries: logging, shutdown and the
//! single-owner control loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::environment::hour_of_day;
use crate::error::TransportError;
use crate::protocol::{InboundTopic, TelemetryEnvelope, Topics, encode_telemetry};
use crate::sim::{DeviceAgent, Dispatch, Fleet, SimClock};
use crate::telemetry::EmitContext;
use crate::transport::{Inbound, Publisher};

/// Ticks between fleet summaries in the log.
pub const SUMMARY_EVERY_TICKS: u64 = 12;

/// Installs the global subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rumqttc=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}

/// Shutdown flag flipped by SIGINT/SIGTERM, or by the caller through the sender.
pub fn shutdown_channel() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    let signal_tx = Arc::clone(&tx);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });
    (tx, rx)
}

/// Wall-clock epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parameters common to both control loops.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub topics: Topics,
    /// Wall-clock period between ticks.
    pub interval: Duration,
    /// `source` stamped on telemetry.
    pub source: String,
}

async fn publish_envelope<P: Publisher + ?Sized>(
    publisher: &P,
    topic: &str,
    envelope: &TelemetryEnvelope,
) -> Result<(), TransportError> {
    let payload = encode_telemetry(envelope)?;
    publisher.publish(topic, payload).await
}

async fn publish_logged<P: Publisher + ?Sized>(publisher: &P, topic: &str, envelope: &TelemetryEnvelope) {
    match publish_envelope(publisher, topic, envelope).await {
        Ok(()) => debug!(
            %topic,
            power_kw = envelope.payload.readings.power_kw,
            soc = envelope.payload.readings.soc,
            "telemetry published"
        ),
        Err(e) => error!(%topic, "telemetry dropped: {e}"),
    }
}

/// Runs one device until shutdown.
///
/// Commands arriving on `inbound` are admitted between ticks; every tick
/// steps the device over the measured wall-clock delta and publishes its
/// telemetry. Publish failures are logged and the loop carries on.
pub async fn run_agent<P: Publisher + ?Sized>(
    agent: &mut DeviceAgent,
    settings: &LoopSettings,
    publisher: &P,
    inbound: &mut mpsc::Receiver<Inbound>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let identity = agent.identity().clone();
    let telemetry_topic = settings.topics.telemetry(identity.kind, &identity.device_id);
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    info!(device_id = %identity.device_id, kind = %identity.kind, "agent loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(message) = inbound.recv() => {
                match settings.topics.parse(&message.topic) {
                    Some(InboundTopic::Setpoint { kind, device_id })
                        if kind == identity.kind && device_id == identity.device_id =>
                    {
                        if let Ok(result) = agent.handle_command(&message.payload, now_ms()) {
                            debug!(topic = %message.topic, %result, "setpoint handled");
                        }
                    }
                    _ => debug!(topic = %message.topic, "ignoring message for another device"),
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt_seconds = now.duration_since(last).as_secs_f64();
                last = now;
                agent.tick(dt_seconds, hour_of_day(Local::now().time()), None);
                let envelope = agent.telemetry(&EmitContext::live(now_ms(), &settings.source));
                publish_logged(publisher, &telemetry_topic, &envelope).await;
            }
        }
    }
    info!(device_id = %identity.device_id, "agent loop stopped");
}

/// Runs the fleet until shutdown or until `clock` reaches its limit.
///
/// Each wall-clock tick advances the simulated clock by one step, steps every
/// device and publishes all telemetry stamped with simulated time.
pub async fn run_fleet<P: Publisher + ?Sized>(
    fleet: &mut Fleet,
    clock: &mut SimClock,
    settings: &LoopSettings,
    publisher: &P,
    inbound: &mut mpsc::Receiver<Inbound>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(devices = fleet.len(), start = %clock.now(), "simulation started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(message) = inbound.recv() => {
                match settings.topics.parse(&message.topic) {
                    Some(topic) => {
                        match fleet.dispatch(&topic, &message.payload, now_ms()) {
                            Dispatch::Admission(result) => {
                                debug!(topic = %message.topic, %result, "setpoint handled");
                            }
                            outcome => debug!(topic = %message.topic, ?outcome, "inbound handled"),
                        }
                    }
                    None => warn!(topic = %message.topic, "message on unrouted topic"),
                }
            }
            _ = ticker.tick() => {
                let Some(tick) = clock.tick() else {
                    info!(ticks = clock.ticks(), "tick limit reached");
                    break;
                };
                fleet.tick_all(clock.step_seconds(), tick.hour());
                let ctx = EmitContext {
                    timestamp_ms: tick.timestamp_ms(),
                    sent_at_ms: now_ms(),
                    source: settings.source.clone(),
                };
                for envelope in fleet.telemetry(&ctx) {
                    let topic = settings.topics.telemetry(envelope.device_type, &envelope.device_id);
                    publish_logged(publisher, &topic, &envelope).await;
                }
                if tick.is_summary(SUMMARY_EVERY_TICKS) {
                    info!(tick = tick.index, sim_time = %tick.time, "{}", fleet.summary());
                }
            }
        }
    }
    info!(ticks = clock.ticks(), "simulation stopped");
}
