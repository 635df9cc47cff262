//! Fleet simulator entry point: CLI wiring, config loading and the MQTT loop.

use std::process;

use anyhow::{Result, bail};
use chrono::Local;
use tokio::sync::mpsc;
use tracing::{error, info};

use der_sim::cli::{SimCliOptions, parse_sim_args, print_sim_usage};
use der_sim::config::SimulatorConfig;
use der_sim::runtime::{self, init_tracing, shutdown_channel};
use der_sim::transport::mqtt;

/// Inbound messages buffered between the MQTT driver and the fleet loop.
const INBOUND_QUEUE: usize = 64;

fn load_config(opts: &SimCliOptions) -> Result<SimulatorConfig> {
    let mut config = match (&opts.scenario, &opts.preset) {
        (Some(path), _) => SimulatorConfig::from_toml_file(path)?,
        (None, Some(name)) => SimulatorConfig::from_preset(name)?,
        (None, None) => SimulatorConfig::baseline(),
    };
    if let Some(seed) = opts.seed {
        config.simulation.seed = seed;
    }
    if let Some(ticks) = opts.max_ticks {
        config.simulation.max_ticks = Some(ticks);
    }
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("{} configuration error(s)", errors.len());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = match parse_sim_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            print_sim_usage();
            process::exit(2);
        }
    };
    if opts.help {
        print_sim_usage();
        return Ok(());
    }

    init_tracing();
    let config = load_config(&opts)?;

    let settings = config.mqtt_settings();
    info!(host = %settings.host, port = settings.port, "connecting to broker");
    let (publisher, driver) = mqtt::connect(&settings);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let driver_task = tokio::spawn(driver.run(inbound_tx, shutdown_rx.clone()));

    let mut fleet = config.build_fleet();
    let mut clock = config.clock(Local::now().naive_local());
    runtime::run_fleet(
        &mut fleet,
        &mut clock,
        &config.loop_settings(),
        &publisher,
        &mut inbound_rx,
        &mut shutdown_rx,
    )
    .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = driver_task.await {
        error!("mqtt driver task failed: {e}");
    }
    info!("simulator stopped");
    Ok(())
}
