//! Single-device agent entry point.

use std::process;

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tracing::{error, info};

use der_sim::cli::{parse_agent_args, print_agent_usage};
use der_sim::config::AgentConfig;
use der_sim::runtime::{self, init_tracing, shutdown_channel};
use der_sim::transport::mqtt;

const INBOUND_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = match parse_agent_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            print_agent_usage();
            process::exit(2);
        }
    };
    if opts.help {
        print_agent_usage();
        return Ok(());
    }

    init_tracing();
    let config = AgentConfig::load(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("{} configuration error(s)", errors.len());
    }

    let settings = config.mqtt_settings();
    info!(
        host = %settings.host,
        port = settings.port,
        device_id = %config.device_id,
        "connecting to broker"
    );
    let (publisher, driver) = mqtt::connect(&settings);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let driver_task = tokio::spawn(driver.run(inbound_tx, shutdown_rx.clone()));

    let mut agent = config.build_agent(StdRng::from_os_rng());
    runtime::run_agent(
        &mut agent,
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
    info!("agent stopped");
    Ok(())
}
