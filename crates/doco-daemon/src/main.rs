//! doco daemon - Main entry point
//!
//! Calibrates the doors, then runs the control loop, the MQTT bridge and the
//! legacy HTTP API until interrupted.

mod api;
mod auth;
mod config;
mod controller;
mod publisher;
mod rpi;
mod server;
mod state;
mod thermal;

use anyhow::{Context, Result};
use clap::Parser;
use doco_core::{CalibrationStore, DigitalIo, SimulatedIo};
use doco_mqtt::{BusEvent, MessageBus, MqttBus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "doco")]
#[command(about = "Garage door and gate controller with MQTT and HTTP control")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "doco.toml")]
    config: PathBuf,

    /// Bind address for the HTTP API
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Use in-memory pins instead of the Raspberry Pi GPIO
    #[arg(long)]
    simulate: bool,

    /// Measure travel times again even if a calibration exists
    #[arg(long)]
    recalibrate: bool,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("doco v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        doors = config.doors.len(),
        mqtt = config.mqtt.enabled,
        simulate = args.simulate,
        "Configuration loaded"
    );

    let io: Arc<dyn DigitalIo> = if args.simulate {
        warn!("Running with simulated GPIO");
        Arc::new(SimulatedIo::new())
    } else {
        Arc::new(rpi::RpiIo::new(&config.doors)?)
    };

    // Travel times must be known before the loop starts
    let mut calibration = CalibrationStore::load(Path::new(&config.daemon.calibration_path))
        .context("Failed to load calibration")?;
    let pending = calibration.pending(&config.doors, args.recalibrate).len();
    if pending > 0 && args.simulate {
        warn!(doors = pending, "Skipping calibration with simulated GPIO");
    } else if pending > 0 {
        calibration
            .calibrate(
                &config.doors,
                io.as_ref(),
                &config.daemon.measure_settings(),
                args.recalibrate,
            )
            .await
            .context("Failed to save calibration")?;
    }

    let token = auth::TokenGuard::load(&config.daemon.token_path);
    let state = state::AppState::new(config.clone(), io, calibration, token);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (mqtt, events) = if config.mqtt.enabled {
        let (bus, events) = MqttBus::connect(&config.mqtt.to_bus_config());
        (Some(Arc::new(bus)), events)
    } else {
        info!("MQTT disabled");
        let (_tx, events) = mpsc::channel::<BusEvent>(1);
        (None, events)
    };

    let server = {
        let state = state.clone();
        let bind = config.daemon.bind.clone();
        let tls = config.daemon.tls.clone();
        let shutdown = stopped(shutdown_rx);
        tokio::spawn(async move {
            if let Err(e) = server::run(state, &bind, tls.as_ref(), shutdown).await {
                error!(error = %e, "Web server failed");
            }
        })
    };

    let bus = mqtt.clone().map(|b| b as Arc<dyn MessageBus>);
    let estimator = config.daemon.inference.estimator();
    let controller = controller::Controller::new(state, estimator, bus);
    controller
        .run(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await;

    let _ = shutdown_tx.send(true);
    if let Some(bus) = mqtt {
        if let Err(e) = bus.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
        }
    }
    if let Err(e) = server.await {
        error!(error = %e, "Web server task panicked");
    }

    Ok(())
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
