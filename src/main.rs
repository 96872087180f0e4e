//! Installation controller - robotic arm with autonomous and reactive modes
//!
//! Alternates Mode A (randomized drills) and Mode B (occupancy-reactive
//! sequences with audio/lighting cues) on fixed timers, forever.
//!
//! Module structure:
//! - `domain/` - Core types (poses, sequences, occupancy reports, pose library)
//! - `io/` - External interfaces (actuator, SDK bridge, sensor UDP, cue UDP)
//! - `services/` - Business logic (sampler, executor, zone router, scheduler)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use iaoap::domain::PoseLibrary;
use iaoap::infra::{ActuatorMode, Config, Metrics};
use iaoap::io::{Actuator, BridgeActuator, BridgeSettings, CueFanout, SimulatedActuator};
use iaoap::services::{
    CompletionRouter, ExecutorSettings, MotionExecutor, NonRepeatingSampler, SchedulerSettings,
    SessionScheduler, ZoneRouter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Installation controller daemon
#[derive(Parser, Debug)]
#[command(name = "iaoap", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/installation.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-step visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Apply the startup settings; failures are logged and ignored
async fn prepare_actuator(actuator: &dyn Actuator, config: &Config) {
    if let Err(e) = actuator.set_operation_mode(config.operation_mode()).await {
        warn!(error = %e, "set_operation_mode_failed");
    }
    if let Err(e) = actuator.set_override_ratio(config.override_ratio()).await {
        warn!(error = %e, "set_override_ratio_failed");
    }
    if let Err(e) = actuator.set_speed(config.default_speed()).await {
        warn!(error = %e, "set_default_speed_failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "iaoap starting");

    let config = Config::load_from_path(&args.config);

    let actuator_mode = match config.actuator_mode() {
        ActuatorMode::Sim => "sim",
        ActuatorMode::Bridge => "bridge",
    };
    info!(
        config_file = %config.config_file(),
        actuator_mode = %actuator_mode,
        actuator_address = %config.actuator_address(),
        mode_a_secs = %config.mode_a_duration().as_secs(),
        mode_b_secs = %config.mode_b_duration().as_secs(),
        sensor_addr = %config.sensor_bind_addr(),
        cues_enabled = %config.cues_enabled(),
        audio_addr = %config.audio_addr(),
        lighting_addr = %config.lighting_addr(),
        on_move_failure = ?config.move_failure_policy(),
        "config_loaded"
    );

    let library = match config.library_path() {
        Some(path) => PoseLibrary::from_file(path).context("Failed to load pose library")?,
        None => PoseLibrary::builtin(),
    };
    info!(drills = %library.drill_count(), reactions = %library.reaction_count(), "pose_library_loaded");
    let library = Arc::new(library);

    let metrics = Arc::new(Metrics::new());
    let completions = Arc::new(CompletionRouter::new());

    let actuator: Arc<dyn Actuator> = match config.actuator_mode() {
        ActuatorMode::Sim => Arc::new(SimulatedActuator::new(config.sim_step(), completions.callback())),
        ActuatorMode::Bridge => {
            let settings = BridgeSettings {
                bridge_addr: config.bridge_addr().to_string(),
                controller_addr: config.actuator_address().to_string(),
                connect_mode: config.actuator_connect_mode(),
                connect_timeout: config.connect_timeout(),
                reply_timeout: config.reply_timeout(),
            };
            match BridgeActuator::connect(&settings, completions.callback()).await {
                Ok(bridge) => Arc::new(bridge),
                Err(e) => {
                    // No retry: a missing arm is a deployment problem
                    error!(error = %e, "actuator_connect_failed");
                    std::process::exit(1);
                }
            }
        }
    };
    prepare_actuator(actuator.as_ref(), &config).await;

    let executor = Arc::new(MotionExecutor::new(
        actuator,
        completions,
        metrics.clone(),
        ExecutorSettings::from_config(&config),
    ));

    let cues = Arc::new(
        CueFanout::from_config(&config, metrics.clone())
            .await
            .context("Failed to bind cue socket")?,
    );

    let router = Arc::new(ZoneRouter::new(
        library.clone(),
        executor.clone(),
        cues.clone(),
        metrics.clone(),
        config.cue_requires_sequence(),
    ));

    let sampler = NonRepeatingSampler::new(config.base_angles(), config.offsets(), config.drill_seed())
        .context("Invalid drill configuration")?;

    let scheduler = SessionScheduler::new(
        SchedulerSettings::from_config(&config),
        library,
        sampler,
        executor,
        router,
        cues,
        metrics.clone(),
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;

    metrics.report().log();
    info!("iaoap shutdown complete");
    Ok(())
}
