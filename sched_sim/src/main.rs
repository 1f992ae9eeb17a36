//! Albor Space Scheduler UE Context Simulator
//!
//! Drives the scheduler UE context from a YAML scenario with a slot-paced loop.

mod config;
mod metrics;
mod simulator;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ScenarioConfig;
use crate::metrics::spawn_metrics_task;
use crate::simulator::Simulator;

/// Albor Space scheduler UE context simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML scenario file
    #[arg(short, long, default_value = "sched_sim/scenario.yml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of slots to simulate
    #[arg(long, default_value = "20000")]
    slots: u32,

    /// Wall-clock duration of a slot in microseconds. 0 runs as fast as possible.
    #[arg(long, default_value = "0")]
    slot_duration_us: u64,

    /// Seed of the channel and traffic noise
    #[arg(long, default_value = "1")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space scheduler simulator");
    info!("Scenario file: {}", args.config.display());
    let cfg = ScenarioConfig::load(&args.config)?;
    let mut sim = Simulator::new(&cfg, args.seed)?;

    let (metrics_tx, metrics_rx) = mpsc::channel(1024);
    let metrics_handle = spawn_metrics_task(metrics_rx, cfg.metrics.report_period_slots);

    let mut ticker = (args.slot_duration_us > 0).then(|| {
        let mut t = interval(Duration::from_micros(args.slot_duration_us));
        t.set_missed_tick_behavior(MissedTickBehavior::Skip);
        t
    });
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // The UE repository is single-threaded, so the slot loop stays on this task
    for _ in 0..args.slots {
        if let Some(t) = ticker.as_mut() {
            tokio::select! {
                _ = t.tick() => {}
                _ = &mut ctrl_c => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }
        let m = sim.run_slot();
        if metrics_tx.send(m).await.is_err() {
            warn!("Metrics task stopped unexpectedly");
            break;
        }
    }

    drop(metrics_tx);
    let summary = metrics_handle.await?;
    info!(
        "Simulation finished after {} slots with {} UEs: DL BLER {:.3}",
        summary.nof_slots,
        sim.nof_ues(),
        summary.dl_bler()
    );
    Ok(())
}
