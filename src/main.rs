//! CLI entry point for calsweep.
//!
//! Loads and validates the configuration, opens the serial link to the GPIB
//! bridge, and runs the sweep. Ctrl-C cancels the run through the sweep's
//! cancellation channel, so the safety shutdown (source output off, link
//! closed) still executes before the process exits.
//!
//! # Usage
//!
//! Canonical 0–60 V run with built-in defaults:
//! ```bash
//! calsweep
//! ```
//!
//! Custom parameters:
//! ```bash
//! calsweep --config sweep.toml --output run42.csv
//! ```

use anyhow::Result;
use calsweep::adapters::SerialLink;
use calsweep::config::Settings;
use calsweep::sweep::{cancel_channel, run_sweep, SweepPlan};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "calsweep")]
#[command(about = "Voltage calibration sweep over a Prologix GPIB bridge", long_about = None)]
struct Cli {
    /// TOML configuration file; omit for the canonical 0-60 V run
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the output CSV path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the serial device path
    #[arg(long)]
    port: Option<String>,

    /// Print the validated plan and exit without touching hardware
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(output) = cli.output {
        settings.storage.path = output;
    }
    if let Some(port) = cli.port {
        settings.serial.port = port;
    }
    settings.validate()?;

    let plan = SweepPlan::from_settings(&settings.sweep);
    let wait = plan.estimated_wait(settings.sweep.settle, settings.sweep.sample_delay);
    println!("🔌 calsweep - Keithley 2000/6487 calibration sweep");
    println!("   Port:   {}", settings.serial.port);
    println!(
        "   Range:  [{} V, {} V) in {} V steps -> {} steps",
        settings.sweep.v_init,
        settings.sweep.v_final,
        settings.sweep.d_v,
        plan.steps()
    );
    println!(
        "   Rows:   {} ({} samples per step)",
        plan.total_samples(),
        plan.samples_per_step()
    );
    println!(
        "   Waits:  ~{}h {:02}m of settling",
        wait.as_secs() / 3600,
        (wait.as_secs() % 3600) / 60
    );
    println!("   Output: {}", settings.storage.path.display());
    println!();

    if cli.dry_run {
        println!("Dry run only - no hardware touched.");
        return Ok(());
    }

    let link = SerialLink::open(&settings.serial)?;

    let (cancel_tx, cancel_rx) = cancel_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received - cancelling sweep; source output will be disabled");
            let _ = cancel_tx.send(true);
        }
    });

    let records = run_sweep(Box::new(link), &settings, cancel_rx).await?;

    info!("Sweep complete: {} rows", records.len());
    println!(
        "✅ Sweep complete: {} rows -> '{}'",
        records.len(),
        settings.storage.path.display()
    );
    Ok(())
}
