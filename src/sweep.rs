//! The calibration sweep engine.
//!
//! [`SweepPlan`] turns the configured voltage range into a step table;
//! [`SweepRunner`] executes it: program the source, wait for settling, take
//! the configured number of readings, persist, and always leave the source
//! output disabled and the serial link closed on the way out — whether the
//! sweep completed, faulted, or was cancelled.
//!
//! Timing is dominated by the settling waits (the default plan spends about
//! twenty hours sleeping); every wait is cancellable so an operator abort
//! still reaches the safety shutdown.

use crate::adapters::Link;
use crate::bus::{GpibAddress, GpibBus};
use crate::config::{FaultPolicy, Settings, SweepSettings};
use crate::error::{AppResult, CalError};
use crate::instrument::{Source, Voltmeter};
use crate::storage::SweepWriter;
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// One (commanded, measured) voltage pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    /// Voltage the source was programmed to.
    pub commanded_v: f64,
    /// Voltage the voltmeter reported.
    pub measured_v: f64,
}

/// The step table derived from the configured range.
///
/// The range is half-open: `v_final` itself is never commanded, so the
/// canonical 0–60 V sweep at 1 V per step has exactly 60 steps, not 61.
#[derive(Debug, Clone, Copy)]
pub struct SweepPlan {
    v_init: f64,
    d_v: f64,
    steps: usize,
    samples_per_step: usize,
}

impl SweepPlan {
    /// Derive the plan from sweep settings.
    pub fn from_settings(sweep: &SweepSettings) -> Self {
        let span = (sweep.v_final - sweep.v_init) / sweep.d_v;
        let steps = if span.is_finite() && span > 0.0 {
            span.floor() as usize
        } else {
            0
        };
        Self {
            v_init: sweep.v_init,
            d_v: sweep.d_v,
            steps,
            samples_per_step: sweep.samples_per_step,
        }
    }

    /// Number of voltage steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Readings per step.
    pub fn samples_per_step(&self) -> usize {
        self.samples_per_step
    }

    /// Commanded voltage of step `step`.
    ///
    /// Always reconstructed from the origin, never accumulated, so the value
    /// recorded for a row is exact.
    pub fn voltage_at(&self, step: usize) -> f64 {
        self.v_init + step as f64 * self.d_v
    }

    /// Total row count of a complete sweep.
    pub fn total_samples(&self) -> usize {
        self.steps * self.samples_per_step
    }

    /// Sum of all settling and inter-sample waits.
    pub fn estimated_wait(&self, settle: Duration, sample_delay: Duration) -> Duration {
        let per_step = settle + sample_delay * self.samples_per_step as u32;
        per_step * self.steps as u32
    }
}

/// Create the cancellation channel for a sweep. Send `true` to abort.
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Executes one sweep over a link.
pub struct SweepRunner {
    bus: Arc<Mutex<GpibBus>>,
    voltmeter: Voltmeter,
    source: Source,
    settings: Settings,
    cancel: watch::Receiver<bool>,
}

impl SweepRunner {
    /// Build a runner over an open link.
    pub fn new(
        link: Box<dyn Link>,
        settings: Settings,
        cancel: watch::Receiver<bool>,
    ) -> AppResult<Self> {
        let voltmeter_addr = GpibAddress::new(settings.bus.voltmeter_address)?;
        let source_addr = GpibAddress::new(settings.bus.source_address)?;
        let bus = Arc::new(Mutex::new(GpibBus::new(link, settings.bus.address_policy)));

        Ok(Self {
            voltmeter: Voltmeter::new(Arc::clone(&bus), voltmeter_addr),
            source: Source::new(Arc::clone(&bus), source_addr),
            bus,
            settings,
            cancel,
        })
    }

    /// Run the sweep to completion and return the table.
    ///
    /// The safety shutdown (source output off, link closed) runs on every
    /// exit path, including faults and cancellation; a shutdown failure is
    /// logged and never masks the primary error.
    pub async fn run(mut self) -> Result<Vec<MeasurementRecord>> {
        let mut writer = SweepWriter::new(
            self.settings.storage.path.clone(),
            self.settings.storage.mode,
        );
        let result = self.execute(&mut writer).await;
        self.shutdown().await;
        result
    }

    async fn execute(&mut self, writer: &mut SweepWriter) -> Result<Vec<MeasurementRecord>> {
        let sweep = self.settings.sweep.clone();
        let plan = SweepPlan::from_settings(&sweep);
        info!(
            "Sweep plan: {} steps x {} samples ({} rows), waits total {:?}",
            plan.steps(),
            plan.samples_per_step(),
            plan.total_samples(),
            plan.estimated_wait(sweep.settle, sweep.sample_delay),
        );

        self.bus.lock().await.configure().await?;
        self.voltmeter
            .initialize(sweep.voltmeter_range, sweep.nplc, sweep.filter_count)
            .await?;
        self.source
            .initialize(sweep.source_range, sweep.current_limit)
            .await?;
        if self.settings.bus.auto_read {
            self.bus.lock().await.set_auto_read(true).await?;
        }

        writer.begin()?;
        let mut records = Vec::with_capacity(plan.total_samples());

        for step in 0..plan.steps() {
            self.check_cancelled()?;
            let volts = plan.voltage_at(step);
            info!(
                "Step {}/{}: source -> {} V, settling for {:?}",
                step + 1,
                plan.steps(),
                volts,
                sweep.settle
            );
            self.source.set_voltage(volts).await?;
            self.wait(sweep.settle).await?;

            for sample in 0..plan.samples_per_step() {
                if let Some(value) = self.acquire_sample(step, sample).await? {
                    debug!("Step {} sample {}: read {} V", step, sample, value);
                    let record = MeasurementRecord {
                        commanded_v: volts,
                        measured_v: value,
                    };
                    writer.append(&record)?;
                    records.push(record);
                }
                self.wait(sweep.sample_delay).await?;
            }
        }

        writer.finish(&records)?;
        Ok(records)
    }

    /// Take one reading under the configured fault policy.
    ///
    /// `Ok(None)` means the sample was skipped. Faults while programming the
    /// source or configuring the bridge never come through here — a wrong
    /// source state would poison every later reading, so those always abort.
    async fn acquire_sample(&mut self, step: usize, sample: usize) -> Result<Option<f64>> {
        let policy = self.settings.sweep.on_fault;
        let attempts = match policy {
            FaultPolicy::Retry => self.settings.sweep.retry_max.max(1),
            _ => 1,
        };

        let mut last_err = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.wait(self.settings.sweep.retry_delay).await?;
            }
            match self.voltmeter.fetch().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(
                        "Step {} sample {} failed (attempt {}/{}): {:#}",
                        step, sample, attempt, attempts, e
                    );
                    last_err = Some(e);
                }
            }
        }

        match policy {
            FaultPolicy::Skip => {
                warn!("Skipping step {} sample {}", step, sample);
                Ok(None)
            }
            _ => Err(last_err.unwrap_or_else(|| anyhow!("sample acquisition failed"))),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(CalError::Cancelled.into());
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    async fn wait(&mut self, duration: Duration) -> Result<()> {
        self.check_cancelled()?;
        if duration.is_zero() {
            return Ok(());
        }
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                changed = self.cancel.changed() => match changed {
                    Ok(()) => {
                        if *self.cancel.borrow() {
                            return Err(CalError::Cancelled.into());
                        }
                    }
                    Err(_) => {
                        // Sender dropped; no cancellation can arrive anymore.
                        tokio::time::sleep_until(deadline).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Best-effort safety shutdown: output off, link closed.
    async fn shutdown(&mut self) {
        if let Err(e) = self.source.output_off().await {
            error!("Safety shutdown could not disable source output: {:#}", e);
        }
        if let Err(e) = self.bus.lock().await.close().await {
            error!("Failed to close bridge link: {:#}", e);
        }
    }
}

/// Convenience wrapper: build a runner over `link` and run it.
pub async fn run_sweep(
    link: Box<dyn Link>,
    settings: &Settings,
    cancel: watch::Receiver<bool>,
) -> Result<Vec<MeasurementRecord>> {
    let runner = SweepRunner::new(link, settings.clone(), cancel)?;
    runner.run().await
}
