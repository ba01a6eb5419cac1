//! Keithley 6487 Picoammeter / Voltage Source Driver
//!
//! Reference: Keithley Model 6487 Reference Manual
//!
//! Protocol Overview:
//! - Format: SCPI, colon-delimited mnemonics, LF-terminated
//! - Role here: calibrated voltage source driving the device under test
//! - Setup: fixed output range, current limit protecting the DUT, output
//!   starts at 0 V and enabled
//! - No queries: the source is write-only in this procedure

use crate::bus::{GpibAddress, GpibBus};
use anyhow::Result;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Driver for the Keithley 6487 voltage source.
pub struct Source {
    bus: Arc<Mutex<GpibBus>>,
    addr: GpibAddress,
}

impl Source {
    /// Create a driver bound to `addr` on the shared bus.
    pub fn new(bus: Arc<Mutex<GpibBus>>, addr: GpibAddress) -> Self {
        Self { bus, addr }
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.bus.lock().await.send_to(self.addr, command).await
    }

    /// Reset and configure the source: range, current limit, 0 V, output on.
    pub async fn initialize(&self, range_v: f64, current_limit_a: f64) -> Result<()> {
        self.send("*rst").await?;
        self.send(&format!(":sour:volt:rang {range_v}")).await?;
        self.send(&format!(":sour:volt:ilim {current_limit_a:e}"))
            .await?;
        self.set_voltage(0.0).await?;
        self.send(":sour:volt:stat ON").await?;
        debug!("Source at {} initialized, output enabled at 0 V", self.addr);
        Ok(())
    }

    /// Program the output voltage.
    pub async fn set_voltage(&self, volts: f64) -> Result<()> {
        self.send(&format!(":sour:volt {volts}")).await
    }

    /// Disable the output. Safety shutdown; called on every exit path.
    pub async fn output_off(&self) -> Result<()> {
        self.send(":sour:volt:stat OFF").await
    }
}
