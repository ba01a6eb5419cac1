//! Keithley 2000 Multimeter Driver
//!
//! Reference: Keithley Model 2000 User's Manual
//!
//! Protocol Overview:
//! - Format: SCPI, colon-delimited mnemonics, LF-terminated
//! - Role here: precision DC voltmeter under calibration
//! - Setup: continuous initiation, fixed range, NPLC integration,
//!   instrument-side moving-average filter, ASCII output format
//! - Query: `:fetch?` returns the latest reading as an ASCII float
//!   (scientific notation, e.g. "1.234500E+01")

use crate::bus::{GpibAddress, GpibBus};
use crate::error::CalError;
use anyhow::Result;
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Driver for the Keithley 2000 acting as the calibrated voltmeter.
pub struct Voltmeter {
    bus: Arc<Mutex<GpibBus>>,
    addr: GpibAddress,
}

impl Voltmeter {
    /// Create a driver bound to `addr` on the shared bus.
    pub fn new(bus: Arc<Mutex<GpibBus>>, addr: GpibAddress) -> Self {
        Self { bus, addr }
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.bus.lock().await.send_to(self.addr, command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.bus.lock().await.query(self.addr, command).await
    }

    /// Reset and configure the meter for the sweep.
    ///
    /// Order matters: reset first, then continuous initiation, integration
    /// time, fixed range, averaging filter, and finally the output format.
    pub async fn initialize(&self, range_v: f64, nplc: f64, filter_count: u32) -> Result<()> {
        self.send("*rst").await?;
        self.send(":init:cont on").await?;
        self.send(&format!(":volt:dc:nplc {nplc}")).await?;
        self.send(":volt:dc:rang:auto 0").await?;
        self.send(&format!(":volt:dc:rang {range_v}")).await?;
        self.send(":volt:dc:aver:stat 1").await?;
        self.send(":volt:dc:aver:tcon mov").await?;
        self.send(&format!(":volt:dc:aver:coun {filter_count}")).await?;
        self.send(":form ascii").await?;
        debug!("Voltmeter at {} initialized", self.addr);
        Ok(())
    }

    /// Fetch the latest reading and parse it as volts.
    pub async fn fetch(&self) -> Result<f64> {
        let line = self.query(":fetch?").await?;
        parse_reading(&line)
    }
}

/// Parse one response line as an ASCII float.
///
/// Preserves the raw line in the error so a ~20-hour run that dies on a
/// malformed response at least says what the instrument sent.
fn parse_reading(line: &str) -> Result<f64> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CalError::Reading {
            raw: line.to_string(),
        }
        .into());
    }
    trimmed.parse::<f64>().map_err(|_| {
        CalError::Reading {
            raw: line.to_string(),
        }
        .into()
    })
}
