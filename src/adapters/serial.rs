//! Serial link to the GPIB bridge.
//!
//! Wraps the `serialport` crate and provides async I/O by moving the
//! blocking port operations onto Tokio's blocking task executor. The port
//! sits behind `Arc<Mutex<..>>` so the blocking closures can own a handle.

use crate::adapters::Link;
use crate::config::SerialSettings;
use crate::error::CalError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Inner poll interval on the port; the overall deadline is `read_timeout`.
#[cfg(feature = "instrument_serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial connection to the bridge.
pub struct SerialLink {
    port_name: String,
    read_timeout: Duration,
    command_delay: Duration,
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialLink {
    /// Open the configured serial device.
    ///
    /// The port's own timeout is kept short; [`Link::read_line`] enforces the
    /// configured overall deadline on top of it.
    #[cfg(feature = "instrument_serial")]
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    settings.port, settings.baud_rate
                )
            })?;

        debug!(
            "Serial port '{}' opened at {} baud",
            settings.port, settings.baud_rate
        );

        Ok(Self {
            port_name: settings.port.clone(),
            read_timeout: settings.read_timeout,
            command_delay: settings.command_delay,
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    /// Stub when built without serial support.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        let _ = settings;
        Err(CalError::SerialFeatureDisabled.into())
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn send(&mut self, command: &str) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self
                .port
                .as_ref()
                .ok_or(CalError::SerialPortNotConnected)
                .map_err(anyhow::Error::from)?;

            let line = format!("{command}\n");
            let port = Arc::clone(port);
            let logged = command.to_string();

            tokio::task::spawn_blocking(move || {
                use std::io::Write;

                let mut guard = port.blocking_lock();
                guard
                    .write_all(line.as_bytes())
                    .context("Failed to write to serial port")?;
                guard.flush().context("Failed to flush serial port")?;

                debug!("Sent: {}", logged);
                Ok::<(), anyhow::Error>(())
            })
            .await
            .context("Serial I/O task panicked")??;

            // Let the bridge finish relaying before the next command.
            tokio::time::sleep(self.command_delay).await;
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(CalError::SerialFeatureDisabled.into())
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self
                .port
                .as_ref()
                .ok_or(CalError::SerialPortNotConnected)
                .map_err(anyhow::Error::from)?;

            let port = Arc::clone(port);
            let deadline = self.read_timeout;

            tokio::task::spawn_blocking(move || -> Result<String> {
                use std::io::Read;

                let mut guard = port.blocking_lock();
                let mut line: Vec<u8> = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > deadline {
                        return Err(anyhow!("Serial read timeout after {:?}", deadline));
                    }

                    match guard.read(&mut buffer) {
                        Ok(1) => {
                            line.push(buffer[0]);
                            if buffer[0] == b'\n' {
                                break;
                            }
                        }
                        Ok(0) => {
                            return Err(anyhow::Error::from(CalError::Link(
                                "Unexpected EOF from serial port".to_string(),
                            )));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port poll expired; the overall deadline decides.
                            continue;
                        }
                        Err(e) => {
                            return Err(anyhow!("Serial read error: {}", e));
                        }
                        Ok(_) => {
                            return Err(anyhow!("Read into single-byte buffer returned >1"));
                        }
                    }
                }

                let line = String::from_utf8_lossy(&line).into_owned();
                debug!("Received: {}", line.trim_end());
                Ok(line)
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(CalError::SerialFeatureDisabled.into())
        }
    }

    async fn close(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }
        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}
