//! Configuration management.
//!
//! All sweep parameters live in a TOML file deserialized into [`Settings`].
//! Every field has a default reproducing the constants of the legacy
//! hand-run calibration procedure, so an empty (or absent) file yields the
//! canonical 0–60 V, 1 V step, 10-samples-per-step run. Semantic validation
//! happens once, at startup, before any serial port is opened.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! read_timeout = "1000s"
//!
//! [sweep]
//! v_init = 0.0
//! d_v = 1.0
//! v_final = 60.0
//! samples_per_step = 10
//! settle = "600s"
//! sample_delay = "60s"
//!
//! [storage]
//! path = "keithley2000_cal.csv"
//! mode = "at-end"   # or "incremental"
//! ```

use crate::error::{AppResult, CalError};
use config::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest primary address on a GPIB bus.
pub const GPIB_ADDR_MAX: u8 = 30;

/// Re-addressing policy for the shared bus.
///
/// The bridge remembers the last `++addr`; `Always` re-sends it before every
/// instrument command (what the legacy procedure did), `OnChange` elides it
/// while the target stays the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressPolicy {
    /// Re-send `++addr` unconditionally before every command.
    Always,
    /// Send `++addr` only when the target differs from the last one.
    OnChange,
}

/// What to do when a single sample cannot be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Abort the whole sweep (legacy behavior).
    Abort,
    /// Log the fault and move on; the sample is not recorded.
    Skip,
    /// Re-attempt the sample up to `retry_max` times, then abort.
    Retry,
}

/// When measurement rows reach the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistMode {
    /// Write the whole table once, after the sweep completes. A fault before
    /// completion leaves no file.
    AtEnd,
    /// Create the file up front and flush every row as it is measured.
    Incremental,
}

/// Serial connection to the GPIB bridge.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial device path (e.g. "/dev/ttyUSB0", "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Overall deadline for one response line.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Pause after every write, letting the bridge finish relaying.
    #[serde(with = "humantime_serde")]
    pub command_delay: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1000),
            command_delay: Duration::from_millis(100),
        }
    }
}

/// GPIB bus layout and bridge behavior.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BusSettings {
    /// Primary address of the voltmeter (Keithley 2000).
    pub voltmeter_address: u8,
    /// Primary address of the voltage source (Keithley 6487).
    pub source_address: u8,
    /// Re-addressing policy.
    pub address_policy: AddressPolicy,
    /// Whether the bridge's read-after-write mode is enabled for the sweep.
    /// When off, every query is followed by an explicit `++read eoi`.
    pub auto_read: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            voltmeter_address: 10,
            source_address: 22,
            address_policy: AddressPolicy::Always,
            auto_read: true,
        }
    }
}

/// Sweep geometry, instrument setup and fault policy.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SweepSettings {
    /// First commanded voltage.
    pub v_init: f64,
    /// Voltage increment per step.
    pub d_v: f64,
    /// Exclusive upper bound of the sweep; never commanded itself.
    pub v_final: f64,
    /// Readings taken at each voltage step.
    pub samples_per_step: usize,
    /// Settling wait after programming the source.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Wait after each reading.
    #[serde(with = "humantime_serde")]
    pub sample_delay: Duration,
    /// Fixed DC range on the voltmeter, in volts.
    pub voltmeter_range: f64,
    /// Integration time in power-line cycles.
    pub nplc: f64,
    /// Moving-average filter depth on the voltmeter.
    pub filter_count: u32,
    /// Output voltage range on the source, in volts.
    pub source_range: f64,
    /// Source current limit, in amps.
    pub current_limit: f64,
    /// Per-sample fault policy.
    pub on_fault: FaultPolicy,
    /// Attempts per sample under [`FaultPolicy::Retry`].
    pub retry_max: u32,
    /// Pause between retry attempts.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            v_init: 0.0,
            d_v: 1.0,
            v_final: 60.0,
            samples_per_step: 10,
            settle: Duration::from_secs(600),
            sample_delay: Duration::from_secs(60),
            voltmeter_range: 60.0,
            nplc: 10.0,
            filter_count: 100,
            source_range: 60.0,
            current_limit: 25e-6,
            on_fault: FaultPolicy::Abort,
            retry_max: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Output file location and persistence mode.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the CSV table.
    pub path: PathBuf,
    /// Persistence policy.
    pub mode: PersistMode,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keithley2000_cal.csv"),
            mode: PersistMode::AtEnd,
        }
    }
}

/// Root of the configuration tree.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Serial connection to the bridge.
    pub serial: SerialSettings,
    /// Bus layout.
    pub bus: BusSettings,
    /// Sweep parameters.
    pub sweep: SweepSettings,
    /// Output handling.
    pub storage: StorageSettings,
}

impl Settings {
    /// Load settings from a TOML file, or the built-in defaults when `path`
    /// is `None`.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => {
                let s = Config::builder()
                    .add_source(config::File::from(path))
                    .build()
                    .map_err(CalError::Config)?;
                s.try_deserialize().map_err(CalError::Config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Number of voltage steps in the half-open range `[v_init, v_final)`.
    pub fn steps(&self) -> usize {
        crate::sweep::SweepPlan::from_settings(&self.sweep).steps()
    }

    /// Reject semantically invalid values before any hardware is touched.
    pub fn validate(&self) -> AppResult<()> {
        let sw = &self.sweep;
        if !sw.d_v.is_finite() || sw.d_v <= 0.0 {
            return Err(CalError::Configuration(format!(
                "d_v must be a positive finite voltage increment, got {}",
                sw.d_v
            )));
        }
        if !sw.v_init.is_finite() || !sw.v_final.is_finite() || sw.v_final <= sw.v_init {
            return Err(CalError::Configuration(format!(
                "sweep range [{}, {}) is empty or not finite",
                sw.v_init, sw.v_final
            )));
        }
        if self.steps() == 0 {
            return Err(CalError::Configuration(
                "sweep range is narrower than one d_v step".to_string(),
            ));
        }
        if sw.samples_per_step == 0 {
            return Err(CalError::Configuration(
                "samples_per_step must be at least 1".to_string(),
            ));
        }
        if sw.nplc <= 0.0 {
            return Err(CalError::Configuration(format!(
                "nplc must be positive, got {}",
                sw.nplc
            )));
        }
        if sw.filter_count == 0 {
            return Err(CalError::Configuration(
                "filter_count must be at least 1".to_string(),
            ));
        }
        if sw.voltmeter_range <= 0.0 || sw.source_range <= 0.0 {
            return Err(CalError::Configuration(
                "instrument ranges must be positive".to_string(),
            ));
        }
        if sw.current_limit <= 0.0 {
            return Err(CalError::Configuration(format!(
                "current_limit must be positive, got {}",
                sw.current_limit
            )));
        }
        if sw.on_fault == FaultPolicy::Retry && sw.retry_max == 0 {
            return Err(CalError::Configuration(
                "retry_max must be at least 1 under the retry policy".to_string(),
            ));
        }
        for (name, addr) in [
            ("voltmeter_address", self.bus.voltmeter_address),
            ("source_address", self.bus.source_address),
        ] {
            if addr > GPIB_ADDR_MAX {
                return Err(CalError::Configuration(format!(
                    "{name} {addr} is outside the GPIB range 0..={GPIB_ADDR_MAX}"
                )));
            }
        }
        if self.serial.baud_rate == 0 {
            return Err(CalError::Configuration(
                "baud_rate must be positive".to_string(),
            ));
        }
        if self.serial.read_timeout.is_zero() {
            return Err(CalError::Configuration(
                "read_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
