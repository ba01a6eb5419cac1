//! Core library for the calsweep application.
//!
//! calsweep drives a two-instrument calibration procedure over a
//! serial-to-GPIB bridge: a Keithley 6487 steps through a voltage sweep
//! while a Keithley 2000 under calibration is read repeatedly at each step,
//! and the resulting (commanded, measured) table is persisted as CSV.
//!
//! The modules mirror the layers of the procedure: [`adapters`] owns the
//! serial link, [`bus`] the bridge addressing, [`instrument`] the SCPI
//! command sets, [`sweep`] the control loop, [`storage`] the output table,
//! and [`config`] ties the knobs together.

pub mod adapters;
pub mod bus;
pub mod config;
pub mod error;
pub mod instrument;
pub mod storage;
pub mod sweep;
