//! Instrument drivers.
//!
//! Typed wrappers over the shared [`GpibBus`](crate::bus::GpibBus), one per
//! instrument. Command mnemonics are opaque SCPI strings; no response parsing
//! happens anywhere except the voltmeter's numeric fetch.

pub mod kei2000;
pub mod kei6487;

pub use kei2000::Voltmeter;
pub use kei6487::Source;
