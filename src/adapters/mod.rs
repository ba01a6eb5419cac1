//! Link-layer implementations.
//!
//! This module contains the [`Link`] trait — the low-level I/O abstraction
//! over the serial connection to the GPIB bridge — together with the real
//! serial implementation and a scriptable mock for tests.

pub mod mock;
pub mod serial;

pub use mock::MockLink;
pub use serial::SerialLink;

use anyhow::Result;
use async_trait::async_trait;

/// Byte stream to the GPIB bridge, one text line at a time.
///
/// Commands are ASCII lines; [`Link::send`] appends the newline terminator
/// and pauses for the configured post-write delay so the bridge finishes
/// relaying before the next command is issued. The connection is a scoped
/// resource: callers must be able to rely on [`Link::close`] running on every
/// exit path, which the sweep session guarantees.
#[async_trait]
pub trait Link: Send {
    /// Write `command` + `"\n"`, flush, then wait the post-write delay.
    async fn send(&mut self, command: &str) -> Result<()>;

    /// Read one newline-terminated line from the currently addressed
    /// instrument, within the configured timeout. The line is returned raw,
    /// terminator included; decoding is the caller's job.
    async fn read_line(&mut self) -> Result<String>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}
