//! Mock link for testing.
//!
//! Implements [`Link`] without hardware. It provides:
//! - Scripted responses (a queue, or one constant line for every read)
//! - Controllable failure injection at chosen call indices
//! - A call log for test verification
//!
//! Handles are cheap clones over shared state, so a test can keep one while
//! the sweep session owns another and inspect the log afterwards.
//!
//! # Example
//!
//! ```
//! use calsweep::adapters::{Link, MockLink};
//!
//! # tokio_test::block_on(async {
//! let mut link = MockLink::new().with_constant_response("1.234500E+01\n");
//! link.send("++addr 10").await.unwrap();
//! assert_eq!(link.read_line().await.unwrap(), "1.234500E+01\n");
//! assert_eq!(link.sent_commands(), vec!["++addr 10".to_string()]);
//! # })
//! ```

use crate::adapters::Link;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    open: bool,
    sent: Vec<String>,
    responses: VecDeque<String>,
    constant_response: Option<String>,
    sends: usize,
    reads: usize,
    fail_sends_at: Vec<usize>,
    fail_reads_at: Vec<usize>,
}

/// Scriptable in-memory [`Link`].
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// Create an open mock link with no scripted responses.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: true,
                ..MockState::default()
            })),
        }
    }

    /// Answer every read with the same line.
    pub fn with_constant_response(self, line: &str) -> Self {
        self.state.lock().unwrap().constant_response = Some(line.to_string());
        self
    }

    /// Queue one response line; queued lines are consumed before the
    /// constant response applies.
    pub fn push_response(&self, line: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(line.to_string());
    }

    /// Inject a transport fault on the `n`-th call to `read_line` (1-based).
    pub fn fail_read_at(&self, n: usize) {
        self.state.lock().unwrap().fail_reads_at.push(n);
    }

    /// Inject a transport fault on the `n`-th call to `send` (1-based).
    pub fn fail_send_at(&self, n: usize) {
        self.state.lock().unwrap().fail_sends_at.push(n);
    }

    /// Copy of every command sent so far, in order, without terminators.
    pub fn sent_commands(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Number of `read_line` calls so far.
    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Link for MockLink {
    async fn send(&mut self, command: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(anyhow!("Mock link is closed"));
        }
        state.sends += 1;
        if state.fail_sends_at.contains(&state.sends) {
            return Err(anyhow!("Mock write failure (injected) on send {}", state.sends));
        }
        state.sent.push(command.to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(anyhow!("Mock link is closed"));
        }
        state.reads += 1;
        if state.fail_reads_at.contains(&state.reads) {
            return Err(anyhow!("Mock read failure (injected) on read {}", state.reads));
        }
        if let Some(line) = state.responses.pop_front() {
            return Ok(line);
        }
        if let Some(line) = &state.constant_response {
            return Ok(line.clone());
        }
        Err(anyhow!("Mock link has no scripted response"))
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_commands() {
        let mut link = MockLink::new();
        link.send("++addr 22").await.unwrap();
        link.send(":sour:volt 0").await.unwrap();

        assert_eq!(
            link.sent_commands(),
            vec!["++addr 22".to_string(), ":sour:volt 0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_queued_responses_before_constant() {
        let mut link = MockLink::new().with_constant_response("const\n");
        link.push_response("first\n");

        assert_eq!(link.read_line().await.unwrap(), "first\n");
        assert_eq!(link.read_line().await.unwrap(), "const\n");
        assert_eq!(link.read_line().await.unwrap(), "const\n");
    }

    #[tokio::test]
    async fn test_injected_read_failure_is_positional() {
        let mut link = MockLink::new().with_constant_response("ok\n");
        link.fail_read_at(2);

        assert!(link.read_line().await.is_ok());
        assert!(link.read_line().await.is_err());
        // Subsequent reads succeed again.
        assert!(link.read_line().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_link_rejects_io() {
        let mut link = MockLink::new();
        link.close().await.unwrap();

        assert!(!link.is_open());
        assert!(link.send("*rst").await.is_err());
        assert!(link.read_line().await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mut link = MockLink::new();
        let handle = link.clone();

        link.send("++auto 0").await.unwrap();
        assert_eq!(handle.sent_commands(), vec!["++auto 0".to_string()]);
    }
}
