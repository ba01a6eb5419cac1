//! GPIB bridge controller.
//!
//! The bridge (a Prologix-style serial-to-GPIB adapter) consumes lines with
//! a `++` prefix itself and forwards everything else to whichever instrument
//! was last selected with `++addr`. That "currently addressed device" used to
//! be implicit state spread across call order; here it is owned by
//! [`GpibBus`], which re-addresses explicitly on every instrument-directed
//! call according to a configurable [`AddressPolicy`].

use crate::adapters::Link;
use crate::config::{AddressPolicy, GPIB_ADDR_MAX};
use crate::error::{AppResult, CalError};
use anyhow::Result;
use log::debug;
use std::fmt;

/// Validated primary address of a device on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpibAddress(u8);

impl GpibAddress {
    /// Construct an address, rejecting values outside `0..=30`.
    pub fn new(addr: u8) -> AppResult<Self> {
        if addr > GPIB_ADDR_MAX {
            return Err(CalError::Configuration(format!(
                "GPIB address {addr} is outside the range 0..={GPIB_ADDR_MAX}"
            )));
        }
        Ok(Self(addr))
    }
}

impl fmt::Display for GpibAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controller for the bridge and the instruments behind it.
pub struct GpibBus {
    link: Box<dyn Link>,
    policy: AddressPolicy,
    /// Last `++addr` actually sent, if any.
    selected: Option<GpibAddress>,
    /// Whether the bridge's read-after-write mode is currently on.
    auto_read: bool,
}

impl GpibBus {
    /// Wrap an open link.
    pub fn new(link: Box<dyn Link>, policy: AddressPolicy) -> Self {
        Self {
            link,
            policy,
            selected: None,
            auto_read: false,
        }
    }

    /// Put the bridge into a known state: no end-of-string auto-detection,
    /// read-after-write off. Run once before any instrument traffic.
    pub async fn configure(&mut self) -> Result<()> {
        self.link.send("++eos 0").await?;
        self.link.send("++auto 0").await?;
        self.auto_read = false;
        self.selected = None;
        Ok(())
    }

    /// Toggle the bridge's read-after-write mode.
    pub async fn set_auto_read(&mut self, on: bool) -> Result<()> {
        self.link
            .send(if on { "++auto 1" } else { "++auto 0" })
            .await?;
        self.auto_read = on;
        Ok(())
    }

    /// Select `addr` on the bus, honoring the re-addressing policy.
    async fn address(&mut self, addr: GpibAddress) -> Result<()> {
        if self.policy == AddressPolicy::OnChange && self.selected == Some(addr) {
            return Ok(());
        }
        self.link.send(&format!("++addr {addr}")).await?;
        self.selected = Some(addr);
        Ok(())
    }

    /// Send `command` to the instrument at `addr`.
    pub async fn send_to(&mut self, addr: GpibAddress, command: &str) -> Result<()> {
        self.address(addr).await?;
        self.link.send(command).await
    }

    /// Send `command` to `addr` and read one response line.
    ///
    /// With read-after-write enabled the bridge returns the response on its
    /// own; otherwise an explicit `++read eoi` trigger is required first.
    pub async fn query(&mut self, addr: GpibAddress, command: &str) -> Result<String> {
        self.send_to(addr, command).await?;
        if !self.auto_read {
            self.link.send("++read eoi").await?;
        }
        self.link.read_line().await
    }

    /// Release the serial connection.
    pub async fn close(&mut self) -> Result<()> {
        if self.link.is_open() {
            self.link.close().await?;
            debug!("GPIB bridge link closed");
        }
        Ok(())
    }

    /// Whether the underlying link is open.
    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockLink;

    fn addr(n: u8) -> GpibAddress {
        GpibAddress::new(n).expect("valid address")
    }

    #[test]
    fn test_address_validation() {
        assert!(GpibAddress::new(0).is_ok());
        assert!(GpibAddress::new(30).is_ok());
        assert!(GpibAddress::new(31).is_err());
    }

    #[tokio::test]
    async fn test_configure_sequence() {
        let mock = MockLink::new();
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::Always);
        bus.configure().await.unwrap();

        assert_eq!(
            mock.sent_commands(),
            vec!["++eos 0".to_string(), "++auto 0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_always_policy_readdresses_every_call() {
        let mock = MockLink::new();
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::Always);

        bus.send_to(addr(10), "*rst").await.unwrap();
        bus.send_to(addr(10), ":form ascii").await.unwrap();

        assert_eq!(
            mock.sent_commands(),
            vec![
                "++addr 10".to_string(),
                "*rst".to_string(),
                "++addr 10".to_string(),
                ":form ascii".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_on_change_policy_elides_repeats() {
        let mock = MockLink::new();
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::OnChange);

        bus.send_to(addr(10), "*rst").await.unwrap();
        bus.send_to(addr(10), ":form ascii").await.unwrap();
        bus.send_to(addr(22), "*rst").await.unwrap();

        assert_eq!(
            mock.sent_commands(),
            vec![
                "++addr 10".to_string(),
                "*rst".to_string(),
                ":form ascii".to_string(),
                "++addr 22".to_string(),
                "*rst".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_query_with_auto_read() {
        let mock = MockLink::new().with_constant_response("1.0\n");
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::Always);
        bus.set_auto_read(true).await.unwrap();

        let line = bus.query(addr(10), ":fetch?").await.unwrap();
        assert_eq!(line, "1.0\n");
        assert_eq!(
            mock.sent_commands(),
            vec![
                "++auto 1".to_string(),
                "++addr 10".to_string(),
                ":fetch?".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_query_without_auto_read_triggers_explicitly() {
        let mock = MockLink::new().with_constant_response("1.0\n");
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::Always);

        bus.query(addr(10), ":fetch?").await.unwrap();
        assert_eq!(
            mock.sent_commands(),
            vec![
                "++addr 10".to_string(),
                ":fetch?".to_string(),
                "++read eoi".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = MockLink::new();
        let mut bus = GpibBus::new(Box::new(mock.clone()), AddressPolicy::Always);

        bus.close().await.unwrap();
        assert!(!bus.is_open());
        bus.close().await.unwrap();
    }
}
