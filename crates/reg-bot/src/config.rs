//! Bot configuration
//!
//! [`BotConfig`] carries every tunable the controller and its sessions read.
//! Values are normally populated from the environment by the binary; the
//! defaults match the behaviour expected by the assignment authority.
//!
//! ```rust
//! use rvoip_reg_bot::config::BotConfig;
//! use std::time::Duration;
//!
//! let config = BotConfig::default()
//!     .with_max_per_cycle(2)
//!     .with_delay_between_cycle(Duration::from_millis(250));
//!
//! assert_eq!(config.max_per_cycle, 2);
//! assert_eq!(config.timing.retry_interval, Duration::from_secs(300));
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{BotError, BotResult};

/// Well-known channel the assignment authority listens on for heartbeats
pub const BOT_CONTROLLER_CHANNEL: &str = "reg-bot-controller";

/// Prefix of every bot's private channel
pub const CHANNEL_PREFIX: &str = "bot:";

/// Interval between heartbeat announcements
pub const CHECKIN_INTERVAL: Duration = Duration::from_secs(60);

/// Timing of the per-account REGISTER loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationTiming {
    /// Expiry hint placed on our Contact; upstream may override it
    pub expiry_hint: Duration,
    /// Refresh this long before the granted expiry
    pub refresh_margin: Duration,
    /// Fixed delay before retrying a failed attempt
    pub retry_interval: Duration,
    /// Shortest refresh delay ever scheduled
    pub min_refresh: Duration,
}

impl Default for RegistrationTiming {
    fn default() -> Self {
        Self {
            expiry_hint: Duration::from_secs(3600),
            refresh_margin: Duration::from_secs(15),
            retry_interval: Duration::from_secs(300),
            min_refresh: Duration::from_secs(1),
        }
    }
}

impl RegistrationTiming {
    /// Delay until the next REGISTER after upstream granted `expires` seconds
    pub fn refresh_after(&self, expires: u32) -> Duration {
        Duration::from_secs(u64::from(expires))
            .saturating_sub(self.refresh_margin)
            .max(self.min_refresh)
    }
}

/// Controller and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Accounts dispatched per pacing group
    pub max_per_cycle: usize,
    /// Pause between pacing groups
    pub delay_between_cycle: Duration,
    /// Interval between heartbeat announcements
    pub heartbeat_interval: Duration,
    /// Channel heartbeats are published on
    pub controller_channel: String,
    /// Prefix of key-value records written per assigned account
    pub key_namespace: String,
    /// User-Agent used when the account carries no override
    pub default_user_agent: String,
    /// Host part of the Contact we register
    pub contact_host: String,
    /// Contact hosts that identify our own binding in a 200 OK, besides
    /// `contact_host` itself
    pub local_contact_hosts: Vec<String>,
    /// REGISTER loop timing
    pub timing: RegistrationTiming,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_per_cycle: 5,
            delay_between_cycle: Duration::from_millis(100),
            heartbeat_interval: CHECKIN_INTERVAL,
            controller_channel: BOT_CONTROLLER_CHANNEL.to_string(),
            key_namespace: "regbot.account.".to_string(),
            default_user_agent: "IQMobile".to_string(),
            contact_host: "localhost".to_string(),
            local_contact_hosts: vec!["127.0.0.1".to_string(), "localhost".to_string()],
            timing: RegistrationTiming::default(),
        }
    }
}

impl BotConfig {
    /// Set the pacing group size
    pub fn with_max_per_cycle(mut self, max_per_cycle: usize) -> Self {
        self.max_per_cycle = max_per_cycle;
        self
    }

    /// Set the pause between pacing groups
    pub fn with_delay_between_cycle(mut self, delay: Duration) -> Self {
        self.delay_between_cycle = delay;
        self
    }

    /// Set the key-value namespace
    pub fn with_key_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key_namespace = namespace.into();
        self
    }

    /// Set the default User-Agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.default_user_agent = user_agent.into();
        self
    }

    /// Set the Contact host
    pub fn with_contact_host(mut self, host: impl Into<String>) -> Self {
        self.contact_host = host.into();
        self
    }

    /// Replace the set of hosts treated as our own Contact
    pub fn with_local_contact_hosts(mut self, hosts: Vec<String>) -> Self {
        self.local_contact_hosts = hosts;
        self
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> BotResult<()> {
        if self.max_per_cycle == 0 {
            return Err(BotError::config("max_per_cycle must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(BotError::config("heartbeat_interval must be non-zero"));
        }
        if self.timing.retry_interval.is_zero() {
            return Err(BotError::config("retry_interval must be non-zero"));
        }
        if self.controller_channel.is_empty() {
            return Err(BotError::config("controller_channel must not be empty"));
        }
        Ok(())
    }

    /// Whether `host` names our own Contact binding
    pub fn is_local_contact_host(&self, host: &str) -> bool {
        self.contact_host.eq_ignore_ascii_case(host)
            || self
                .local_contact_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.max_per_cycle, 5);
        assert_eq!(config.delay_between_cycle, Duration::from_millis(100));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.controller_channel, "reg-bot-controller");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refresh_after_subtracts_margin() {
        let timing = RegistrationTiming::default();
        assert_eq!(timing.refresh_after(3600), Duration::from_secs(3585));
        assert_eq!(timing.refresh_after(60), Duration::from_secs(45));
    }

    #[test]
    fn test_refresh_after_never_below_minimum() {
        let timing = RegistrationTiming::default();
        assert_eq!(timing.refresh_after(10), Duration::from_secs(1));
        assert_eq!(timing.refresh_after(15), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = BotConfig::default().with_max_per_cycle(0);
        assert!(matches!(config.validate(), Err(BotError::Config { .. })));
    }

    #[test]
    fn test_local_contact_hosts_case_insensitive() {
        let config = BotConfig::default();
        assert!(config.is_local_contact_host("LOCALHOST"));
        assert!(config.is_local_contact_host("127.0.0.1"));
        assert!(!config.is_local_contact_host("sbc.example.net"));
    }

    #[test]
    fn test_contact_host_is_always_local() {
        let config = BotConfig::default()
            .with_contact_host("203.0.113.50")
            .with_local_contact_hosts(vec!["127.0.0.1".into()]);
        assert!(config.is_local_contact_host("203.0.113.50"));
        assert!(config.is_local_contact_host("127.0.0.1"));
        assert!(!config.is_local_contact_host("localhost"));
    }
}
