//! Client configuration

use crate::scheduler::SchedulerConfig;
use shared::transport::DEFAULT_DATAGRAM_BUDGET;
use shared::{Error, Result, DEFAULT_MAX_SNAPSHOT_SIZE};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub scheduler: SchedulerConfig,
    /// How long to wait for a snapshot before asking again.
    pub snapshot_retry: Duration,
    /// How long to wait for `SendId` before repeating `Hello`.
    pub hello_retry: Duration,
    /// Silence from the server after which the client gives up.
    pub server_timeout: Duration,
    /// Largest snapshot the client will reassemble.
    pub max_snapshot_size: usize,
    /// Simulated round-trip latency in milliseconds; half is added each way.
    pub fake_ping_ms: u64,
    /// Random extra delay of up to this many milliseconds per direction.
    pub fake_jitter_ms: u64,
    /// Generate random input instead of staying idle.
    pub bot: bool,
    /// Stop after applying this many ticks (0 runs until interrupted).
    pub run_ticks: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            scheduler: SchedulerConfig::default(),
            snapshot_retry: Duration::from_secs(2),
            hello_retry: Duration::from_secs(1),
            server_timeout: Duration::from_secs(5),
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE,
            fake_ping_ms: 0,
            fake_jitter_ms: 0,
            bot: false,
            run_ticks: 0,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        if self.snapshot_retry.is_zero()
            || self.hello_retry.is_zero()
            || self.server_timeout.is_zero()
        {
            return Err(Error::Config("retry and server timeouts must be non-zero".to_string()));
        }
        if self.max_snapshot_size < DEFAULT_DATAGRAM_BUDGET {
            return Err(Error::Config(format!(
                "max snapshot size {} is smaller than one datagram",
                self.max_snapshot_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retry_rejected() {
        let config = ClientConfig {
            snapshot_retry: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_scheduler_settings_checked() {
        let mut config = ClientConfig::default();
        config.scheduler.capacity = 0;
        assert!(config.validate().is_err());
    }
}
