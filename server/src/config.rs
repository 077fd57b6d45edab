//! Server configuration

use shared::step::StepLayout;
use shared::protocol::SNAPSHOT_HEADER_LEN;
use shared::transport::{Fragmenter, DEFAULT_DATAGRAM_BUDGET, MIN_DATAGRAM_BUDGET};
use shared::{
    Error, Result, DEFAULT_MAX_PLAYERS, DEFAULT_MAX_RARE_ACTIONS, DEFAULT_MAX_SNAPSHOT_SIZE,
    DEFAULT_TICK_RATE,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Ticks per second.
    pub tick_rate: u16,
    /// Player slots (N).
    pub max_players: usize,
    /// Rare actions per tick (K).
    pub max_rare_actions: usize,
    /// Largest snapshot envelope the server will produce.
    pub max_snapshot_size: usize,
    /// Largest datagram sent without fragmenting.
    pub datagram_budget: usize,
    /// Silence after which the transport drops a connection.
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            max_players: DEFAULT_MAX_PLAYERS,
            max_rare_actions: DEFAULT_MAX_RARE_ACTIONS,
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE,
            datagram_budget: DEFAULT_DATAGRAM_BUDGET,
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.tick_rate.max(1) as u64)
    }

    pub fn layout(&self) -> StepLayout {
        StepLayout::new(self.max_players, self.max_rare_actions)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(Error::Config(format!(
                "tick rate {} Hz is outside 1..=1000",
                self.tick_rate
            )));
        }
        if self.max_players == 0 || self.max_players > u8::MAX as usize {
            return Err(Error::Config(format!(
                "max players {} is outside 1..=255",
                self.max_players
            )));
        }
        if self.max_rare_actions == 0 || self.max_rare_actions > u8::MAX as usize {
            return Err(Error::Config(format!(
                "max rare actions {} is outside 1..=255",
                self.max_rare_actions
            )));
        }
        if self.datagram_budget < MIN_DATAGRAM_BUDGET {
            return Err(Error::Config(format!(
                "datagram budget {} is below the minimum of {}",
                self.datagram_budget, MIN_DATAGRAM_BUDGET
            )));
        }
        let step_len = 1 + self.layout().encoded_len(self.max_rare_actions);
        if step_len >= self.datagram_budget {
            return Err(Error::Config(format!(
                "a full step message ({} bytes) does not fit the datagram budget of {}",
                step_len, self.datagram_budget
            )));
        }
        if self.client_timeout.is_zero() {
            return Err(Error::Config("client timeout must be non-zero".to_string()));
        }
        let fragment_limit = Fragmenter::new(self.datagram_budget).max_message_len();
        if self.max_snapshot_size + SNAPSHOT_HEADER_LEN > fragment_limit {
            return Err(Error::Config(format!(
                "max snapshot size {} exceeds what {} byte datagrams can carry ({})",
                self.max_snapshot_size, self.datagram_budget, fragment_limit
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
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_rare_actions, 4);
        assert_eq!(config.layout(), StepLayout::new(8, 4));
    }

    #[test]
    fn test_tick_duration() {
        let config = ServerConfig {
            tick_rate: 20,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let bad = [
            ServerConfig {
                tick_rate: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                max_players: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                max_players: 300,
                ..ServerConfig::default()
            },
            ServerConfig {
                max_rare_actions: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                datagram_budget: 4,
                ..ServerConfig::default()
            },
            ServerConfig {
                client_timeout: Duration::ZERO,
                ..ServerConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_step_must_fit_one_datagram() {
        let config = ServerConfig {
            max_players: 255,
            datagram_budget: 64,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_largest_snapshot_message_must_fit_fragments() {
        let limit = Fragmenter::new(DEFAULT_DATAGRAM_BUDGET).max_message_len();
        let at_limit = ServerConfig {
            max_snapshot_size: limit - SNAPSHOT_HEADER_LEN,
            ..ServerConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        let envelope_at_limit = ServerConfig {
            max_snapshot_size: limit,
            ..ServerConfig::default()
        };
        assert!(matches!(
            envelope_at_limit.validate(),
            Err(Error::Config(_))
        ));
    }
}
