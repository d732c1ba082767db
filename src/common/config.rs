//! Protocol tunables.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```toml
//! window = 20
//! theta_threshold = 100
//! round_interval_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use super::error::ConfigError;
use crate::broadcast::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Flow-control window: own messages that may be outstanding at once.
    pub window: u64,
    /// A peer whose theta counter reaches this value is no longer trusted.
    pub theta_threshold: u64,
    pub round_interval_ms: u64,
    /// Sleep a random fraction of the round interval instead of the full interval.
    pub round_jitter: bool,
    pub heartbeat_interval_ms: u64,
    /// UDP port of process `id` is `base_port + id`.
    pub base_port: u16,
    /// HTTP port of process `id` is `base_port + api_port_offset + id`.
    pub api_port_offset: u16,
    pub max_datagram: usize,
    pub send_attempts: u32,
    pub send_backoff_ms: u64,
    /// How often a blocked broadcast re-checks the window when nothing wakes it.
    pub admission_poll_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            window: 10,
            theta_threshold: 10,
            round_interval_ms: 1000,
            round_jitter: false,
            heartbeat_interval_ms: 1000,
            base_port: 4000,
            api_port_offset: 1000,
            max_datagram: 65507,
            send_attempts: 10,
            send_backoff_ms: 10,
            admission_poll_ms: 10,
        }
    }
}

impl ProtocolConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    pub fn admission_poll(&self) -> Duration {
        Duration::from_millis(self.admission_poll_ms)
    }

    /// Delay before the next self-stabilization round.
    pub fn next_round_delay(&self) -> Duration {
        if self.round_jitter && self.round_interval_ms > 0 {
            let millis = rand::thread_rng().gen_range(0..self.round_interval_ms);
            Duration::from_millis(millis)
        } else {
            self.round_interval()
        }
    }

    /// Fails when `base_port + id` is not a valid port.
    pub fn udp_port(&self, id: ProcessId) -> Result<u16, ConfigError> {
        port_for(self.base_port, id)
    }

    pub fn api_port(&self, id: ProcessId) -> Result<u16, ConfigError> {
        let base = self
            .base_port
            .checked_add(self.api_port_offset)
            .ok_or(ConfigError::PortOutOfRange { id, base: self.base_port })?;
        port_for(base, id)
    }
}

fn port_for(base: u16, id: ProcessId) -> Result<u16, ConfigError> {
    u16::try_from(id)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .ok_or(ConfigError::PortOutOfRange { id, base })
}
