//! Environment configuration

use crate::error::{Result, SimGymError};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Default port of the channel carrying actions to the simulation
pub const DEFAULT_ACTION_PORT: u16 = 42313;
/// Default port of the channel carrying states from the simulation
pub const DEFAULT_STATE_PORT: u16 = 42312;
/// Default accept window for the simulation to connect
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default number of attempts to start the simulation
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Configuration of the communication with the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Address to listen on (default: 127.0.0.1)
    pub host: IpAddr,
    /// Port for the action channel (default: 42313)
    pub action_port: u16,
    /// Port for the state channel (default: 42312)
    pub state_port: u16,
    /// Accept window per channel and episode
    #[serde(with = "secs")]
    pub accept_timeout: Duration,
    /// Attempts to start the simulation before giving up
    pub start_attempts: u32,
    /// Bound on draining the reply to a stop message
    #[serde(with = "secs")]
    pub drain_timeout: Duration,
    /// Wait for the simulation to send its initial state after connecting
    pub receive_initial_state: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            action_port: DEFAULT_ACTION_PORT,
            state_port: DEFAULT_STATE_PORT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            start_attempts: DEFAULT_START_ATTEMPTS,
            drain_timeout: Duration::from_secs(10),
            receive_initial_state: true,
        }
    }
}

impl EnvConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimGymError::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: EnvConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config listening on OS-assigned ports, used by tests and loopback runs
    pub fn ephemeral() -> Self {
        Self {
            action_port: 0,
            state_port: 0,
            ..Default::default()
        }
    }

    pub fn action_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.action_port)
    }

    pub fn state_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.state_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.action_port != 0 && self.action_port == self.state_port {
            return Err(SimGymError::ConfigError(format!(
                "action and state channels share port {}",
                self.action_port
            )));
        }
        if self.start_attempts == 0 {
            return Err(SimGymError::ConfigError(
                "start_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Durations as fractional seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnvConfig::default();
        assert_eq!(config.action_addr().to_string(), "127.0.0.1:42313");
        assert_eq!(config.state_addr().to_string(), "127.0.0.1:42312");
        assert_eq!(config.accept_timeout, Duration::from_secs(300));
        assert_eq!(config.start_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{"action_port": 5000, "state_port": 5001, "accept_timeout": 2.5}"#;
        let config: EnvConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.action_port, 5000);
        assert_eq!(config.accept_timeout, Duration::from_millis(2500));
        assert_eq!(config.start_attempts, DEFAULT_START_ATTEMPTS);
        assert!(config.receive_initial_state);
    }

    #[test]
    fn test_validate_rejects_shared_port() {
        let config = EnvConfig {
            action_port: 4000,
            state_port: 4000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimGymError::ConfigError(_))));
        assert!(EnvConfig::ephemeral().validate().is_ok());
    }
}
