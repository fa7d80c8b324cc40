//! Error types for simgym

use std::time::Duration;
use thiserror::Error;

/// Result type for simgym operations
pub type Result<T> = std::result::Result<T, SimGymError>;

/// simgym error types
#[derive(Debug, Error)]
pub enum SimGymError {
    /// Operation attempted on a channel without an established peer
    #[error("Channel not connected: {0}")]
    NotConnected(String),

    /// No peer connected within the accept window
    #[error("No connection on {channel} within {timeout:?}")]
    ConnectTimeout { channel: String, timeout: Duration },

    /// Inbound message length inconsistent with the declared observation count
    #[error("Protocol length mismatch: expected {expected} bytes, got {actual}")]
    ProtocolLengthMismatch { expected: usize, actual: usize },

    /// Caller-supplied action does not fit the declared action space
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Observation value outside its declared bounds
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    /// External simulation could not be started
    #[error("Unable to start simulation after {attempts} attempts: {reason}")]
    EngineStartFailure { attempts: u32, reason: String },

    /// Socket or process communication error
    #[error("IPC error: {0}")]
    IpcError(String),

    /// Configuration error
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for SimGymError {
    fn from(err: serde_json::Error) -> Self {
        SimGymError::ConfigError(err.to_string())
    }
}

impl SimGymError {
    /// Whether this error marks the end of an episode rather than a caller defect.
    ///
    /// These are absorbed into the `truncated` flag during steady-state stepping.
    pub fn ends_episode(&self) -> bool {
        matches!(
            self,
            SimGymError::NotConnected(_)
                | SimGymError::ProtocolLengthMismatch { .. }
                | SimGymError::IpcError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_ending_classification() {
        assert!(SimGymError::NotConnected("recv".into()).ends_episode());
        assert!(
            SimGymError::ProtocolLengthMismatch {
                expected: 16,
                actual: 8
            }
            .ends_episode()
        );
        assert!(!SimGymError::InvalidAction("shape".into()).ends_episode());
        assert!(
            !SimGymError::EngineStartFailure {
                attempts: 3,
                reason: "rejected".into()
            }
            .ends_episode()
        );
    }

    #[test]
    fn test_messages() {
        let err = SimGymError::ConnectTimeout {
            channel: "recv_socket".into(),
            timeout: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "No connection on recv_socket within 300s");

        let err = SimGymError::EngineStartFailure {
            attempts: 3,
            reason: "license server unreachable".into(),
        };
        assert!(err.to_string().starts_with("Unable to start simulation after 3 attempts"));
    }
}
