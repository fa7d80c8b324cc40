//! Wire protocol for Rust <-> simulation communication
//!
//! Both directions carry bare arrays of little-endian IEEE-754 doubles. There
//! is no length prefix: a message is whatever a single `send` wrote, so the
//! simulation must write each message in one call.
//!
//! ```text
//! action (Rust -> sim):  [stop_flag, a_0, .., a_{k-1}]
//! state  (sim -> Rust):  [s_0, .., s_{n-1}, t]
//! ```
//!
//! An empty state message signals the end of the episode.

use simgym_core::{Result, SimGymError};

/// Size of one value on the wire
pub const DOUBLE_SIZE: usize = 8;

/// Largest message read in one receive
pub const MAX_FRAME_SIZE: usize = 2048;

/// A decoded state message
#[derive(Debug, Clone, PartialEq)]
pub enum StateFrame {
    /// Regular state update
    State {
        observations: Vec<f64>,
        /// Simulation time in seconds
        timestamp: f64,
    },
    /// Empty message: the simulation ended the episode
    EpisodeEnded,
}

/// A decoded action message, as seen by the simulation
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFrame {
    pub stop: bool,
    pub values: Vec<f64>,
}

/// Encode an action message
pub fn encode_action(stop: bool, values: &[f64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity((values.len() + 1) * DOUBLE_SIZE);
    buf.extend_from_slice(&(if stop { 1.0f64 } else { 0.0 }).to_le_bytes());
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode a state message carrying `observation_count` observations plus the timestamp
pub fn decode_state(bytes: &[u8], observation_count: usize) -> Result<StateFrame> {
    if bytes.is_empty() {
        return Ok(StateFrame::EpisodeEnded);
    }

    let mut values = decode_doubles(bytes, observation_count.saturating_add(1))?;
    // Timestamp is the last entry
    let timestamp = values.pop().unwrap_or_default();
    Ok(StateFrame::State {
        observations: values,
        timestamp,
    })
}

/// Encode a state message (simulation side)
pub fn encode_state(observations: &[f64], timestamp: f64) -> Vec<u8> {
    let mut buf = Vec::with_capacity((observations.len() + 1) * DOUBLE_SIZE);
    for value in observations.iter().chain(std::iter::once(&timestamp)) {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode an action message carrying `action_len` values after the stop flag (simulation side)
pub fn decode_action(bytes: &[u8], action_len: usize) -> Result<ActionFrame> {
    let values = decode_doubles(bytes, action_len.saturating_add(1))?;
    Ok(ActionFrame {
        stop: values[0] != 0.0,
        values: values[1..].to_vec(),
    })
}

fn decode_doubles(bytes: &[u8], count: usize) -> Result<Vec<f64>> {
    // Saturates for absurd counts; no buffer is that long
    let expected = count.saturating_mul(DOUBLE_SIZE);
    if bytes.len() != expected {
        return Err(SimGymError::ProtocolLengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    Ok(bytes
        .chunks_exact(DOUBLE_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; DOUBLE_SIZE];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}
