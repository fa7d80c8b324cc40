//! Shared bridge infrastructure for simgym
//!
//! This crate provides:
//! - Wire codec for action and state messages
//! - Channel abstraction (async `Channel` trait)
//! - TCP channel socket with background, timeout-bounded accept

pub mod protocol;
pub mod tcp;
pub mod transport;

pub use protocol::{
    ActionFrame, StateFrame, decode_action, decode_state, encode_action, encode_state,
};
pub use tcp::ChannelSocket;
pub use transport::{Channel, ChannelState};
