//! # simgym-core
//!
//! Core types shared by all simgym crates:
//! - Error taxonomy
//! - Action spaces and bounded observations
//! - Environment configuration
//! - Parameters injected into a simulation run

pub mod action;
pub mod config;
pub mod error;
pub mod observation;
pub mod params;

pub use action::{Action, ActionSpace};
pub use config::EnvConfig;
pub use error::{Result, SimGymError};
pub use observation::{InitialValueTarget, Observation, ObservationSpace, Observations};
pub use params::{BlockParam, SimulationParameters};
