//! # simgym-env
//!
//! Step/reset environments backed by an external simulation process.
//!
//! This crate provides:
//! - `EpisodeCoordinator` driving channels and the simulation lifecycle
//! - `SimulationEngine` implementations: child process, attached, loopback
//! - `Environment` trait and the task-driven `SimEnv`
//! - `BlockingEnv` for synchronous callers

pub mod blocking;
pub mod coordinator;
pub mod engine;
pub mod env;
pub mod environment;
pub mod loopback;

pub use blocking::BlockingEnv;
pub use coordinator::{EpisodeCoordinator, EpisodePhase, StepOutcome};
pub use engine::{
    AttachedEngine, CommandConfig, CommandEngine, LaunchSpec, ProcessHandle, SimulationEngine,
};
pub use env::{SimEnv, Task};
pub use environment::{Environment, StepInfo, StepResult};
pub use loopback::{LoopbackConfig, LoopbackEngine};
