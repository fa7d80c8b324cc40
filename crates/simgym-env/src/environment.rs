//! Environment trait

use async_trait::async_trait;
use serde::Serialize;
use simgym_core::{Action, ActionSpace, ObservationSpace, Result};

/// Diagnostics returned alongside observations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepInfo {
    /// Simulation time of the observation in seconds
    pub simulation_time: f64,
    /// Steps taken in the current episode
    pub episode_step: u64,
}

/// Result of one environment step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub observation: Vec<f64>,
    pub reward: f64,
    /// A terminal condition was reached
    pub terminated: bool,
    /// The episode ended for another reason, e.g. the simulation stopped
    pub truncated: bool,
    pub info: StepInfo,
}

impl StepResult {
    /// Whether the episode is over for either reason
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Trait for reinforcement learning environments backed by a simulation
///
/// Episode ends are reported through `terminated` / `truncated`, never as
/// errors.
#[async_trait]
pub trait Environment: Send {
    /// Start a new episode
    async fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f64>, StepInfo)>;

    /// Apply one action and advance the simulation by one step
    async fn step(&mut self, action: &Action) -> Result<StepResult>;

    /// Stop the simulation and release all resources
    async fn close(&mut self);

    fn action_space(&self) -> &ActionSpace;

    fn observation_space(&self) -> ObservationSpace;

    /// Draw a random action from the action space
    fn sample_action(&mut self) -> Action;
}
