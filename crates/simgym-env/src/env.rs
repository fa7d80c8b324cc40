//! Task-driven environment on top of [`EpisodeCoordinator`]

use crate::coordinator::EpisodeCoordinator;
use crate::engine::SimulationEngine;
use crate::environment::{Environment, StepInfo, StepResult};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use simgym_bridge::{Channel, ChannelSocket};
use simgym_core::{
    Action, ActionSpace, EnvConfig, InitialValueTarget, ObservationSpace, Observations, Result,
    SimulationParameters,
};
use tracing::debug;

/// Environment-specific shaping of a simulation
///
/// A task declares the action space and observations of one model and
/// decides reward and termination. The simulation itself only integrates.
pub trait Task: Send {
    fn name(&self) -> &str;

    fn action_space(&self) -> &ActionSpace;

    fn observations(&self) -> &Observations;

    /// Parameters injected into every run, before the observation initial values
    fn parameters(&self) -> SimulationParameters {
        SimulationParameters::new()
    }

    /// Called at the start of every reset, e.g. to resample initial values
    fn on_reset(&mut self, _rng: &mut StdRng) {}

    /// Reward for reaching `state` with `action`, and whether `state` is terminal
    fn evaluate(&self, state: &[f64], action: &Action) -> (f64, bool);
}

/// [`Environment`] driving a simulation through a [`Task`]
pub struct SimEnv<T: Task, C: Channel = ChannelSocket> {
    task: T,
    coordinator: EpisodeCoordinator<C>,
    rng: StdRng,
    episode_step: u64,
}

impl<T: Task> SimEnv<T> {
    /// Create an environment communicating over TCP as configured
    pub fn new(config: EnvConfig, engine: Box<dyn SimulationEngine>, task: T) -> Self {
        let coordinator = EpisodeCoordinator::new(
            config,
            engine,
            task.observations().len(),
            task.action_space().size(),
        );
        Self::with_coordinator(coordinator, task)
    }
}

impl<T: Task, C: Channel> SimEnv<T, C> {
    pub fn with_coordinator(coordinator: EpisodeCoordinator<C>, task: T) -> Self {
        Self {
            task,
            coordinator,
            rng: StdRng::from_entropy(),
            episode_step: 0,
        }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    pub fn coordinator(&self) -> &EpisodeCoordinator<C> {
        &self.coordinator
    }

    /// Stop the running simulation without closing the channels
    pub async fn stop_simulation(&mut self) {
        self.coordinator.stop_simulation().await;
    }

    fn run_parameters(&self) -> SimulationParameters {
        let mut parameters = self.task.parameters();
        for observation in self.task.observations() {
            let value = observation.initial_value();
            match &observation.target {
                InitialValueTarget::Block(path) => {
                    parameters.set_block_parameter(path.clone(), value);
                }
                InitialValueTarget::Workspace(name) => {
                    parameters.set_workspace_variable(name.clone(), value);
                }
                InitialValueTarget::Unset => {}
            }
        }
        parameters
    }
}

#[async_trait]
impl<T: Task, C: Channel> Environment for SimEnv<T, C> {
    async fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f64>, StepInfo)> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.task.on_reset(&mut self.rng);

        let parameters = self.run_parameters();
        let initial_state = self.task.observations().initial_state();
        debug!("{}: reset with {:?}", self.task.name(), initial_state);

        let outcome = self.coordinator.reset(parameters, initial_state).await?;
        self.episode_step = 0;
        Ok((
            outcome.state,
            StepInfo {
                simulation_time: outcome.timestamp,
                episode_step: 0,
            },
        ))
    }

    async fn step(&mut self, action: &Action) -> Result<StepResult> {
        let values = self.task.action_space().to_vector(action)?;
        let outcome = self.coordinator.step(&values).await?;
        self.episode_step += 1;

        let (reward, terminal) = self.task.evaluate(&outcome.state, action);
        if terminal {
            self.coordinator.mark_terminated();
        }

        Ok(StepResult {
            observation: outcome.state,
            reward,
            terminated: terminal || outcome.terminated,
            truncated: outcome.truncated,
            info: StepInfo {
                simulation_time: outcome.timestamp,
                episode_step: self.episode_step,
            },
        })
    }

    async fn close(&mut self) {
        self.coordinator.close().await;
    }

    fn action_space(&self) -> &ActionSpace {
        self.task.action_space()
    }

    fn observation_space(&self) -> ObservationSpace {
        self.task.observations().space()
    }

    fn sample_action(&mut self) -> Action {
        self.task.action_space().sample(&mut self.rng)
    }
}
