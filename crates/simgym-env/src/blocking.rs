//! Synchronous adapter for callers outside async code

use crate::environment::{Environment, StepInfo, StepResult};
use simgym_core::{Action, ActionSpace, ObservationSpace, Result, SimGymError};
use tokio::runtime::{Builder, Runtime};

/// Runs an [`Environment`] on its own Tokio runtime
///
/// Dropping the adapter closes the environment, so it must not be dropped
/// from within async code.
pub struct BlockingEnv<E: Environment> {
    runtime: Runtime,
    env: E,
}

impl<E: Environment> BlockingEnv<E> {
    pub fn new(env: E) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| SimGymError::IpcError(format!("Failed to build runtime: {}", e)))?;
        Ok(Self { runtime, env })
    }

    pub fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f64>, StepInfo)> {
        self.runtime.block_on(self.env.reset(seed))
    }

    pub fn step(&mut self, action: &Action) -> Result<StepResult> {
        self.runtime.block_on(self.env.step(action))
    }

    pub fn close(&mut self) {
        self.runtime.block_on(self.env.close());
    }

    pub fn action_space(&self) -> &ActionSpace {
        self.env.action_space()
    }

    pub fn observation_space(&self) -> ObservationSpace {
        self.env.observation_space()
    }

    pub fn sample_action(&mut self) -> Action {
        self.env.sample_action()
    }

    pub fn get_ref(&self) -> &E {
        &self.env
    }
}

impl<E: Environment> Drop for BlockingEnv<E> {
    fn drop(&mut self) {
        self.runtime.block_on(self.env.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::EpisodePhase;
    use crate::env::{SimEnv, Task};
    use crate::loopback::{LoopbackConfig, LoopbackEngine};
    use simgym_core::{EnvConfig, InitialValueTarget, Observation, Observations};
    use std::time::Duration;

    const COUNT: &str = "counter/count/InitialCondition";

    struct Counter {
        space: ActionSpace,
        observations: Observations,
    }

    impl Task for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn action_space(&self) -> &ActionSpace {
            &self.space
        }

        fn observations(&self) -> &Observations {
            &self.observations
        }

        fn evaluate(&self, _state: &[f64], _action: &Action) -> (f64, bool) {
            (1.0, false)
        }
    }

    fn blocking_env() -> BlockingEnv<SimEnv<Counter>> {
        let config = EnvConfig {
            accept_timeout: Duration::from_secs(5),
            ..EnvConfig::ephemeral()
        };
        let engine = LoopbackEngine::new(LoopbackConfig {
            initial_state_targets: vec![InitialValueTarget::block(COUNT)],
            step_size: 1.0,
            stop_time: 2.0,
            ..Default::default()
        });
        let task = Counter {
            space: ActionSpace::Discrete { n: 3 },
            observations: Observations::new(vec![
                Observation::new("count", 0.0, f64::INFINITY, InitialValueTarget::block(COUNT))
                    .with_initial_value(0.0)
                    .unwrap(),
            ]),
        };
        BlockingEnv::new(SimEnv::new(config, Box::new(engine), task)).unwrap()
    }

    #[test]
    fn test_blocking_episode() {
        let mut env = blocking_env();
        let (observation, _) = env.reset(Some(3)).unwrap();
        assert_eq!(observation, vec![0.0]);

        let result = env.step(&Action::Discrete(2)).unwrap();
        assert_eq!(result.observation, vec![2.0]);
        assert_eq!(result.info.simulation_time, 1.0);
        let result = env.step(&Action::Discrete(1)).unwrap();
        assert_eq!(result.observation, vec![3.0]);
        assert!(!result.done());

        // Stop time reached
        let result = env.step(&Action::Discrete(1)).unwrap();
        assert!(result.truncated);
        assert_eq!(result.observation, vec![3.0]);

        env.close();
        env.close();
    }

    #[test]
    fn test_drop_closes() {
        let mut env = blocking_env();
        env.reset(None).unwrap();
        assert_eq!(env.get_ref().coordinator().phase(), EpisodePhase::Running);
        drop(env);
    }
}
