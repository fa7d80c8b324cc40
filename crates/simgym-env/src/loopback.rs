//! In-process simulation peer
//!
//! [`LoopbackEngine`] runs a first-order integrator as a spawned task that
//! speaks the simulation side of the wire protocol. It stands in for an
//! external simulation in tests and in the CLI's default mode.

use crate::engine::{LaunchSpec, ProcessHandle, SimulationEngine};
use async_trait::async_trait;
use simgym_bridge::protocol::MAX_FRAME_SIZE;
use simgym_bridge::{decode_action, encode_state};
use simgym_core::{InitialValueTarget, Result, SimGymError, SimulationParameters};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Model parameter holding the simulation end time in seconds
pub const STOP_TIME: &str = "StopTime";

/// Configuration of the loopback simulation
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Where the initial value of each state component is read from
    pub initial_state_targets: Vec<InitialValueTarget>,
    /// Number of action values per step
    pub action_len: usize,
    /// Simulated seconds per step
    pub step_size: f64,
    /// End time used when the run carries no `StopTime` parameter
    pub stop_time: f64,
    /// Send the initial state right after connecting
    pub send_initial_state: bool,
    pub connect_timeout: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            initial_state_targets: Vec::new(),
            action_len: 1,
            step_size: 0.1,
            stop_time: 10.0,
            send_initial_state: true,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Engine running [`LoopbackConfig`] simulations as Tokio tasks
///
/// Each state component integrates one action value per step,
/// `s[i] += step_size * a[i % action_len]`.
pub struct LoopbackEngine {
    config: LoopbackConfig,
}

impl LoopbackEngine {
    pub fn new(config: LoopbackConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SimulationEngine for LoopbackEngine {
    async fn start(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        if !(self.config.step_size > 0.0) {
            return Err(SimGymError::ConfigError(format!(
                "Loopback step size must be positive, got {}",
                self.config.step_size
            )));
        }
        let task = tokio::spawn(run(self.config.clone(), spec.clone()));
        Ok(Box::new(LoopbackHandle { task: Some(task) }))
    }
}

struct LoopbackHandle {
    task: Option<JoinHandle<Result<()>>>,
}

#[async_trait]
impl ProcessHandle for LoopbackHandle {
    fn is_running(&mut self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| SimGymError::IpcError(format!("Loopback simulation failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for LoopbackHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| SimGymError::IpcError(format!("Connection timeout to {}", addr)))?
        .map_err(|e| SimGymError::IpcError(format!("Failed to connect to {}: {}", addr, e)))?;
    stream
        .set_nodelay(true)
        .map_err(|e| SimGymError::IpcError(format!("Failed to set TCP_NODELAY: {}", e)))?;
    Ok(stream)
}

async fn write_state(stream: &mut TcpStream, state: &[f64], time: f64) -> Result<()> {
    stream
        .write_all(&encode_state(state, time))
        .await
        .map_err(|e| SimGymError::IpcError(format!("Failed to send state: {}", e)))
}

fn initial_value(parameters: &SimulationParameters, target: &InitialValueTarget) -> f64 {
    match target {
        InitialValueTarget::Block(path) => parameters.block_parameter(path),
        InitialValueTarget::Workspace(name) => parameters.workspace_variable(name),
        InitialValueTarget::Unset => None,
    }
    .unwrap_or(0.0)
}

async fn run(config: LoopbackConfig, spec: LaunchSpec) -> Result<()> {
    // Action channel first, the order a model opens its receive block in
    let mut actions = connect(spec.action_addr, config.connect_timeout).await?;
    let mut states = connect(spec.state_addr, config.connect_timeout).await?;

    let mut state: Vec<f64> = config
        .initial_state_targets
        .iter()
        .map(|target| initial_value(&spec.parameters, target))
        .collect();
    let stop_time = spec
        .parameters
        .model_parameter(STOP_TIME)
        .unwrap_or(config.stop_time);
    let max_steps = (stop_time / config.step_size).round().max(0.0) as u64;
    info!(
        "Loopback simulation running until t={} ({} steps)",
        stop_time, max_steps
    );

    if config.send_initial_state {
        write_state(&mut states, &state, 0.0).await?;
    }

    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut step = 0u64;
    let result = loop {
        let n = match actions.read(&mut buf).await {
            Ok(0) => {
                debug!("Action channel closed");
                break Ok(());
            }
            Ok(n) => n,
            Err(e) => break Err(SimGymError::IpcError(format!("Failed to read action: {}", e))),
        };
        let frame = match decode_action(&buf[..n], config.action_len) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Loopback simulation received malformed action: {}", e);
                break Err(e);
            }
        };
        if frame.stop {
            debug!("Stop signal received at step {}", step);
            break Ok(());
        }

        step += 1;
        if step > max_steps {
            debug!("Reached stop time {}", stop_time);
            break Ok(());
        }
        if !frame.values.is_empty() {
            for (i, value) in state.iter_mut().enumerate() {
                *value += config.step_size * frame.values[i % frame.values.len()];
            }
        }
        if let Err(e) = write_state(&mut states, &state, step as f64 * config.step_size).await {
            break Err(e);
        }
    };

    // Closing the state channel is the end-of-episode message
    let _ = states.shutdown().await;
    let _ = actions.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{EpisodeCoordinator, EpisodePhase};
    use simgym_core::EnvConfig;

    const X0: &str = "integrator/x/InitialCondition";
    const Y0: &str = "y0";

    fn coordinator() -> EpisodeCoordinator {
        let config = EnvConfig {
            accept_timeout: Duration::from_secs(5),
            ..EnvConfig::ephemeral()
        };
        let engine = LoopbackEngine::new(LoopbackConfig {
            initial_state_targets: vec![
                InitialValueTarget::block(X0),
                InitialValueTarget::workspace(Y0),
            ],
            ..Default::default()
        });
        EpisodeCoordinator::new(config, Box::new(engine), 2, 1)
    }

    fn parameters(stop_time: f64) -> SimulationParameters {
        let mut params = SimulationParameters::new();
        params
            .set_model_parameter(STOP_TIME, stop_time)
            .set_block_parameter(X0, 1.0);
        params
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    #[tokio::test]
    async fn test_episode_runs_until_stop_time() {
        let mut coordinator = coordinator();
        let outcome = coordinator.reset(parameters(0.3), vec![1.0, 0.0]).await.unwrap();
        assert_eq!(outcome.state, vec![1.0, 0.0]);
        assert_eq!(outcome.timestamp, 0.0);

        for _ in 0..3 {
            let outcome = coordinator.step(&[1.0]).await.unwrap();
            assert!(!outcome.truncated);
        }
        assert_close(coordinator.state(), &[1.3, 0.3]);
        assert!((coordinator.timestamp() - 0.3).abs() < 1e-9);

        let outcome = coordinator.step(&[1.0]).await.unwrap();
        assert!(outcome.truncated);
        assert!(!outcome.terminated);
        assert_close(&outcome.state, &[1.3, 0.3]);
        assert_eq!(coordinator.phase(), EpisodePhase::Ended);

        coordinator.close().await;
        assert_eq!(coordinator.phase(), EpisodePhase::Idle);
    }

    #[test]
    fn test_initial_value_lookup() {
        let mut params = SimulationParameters::new();
        params
            .set_block_parameter(X0, 1.5)
            .set_workspace_variable(Y0, -2.0);
        assert_eq!(initial_value(&params, &InitialValueTarget::block(X0)), 1.5);
        assert_eq!(initial_value(&params, &InitialValueTarget::workspace(Y0)), -2.0);
        // Same name, other namespace
        assert_eq!(initial_value(&params, &InitialValueTarget::block(Y0)), 0.0);
        assert_eq!(initial_value(&params, &InitialValueTarget::Unset), 0.0);
    }

    #[tokio::test]
    async fn test_workspace_initial_value_reaches_simulation() {
        let mut coordinator = coordinator();
        let mut params = parameters(10.0);
        params.set_workspace_variable(Y0, -0.5);
        let outcome = coordinator.reset(params, vec![0.0, 0.0]).await.unwrap();
        assert_eq!(outcome.state, vec![1.0, -0.5]);
        coordinator.close().await;
    }

    #[tokio::test]
    async fn test_reset_twice_and_close_twice() {
        let mut coordinator = coordinator();
        coordinator.reset(parameters(10.0), vec![1.0, 0.0]).await.unwrap();
        coordinator.step(&[-1.0]).await.unwrap();
        assert!(coordinator.simulation_active());

        let outcome = coordinator.reset(parameters(10.0), vec![1.0, 0.0]).await.unwrap();
        assert_eq!(outcome.state, vec![1.0, 0.0]);
        assert!(!outcome.truncated);
        assert_eq!(coordinator.episode(), 2);

        let outcome = coordinator.step(&[2.0]).await.unwrap();
        assert_close(&outcome.state, &[1.2, 0.2]);

        coordinator.close().await;
        assert!(!coordinator.simulation_active());
        let second = tokio::time::timeout(Duration::from_secs(1), coordinator.close()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_step_size() {
        let mut engine = LoopbackEngine::new(LoopbackConfig {
            step_size: 0.0,
            ..Default::default()
        });
        let spec = LaunchSpec {
            parameters: SimulationParameters::new(),
            action_addr: "127.0.0.1:1".parse().unwrap(),
            state_addr: "127.0.0.1:2".parse().unwrap(),
        };
        assert!(matches!(
            engine.start(&spec).await,
            Err(SimGymError::ConfigError(_))
        ));
    }
}
