//! Simulation engine collaborator
//!
//! The coordinator never launches a simulation itself. It asks a
//! [`SimulationEngine`] to start one run per episode and keeps the returned
//! [`ProcessHandle`] to query and join it.

use async_trait::async_trait;
use simgym_core::{Result, SimGymError, SimulationParameters};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Environment variable carrying the action channel address to a launched simulation
pub const ACTION_ADDR_ENV: &str = "SIMGYM_ACTION_ADDR";
/// Environment variable carrying the state channel address to a launched simulation
pub const STATE_ADDR_ENV: &str = "SIMGYM_STATE_ADDR";

/// Everything needed to start one simulation run
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Parameters injected into the run
    pub parameters: SimulationParameters,
    /// Where the simulation reads actions from
    pub action_addr: SocketAddr,
    /// Where the simulation writes states to
    pub state_addr: SocketAddr,
}

/// Starts simulation runs
#[async_trait]
pub trait SimulationEngine: Send {
    /// Start one run; the run connects to both channels on its own
    async fn start(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// Handle to one running simulation
#[async_trait]
pub trait ProcessHandle: Send {
    /// Whether the run is still active
    fn is_running(&mut self) -> bool;

    /// Wait for the run to finish
    async fn join(&mut self) -> Result<()>;
}

/// Configuration for launching an external simulation program
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Program to run
    pub program: PathBuf,
    /// Fixed arguments, placed before the parameter arguments
    pub args: Vec<String>,
    /// Working directory (default: inherited)
    pub working_dir: Option<PathBuf>,
    /// Time the program gets to exit after the stop message before it is killed
    pub shutdown_grace: Duration,
}

impl CommandConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Launches the simulation as a child process
///
/// The program receives the channel addresses in [`ACTION_ADDR_ENV`] and
/// [`STATE_ADDR_ENV`], and the parameters as `--model NAME=VALUE`,
/// `--workspace NAME=VALUE` and `--block PATH=VALUE` arguments.
pub struct CommandEngine {
    config: CommandConfig,
}

impl CommandEngine {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

/// Command-line arguments carrying the simulation parameters
pub fn parameter_args(parameters: &SimulationParameters) -> Vec<String> {
    let mut args = Vec::new();
    for (name, value) in &parameters.model {
        args.push("--model".to_string());
        args.push(format!("{}={}", name, value));
    }
    for (name, value) in &parameters.workspace {
        args.push("--workspace".to_string());
        args.push(format!("{}={}", name, value));
    }
    for param in &parameters.blocks {
        args.push("--block".to_string());
        args.push(format!("{}={}", param.path, param.value));
    }
    args
}

#[async_trait]
impl SimulationEngine for CommandEngine {
    async fn start(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .args(parameter_args(&spec.parameters))
            .env(ACTION_ADDR_ENV, spec.action_addr.to_string())
            .env(STATE_ADDR_ENV, spec.state_addr.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            SimGymError::IpcError(format!(
                "Failed to spawn {}: {}",
                self.config.program.display(),
                e
            ))
        })?;
        info!(
            "Started simulation {} (pid {:?})",
            self.config.program.display(),
            child.id()
        );

        Ok(Box::new(ChildHandle {
            child,
            shutdown_grace: self.config.shutdown_grace,
        }))
    }
}

struct ChildHandle {
    child: Child,
    shutdown_grace: Duration,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn join(&mut self) -> Result<()> {
        match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!("Simulation exited with {}", status);
                Ok(())
            }
            Ok(Ok(status)) => Err(SimGymError::IpcError(format!(
                "Simulation exited with {}",
                status
            ))),
            Ok(Err(e)) => Err(SimGymError::IpcError(format!(
                "Failed to wait for simulation: {}",
                e
            ))),
            Err(_) => {
                warn!(
                    "Simulation still running {:?} after stop, killing it",
                    self.shutdown_grace
                );
                self.child
                    .kill()
                    .await
                    .map_err(|e| SimGymError::IpcError(format!("Failed to kill simulation: {}", e)))
            }
        }
    }
}

/// Engine for a simulation started by hand, e.g. while debugging a model
///
/// Starting only logs where the simulation should connect; the handle
/// always reports running and joining returns immediately.
#[derive(Debug, Default)]
pub struct AttachedEngine;

#[async_trait]
impl SimulationEngine for AttachedEngine {
    async fn start(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        info!(
            "Waiting for simulation to connect (actions: {}, states: {})",
            spec.action_addr, spec.state_addr
        );
        Ok(Box::new(AttachedHandle))
    }
}

struct AttachedHandle;

#[async_trait]
impl ProcessHandle for AttachedHandle {
    fn is_running(&mut self) -> bool {
        true
    }

    async fn join(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn spec() -> LaunchSpec {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        LaunchSpec {
            parameters: SimulationParameters::default(),
            action_addr: SocketAddr::new(localhost, 42313),
            state_addr: SocketAddr::new(localhost, 42312),
        }
    }

    #[test]
    fn test_parameter_args() {
        let mut params = SimulationParameters::new();
        params
            .set_model_parameter("StopTime", 30.0)
            .set_workspace_variable("g", 9.81)
            .set_block_parameter("cartpole/Integrator_theta/InitialCondition", 0.05);
        assert_eq!(
            parameter_args(&params),
            vec![
                "--model",
                "StopTime=30",
                "--workspace",
                "g=9.81",
                "--block",
                "cartpole/Integrator_theta/InitialCondition=0.05",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut engine = CommandEngine::new(CommandConfig::new("/nonexistent/simgym-simulation"));
        let result = engine.start(&spec()).await;
        assert!(matches!(result, Err(SimGymError::IpcError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_receives_addresses() {
        let mut config = CommandConfig::new("sh");
        config.args = vec![
            "-c".into(),
            format!(
                "test \"${}\" = 127.0.0.1:42313 && test \"${}\" = 127.0.0.1:42312",
                ACTION_ADDR_ENV, STATE_ADDR_ENV
            ),
        ];
        let mut engine = CommandEngine::new(config);
        let mut handle = engine.start(&spec()).await.unwrap();
        handle.join().await.unwrap();
        assert!(!handle.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_status_is_reported() {
        let mut config = CommandConfig::new("sh");
        config.args = vec!["-c".into(), "exit 3".into()];
        let mut handle = CommandEngine::new(config).start(&spec()).await.unwrap();
        assert!(matches!(handle.join().await, Err(SimGymError::IpcError(_))));
    }

    #[tokio::test]
    async fn test_attached_handle() {
        let mut handle = AttachedEngine.start(&spec()).await.unwrap();
        assert!(handle.is_running());
        handle.join().await.unwrap();
    }
}
