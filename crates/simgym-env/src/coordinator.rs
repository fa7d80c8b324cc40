//! Episode coordination
//!
//! [`EpisodeCoordinator`] owns both channels and the handle of the running
//! simulation. It opens a fresh pair of channels for every episode, starts
//! the simulation, joins both accepts and then exchanges actions and states
//! in strict lock-step: one state reply per action.
//!
//! ```text
//! Idle --reset--> Opening --connected--> Running --empty/invalid reply--> Ended
//!   ^                                       |                              |
//!   +---------------- close ----------------+------------------------------+
//! ```
//!
//! Ordinary episode ends (the simulation stopping, a dropped connection, a
//! malformed reply) never surface as errors. They set `truncated` and move
//! the coordinator to [`EpisodePhase::Ended`].

use crate::engine::{LaunchSpec, ProcessHandle, SimulationEngine};
use simgym_bridge::{Channel, ChannelSocket, StateFrame, decode_state, encode_action};
use simgym_core::{EnvConfig, Result, SimGymError, SimulationParameters};
use tracing::{debug, error, info, warn};

/// Phase of the episode lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    /// No episode; channels closed
    Idle,
    /// Channels opened, waiting for the simulation to connect
    Opening,
    /// Exchanging actions and states
    Running,
    /// The simulation ended the episode; waiting for reset or close
    Ended,
}

/// State after a reset or step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Last known simulation state
    pub state: Vec<f64>,
    /// Simulation time of `state` in seconds
    pub timestamp: f64,
    pub terminated: bool,
    pub truncated: bool,
}

/// Drives the channel and simulation lifecycle of one environment
pub struct EpisodeCoordinator<C: Channel = ChannelSocket> {
    config: EnvConfig,
    action_channel: C,
    state_channel: C,
    engine: Box<dyn SimulationEngine>,
    process: Option<Box<dyn ProcessHandle>>,
    phase: EpisodePhase,
    observation_count: usize,
    action_len: usize,
    state: Vec<f64>,
    timestamp: f64,
    terminated: bool,
    truncated: bool,
    episode: u64,
}

impl EpisodeCoordinator<ChannelSocket> {
    /// Create a coordinator listening on the addresses from `config`
    pub fn new(
        config: EnvConfig,
        engine: Box<dyn SimulationEngine>,
        observation_count: usize,
        action_len: usize,
    ) -> Self {
        let action_channel = ChannelSocket::new("send_socket", config.action_addr());
        let state_channel = ChannelSocket::new("recv_socket", config.state_addr());
        Self::with_channels(
            config,
            action_channel,
            state_channel,
            engine,
            observation_count,
            action_len,
        )
    }
}

impl<C: Channel> EpisodeCoordinator<C> {
    /// Create a coordinator over existing channels
    pub fn with_channels(
        config: EnvConfig,
        action_channel: C,
        state_channel: C,
        engine: Box<dyn SimulationEngine>,
        observation_count: usize,
        action_len: usize,
    ) -> Self {
        Self {
            config,
            action_channel,
            state_channel,
            engine,
            process: None,
            phase: EpisodePhase::Idle,
            observation_count,
            action_len,
            state: vec![0.0; observation_count],
            timestamp: 0.0,
            terminated: true,
            truncated: true,
            episode: 0,
        }
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Number of episodes started
    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Record that the environment reached a terminal condition
    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }

    /// Whether a simulation run is currently active
    pub fn simulation_active(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.is_running())
    }

    /// Start a new episode and return its initial state
    ///
    /// Stops a still-running simulation, reopens both channels, starts the
    /// simulation and waits until it connected to both channels.
    pub async fn reset(
        &mut self,
        parameters: SimulationParameters,
        initial_state: Vec<f64>,
    ) -> Result<StepOutcome> {
        if self.simulation_active() {
            self.stop_simulation().await;
        }

        self.close_channels().await;
        self.phase = EpisodePhase::Opening;
        self.state = initial_state;
        self.timestamp = 0.0;

        if let Err(e) = self.open_channels() {
            self.abort_episode().await;
            return Err(e);
        }

        let spec = LaunchSpec {
            parameters,
            action_addr: self
                .action_channel
                .local_addr()
                .unwrap_or_else(|| self.config.action_addr()),
            state_addr: self
                .state_channel
                .local_addr()
                .unwrap_or_else(|| self.config.state_addr()),
        };
        match self.start_simulation(&spec).await {
            Ok(process) => self.process = Some(process),
            Err(e) => {
                self.abort_episode().await;
                return Err(e);
            }
        }

        // Join both accepts before the first exchange
        let connected = match self.action_channel.wait_for_connection(None).await {
            Ok(()) => self.state_channel.wait_for_connection(None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = connected {
            error!("Simulation did not connect: {}", e);
            self.abort_episode().await;
            return Err(e);
        }

        self.episode += 1;
        self.terminated = false;
        self.truncated = false;
        self.phase = EpisodePhase::Running;
        info!("Episode {} running", self.episode);

        if self.config.receive_initial_state {
            let received = self.state_channel.receive().await;
            self.apply_reply(received);
        }

        Ok(self.outcome())
    }

    /// Send one action and wait for the resulting state
    ///
    /// Fails only for an action that does not match the declared action
    /// length; nothing is sent in that case.
    pub async fn step(&mut self, action: &[f64]) -> Result<StepOutcome> {
        if action.len() != self.action_len || action.iter().any(|v| !v.is_finite()) {
            return Err(SimGymError::InvalidAction(format!(
                "expected {} finite values, got {:?}",
                self.action_len, action
            )));
        }

        if self.phase != EpisodePhase::Running || !self.simulation_active() {
            warn!("No simulation running currently. No stepping possible.");
            self.mark_truncated();
            return Ok(self.outcome());
        }

        if let Err(e) = self.action_channel.send(&encode_action(false, action)).await {
            warn!("Action could not be sent: {}", e);
            self.mark_truncated();
            return Ok(self.outcome());
        }

        let received = self.state_channel.receive().await;
        self.apply_reply(received);
        Ok(self.outcome())
    }

    /// Ask a running simulation to stop and wait for it to finish
    ///
    /// Sends the stop flag with a zero action, drains one reply and joins the
    /// process. Failures are logged, the simulation may already be gone.
    pub async fn stop_simulation(&mut self) {
        if let Some(mut process) = self.process.take() {
            if process.is_running() {
                let stop = encode_action(true, &vec![0.0; self.action_len]);
                match self.action_channel.send(&stop).await {
                    Ok(()) => {
                        // Clear the reply still in flight
                        let drain = tokio::time::timeout(
                            self.config.drain_timeout,
                            self.state_channel.receive(),
                        );
                        if drain.await.is_err() {
                            warn!(
                                "No reply to stop signal within {:?}",
                                self.config.drain_timeout
                            );
                        }
                    }
                    Err(e) => info!(
                        "Stop signal could not be sent, connection probably already dead: {}",
                        e
                    ),
                }
            }
            if let Err(e) = process.join().await {
                warn!("Simulation did not shut down cleanly: {}", e);
            }
        }
        self.mark_truncated();
    }

    /// Stop the simulation and close both channels. Idempotent.
    pub async fn close(&mut self) {
        self.stop_simulation().await;
        self.close_channels().await;
        self.phase = EpisodePhase::Idle;
    }

    fn open_channels(&mut self) -> Result<()> {
        let timeout = self.config.accept_timeout;
        self.state_channel.open(timeout)?;
        self.action_channel.open(timeout)
    }

    async fn close_channels(&mut self) {
        self.state_channel.close().await;
        self.action_channel.close().await;
    }

    async fn start_simulation(&mut self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let attempts = self.config.start_attempts.max(1);
        let mut reason = String::new();
        for attempt in 1..=attempts {
            match self.engine.start(spec).await {
                Ok(process) => return Ok(process),
                Err(e) => {
                    error!(
                        "Unable to start simulation (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    reason = e.to_string();
                }
            }
        }
        Err(SimGymError::EngineStartFailure { attempts, reason })
    }

    /// Tear down a reset that did not reach `Running`
    async fn abort_episode(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.join().await {
                debug!("Simulation exit after aborted reset: {}", e);
            }
        }
        self.close_channels().await;
        self.truncated = true;
        self.phase = EpisodePhase::Idle;
    }

    fn apply_reply(&mut self, received: Result<Vec<u8>>) {
        match received.and_then(|bytes| decode_state(&bytes, self.observation_count)) {
            Ok(StateFrame::State {
                observations,
                timestamp,
            }) => {
                self.state = observations;
                self.timestamp = timestamp;
            }
            Ok(StateFrame::EpisodeEnded) => {
                debug!("Simulation ended episode {} at t={}", self.episode, self.timestamp);
                self.mark_truncated();
            }
            Err(e @ SimGymError::ProtocolLengthMismatch { .. }) => {
                error!(
                    "Length of data received from the simulation invalid: {}. \
                     There is possibly a problem with the block execution order of the model.",
                    e
                );
                self.mark_truncated();
            }
            Err(e) if e.ends_episode() => {
                warn!("Lost connection to simulation: {}", e);
                self.mark_truncated();
            }
            Err(e) => {
                error!("Unexpected reply from simulation: {}", e);
                self.mark_truncated();
            }
        }
    }

    fn mark_truncated(&mut self) {
        self.truncated = true;
        if self.phase == EpisodePhase::Running {
            self.phase = EpisodePhase::Ended;
        }
    }

    fn outcome(&self) -> StepOutcome {
        StepOutcome {
            state: self.state.clone(),
            timestamp: self.timestamp,
            terminated: self.terminated,
            truncated: self.truncated,
        }
    }
}
