//! simgym runner
//!
//! Runs cart-pole episodes with a random policy against one of:
//! - a simulation program launched per episode (`simgym -- ./simulation ARGS`)
//! - a simulation started by hand that connects to the configured ports (`--attach`)
//! - the in-process loopback simulation (default)

mod cartpole;

use anyhow::{Context, Result};
use cartpole::CartPole;
use clap::Parser;
use simgym_core::EnvConfig;
use simgym_env::{
    AttachedEngine, CommandConfig, CommandEngine, Environment, LoopbackConfig, LoopbackEngine,
    SimEnv, SimulationEngine, Task,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file with the channel configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of episodes to run
    #[arg(long, default_value_t = 1)]
    episodes: u32,

    /// Step limit per episode
    #[arg(long, default_value_t = 1000)]
    max_steps: u64,

    /// Seed for resets and action sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated seconds per episode
    #[arg(long, default_value_t = 100.0)]
    stop_time: f64,

    /// Continuous force in [-1, 1] instead of three discrete pushes
    #[arg(long, default_value_t = false)]
    continuous: bool,

    /// Simulated seconds per step of the loopback simulation
    #[arg(long, default_value_t = 0.02)]
    step_size: f64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Wait for a simulation started by hand instead of launching one
    #[arg(long, default_value_t = false, conflicts_with = "command")]
    attach: bool,

    /// Simulation program and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn engine(args: &Args, config: &EnvConfig, task: &CartPole) -> Box<dyn SimulationEngine> {
    if args.attach {
        return Box::new(AttachedEngine);
    }
    match args.command.split_first() {
        Some((program, rest)) => {
            let mut command = CommandConfig::new(program);
            command.args = rest.to_vec();
            info!("Launching {} for every episode", program);
            Box::new(CommandEngine::new(command))
        }
        None => {
            info!("No simulation given, using loopback simulation");
            Box::new(LoopbackEngine::new(LoopbackConfig {
                initial_state_targets: task
                    .observations()
                    .iter()
                    .map(|o| o.target.clone())
                    .collect(),
                action_len: task.action_space().size(),
                step_size: args.step_size,
                stop_time: task.stop_time(),
                send_initial_state: config.receive_initial_state,
                ..Default::default()
            }))
        }
    }
}

async fn run(env: &mut impl Environment, args: &Args) -> Result<()> {
    for episode in 0..args.episodes {
        let seed = args.seed.map(|s| s + u64::from(episode));
        let (observation, _) = env.reset(seed).await?;
        info!("Episode {} started at {:?}", episode + 1, observation);

        let mut total_reward = 0.0;
        let mut steps = 0;
        let mut last = None;
        while steps < args.max_steps {
            let action = env.sample_action();
            let result = env.step(&action).await?;
            total_reward += result.reward;
            steps += 1;
            let done = result.done();
            last = Some(result);
            if done {
                break;
            }
        }

        match last {
            Some(result) => info!(
                "Episode {} finished after {} steps \
                 (t={:.3}s, reward {}, terminated {}, truncated {})",
                episode + 1,
                steps,
                result.info.simulation_time,
                total_reward,
                result.terminated,
                result.truncated
            ),
            None => warn!("Episode {} took no steps", episode + 1),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EnvConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EnvConfig::default(),
    };
    config.validate()?;

    let task = CartPole::new(args.continuous, args.stop_time);
    let engine = engine(&args, &config, &task);
    info!(
        "simgym starting (actions: {}, states: {})",
        config.action_addr(),
        config.state_addr()
    );

    let mut env = SimEnv::new(config, engine, task);
    let result = run(&mut env, &args).await;
    env.close().await;
    result
}
