//! Cart-pole task
//!
//! Observations: pole angle, angular velocity and angular acceleration, then
//! cart position, velocity and acceleration. Actions: three discrete pushes,
//! or one continuous force in `[-1, 1]`. Reward is 1 for every step taken,
//! including the one that leaves the position or angle limits.

use rand::rngs::StdRng;
use simgym_core::{
    Action, ActionSpace, InitialValueTarget, Observation, Observations, SimulationParameters,
};
use simgym_env::Task;
use std::f64::consts::PI;
use tracing::warn;

/// Name of the simulation model; prefixes every block path
pub const MODEL: &str = "cartpole_simulink";

const MAX_CART_POSITION: f64 = 1.0;
const MAX_POLE_ANGLE_DEG: f64 = 8.0;

/// Physical constants handed to the model as workspace variables
const WORKSPACE: [(&str, f64); 4] = [
    ("g", 9.08665),
    ("length_pole", 0.5),
    ("mass_cart", 1.0),
    ("mass_pole", 0.1),
];

const THETA: usize = 0;
const POS: usize = 3;

pub struct CartPole {
    action_space: ActionSpace,
    observations: Observations,
    stop_time: f64,
    max_pole_angle: f64,
}

impl CartPole {
    pub fn new(continuous_action: bool, stop_time: f64) -> Self {
        let max_pole_angle = MAX_POLE_ANGLE_DEG * PI / 180.0;
        let block = |path: &str| InitialValueTarget::block(format!("{}/{}", MODEL, path));
        let unbounded = |name: &str, path: &str| {
            Observation::new(name, f64::NEG_INFINITY, f64::INFINITY, block(path))
        };
        let mut observations = vec![
            // Sampled within the angle limits on every reset
            Observation::new(
                "theta",
                -max_pole_angle,
                max_pole_angle,
                block("Integrator_theta/InitialCondition"),
            ),
            unbounded("omega", "Integrator_omega/InitialCondition"),
            unbounded("alpha", "IC1/Value"),
            Observation::new(
                "pos",
                -MAX_CART_POSITION,
                MAX_CART_POSITION,
                block("Integrator_position/InitialCondition"),
            ),
            unbounded("vel", "Integrator_speed/InitialCondition"),
            unbounded("acc", "IC/Value"),
        ];
        for observation in observations.iter_mut().skip(1) {
            if let Err(e) = observation.set_initial_value(0.0) {
                warn!("{}: {}", observation.name, e);
            }
        }

        let action_space = if continuous_action {
            ActionSpace::uniform(1, -1.0, 1.0)
        } else {
            ActionSpace::Discrete { n: 3 }
        };

        Self {
            action_space,
            observations: Observations::new(observations),
            stop_time,
            max_pole_angle,
        }
    }

    pub fn stop_time(&self) -> f64 {
        self.stop_time
    }
}

impl Task for CartPole {
    fn name(&self) -> &str {
        MODEL
    }

    fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    fn observations(&self) -> &Observations {
        &self.observations
    }

    fn parameters(&self) -> SimulationParameters {
        let mut params = SimulationParameters::new();
        params.set_model_parameter("StopTime", self.stop_time);
        for (name, value) in WORKSPACE {
            params.set_workspace_variable(name, value);
        }
        params
    }

    fn on_reset(&mut self, rng: &mut StdRng) {
        if let Some(theta) = self.observations.get_mut(THETA) {
            theta.resample_initial_value(rng);
        }
    }

    fn evaluate(&self, state: &[f64], _action: &Action) -> (f64, bool) {
        let theta = state[THETA];
        let pos = state[POS];
        let out_of_bounds =
            pos.abs() > MAX_CART_POSITION || theta.abs() > 2.0 * self.max_pole_angle;
        (1.0, out_of_bounds)
    }
}
