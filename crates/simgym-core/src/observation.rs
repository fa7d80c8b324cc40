//! Bounded observations
//!
//! Each observation is one scalar of the simulation state with bounds and an
//! initial value. The initial value is injected into the simulation on every
//! reset, either directly as a block parameter or through a model workspace
//! variable the block reads its value from.

use crate::error::{Result, SimGymError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where the initial value of an observation is written before a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type", content = "Name", rename_all = "PascalCase")]
pub enum InitialValueTarget {
    /// Block parameter path, e.g. `model/Integrator/InitialCondition`
    Block(String),
    /// Workspace variable used as the block's value, for blocks whose value
    /// path is not reachable programmatically
    Workspace(String),
    /// Not injected; the simulation picks its own initial value
    Unset,
}

impl InitialValueTarget {
    pub fn block(path: impl Into<String>) -> Self {
        InitialValueTarget::Block(path.into())
    }

    pub fn workspace(name: impl Into<String>) -> Self {
        InitialValueTarget::Workspace(name.into())
    }
}

/// A single bounded scalar observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation name
    pub name: String,
    /// Lower bound, may be `-inf`
    pub low: f64,
    /// Upper bound, may be `inf`
    pub high: f64,
    /// Receiver of the initial value
    pub target: InitialValueTarget,
    initial_value: f64,
}

impl Observation {
    /// Create an observation with an initial value sampled from its bounds
    ///
    /// Use [`Observation::with_initial_value`] for a fixed start.
    pub fn new(
        name: impl Into<String>,
        low: f64,
        high: f64,
        target: InitialValueTarget,
    ) -> Self {
        let mut observation = Self {
            name: name.into(),
            low,
            high,
            target,
            initial_value: 0.0,
        };
        observation.resample_initial_value(&mut rand::thread_rng());
        observation
    }

    /// Set an explicit initial value
    pub fn with_initial_value(mut self, value: f64) -> Result<Self> {
        self.set_initial_value(value)?;
        Ok(self)
    }

    /// Initial value injected on reset
    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    /// Set the initial value, rejecting values outside the bounds
    pub fn set_initial_value(&mut self, value: f64) -> Result<()> {
        if !self.contains(value) {
            return Err(SimGymError::InvalidObservation(format!(
                "{}: initial value {} not inside [{}, {}]",
                self.name, value, self.low, self.high
            )));
        }
        debug!("Setting {} to {}", self.name, value);
        self.initial_value = value;
        Ok(())
    }

    /// Resample the initial value from the bounds
    ///
    /// Unbounded sides sample within one unit of the finite bound, or around zero.
    pub fn resample_initial_value(&mut self, rng: &mut impl Rng) {
        let (low, high) = match (self.low.is_finite(), self.high.is_finite()) {
            (true, true) => (self.low, self.high),
            (true, false) => (self.low, self.low + 1.0),
            (false, true) => (self.high - 1.0, self.high),
            (false, false) => (-1.0, 1.0),
        };
        self.initial_value = if low < high {
            rng.gen_range(low..=high)
        } else {
            low
        };
    }

    /// Whether `value` lies inside the bounds
    pub fn contains(&self, value: f64) -> bool {
        !value.is_nan() && value >= self.low && value <= self.high
    }

    /// Saturate `value` into the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.low, self.high)
    }
}

/// Observation space bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpace {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl ObservationSpace {
    pub fn size(&self) -> usize {
        self.low.len()
    }

    pub fn contains(&self, state: &[f64]) -> bool {
        state.len() == self.low.len()
            && state
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(v, (l, h))| v >= l && v <= h)
    }
}

/// Ordered collection of observations forming the environment state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    observations: Vec<Observation>,
}

impl Observations {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Observation> {
        self.observations.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Combined space of all observations
    pub fn space(&self) -> ObservationSpace {
        ObservationSpace {
            low: self.observations.iter().map(|o| o.low).collect(),
            high: self.observations.iter().map(|o| o.high).collect(),
        }
    }

    /// Combined initial state
    pub fn initial_state(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.initial_value).collect()
    }

    /// Set all initial values at once
    pub fn set_initial_state(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.observations.len() {
            return Err(SimGymError::InvalidObservation(format!(
                "Shape of values ({}) not equal to number of observations ({})",
                values.len(),
                self.observations.len()
            )));
        }
        for (observation, value) in self.observations.iter_mut().zip(values) {
            observation.set_initial_value(*value)?;
        }
        Ok(())
    }

    pub fn resample_all_initial_values(&mut self, rng: &mut impl Rng) {
        for observation in &mut self.observations {
            observation.resample_initial_value(rng);
        }
    }

    /// Saturate a state vector into the observation bounds
    pub fn clamp(&self, state: &[f64]) -> Vec<f64> {
        state
            .iter()
            .zip(&self.observations)
            .map(|(v, o)| o.clamp(*v))
            .collect()
    }

    /// Map a state vector onto `[0, 1]` per bounded component; unbounded components pass through
    pub fn normalize(&self, state: &[f64]) -> Vec<f64> {
        state
            .iter()
            .zip(&self.observations)
            .map(|(v, o)| {
                let span = o.high - o.low;
                if span.is_finite() && span > 0.0 {
                    (o.clamp(*v) - o.low) / span
                } else {
                    *v
                }
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a Observations {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}
