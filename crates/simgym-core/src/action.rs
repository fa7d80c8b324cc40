//! Action types and action spaces

use crate::error::{Result, SimGymError};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// An action to execute in the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Discrete action index
    Discrete(i64),
    /// Continuous action vector
    Continuous(Vec<f64>),
}

impl From<Vec<f64>> for Action {
    fn from(values: Vec<f64>) -> Self {
        Action::Continuous(values)
    }
}

/// Description of an action space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all = "PascalCase")]
pub enum ActionSpace {
    /// Discrete action space `{0, .., n-1}`, sent to the simulation as one value
    ///
    /// `n` must be at least 1; [`ActionSpace::discrete`] checks it.
    Discrete {
        /// Number of discrete actions
        n: usize,
    },
    /// Continuous action space (Box)
    Continuous {
        /// Lower bounds
        low: Vec<f64>,
        /// Upper bounds
        high: Vec<f64>,
    },
}

impl ActionSpace {
    /// Discrete space with `n` actions, rejecting an empty space
    pub fn discrete(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(SimGymError::InvalidAction(
                "discrete action space needs at least one action".into(),
            ));
        }
        Ok(ActionSpace::Discrete { n })
    }

    /// Box space, rejecting mismatched or inverted bounds
    pub fn continuous(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        if low.len() != high.len() || low.iter().zip(&high).any(|(l, h)| !(l <= h)) {
            return Err(SimGymError::InvalidAction(format!(
                "invalid action bounds {:?} / {:?}",
                low, high
            )));
        }
        Ok(ActionSpace::Continuous { low, high })
    }

    /// Box space with the same bounds for every component
    pub fn uniform(size: usize, low: f64, high: f64) -> Self {
        ActionSpace::Continuous {
            low: vec![low; size],
            high: vec![high; size],
        }
    }

    /// Number of values this space puts on the wire
    pub fn size(&self) -> usize {
        match self {
            ActionSpace::Discrete { .. } => 1,
            ActionSpace::Continuous { low, .. } => low.len(),
        }
    }

    /// Shape of the action vector
    pub fn shape(&self) -> Vec<usize> {
        vec![self.size()]
    }

    /// Whether `action` conforms to this space
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (ActionSpace::Discrete { n }, Action::Discrete(index)) => {
                *index >= 0 && (*index as usize) < *n
            }
            (ActionSpace::Continuous { low, high }, Action::Continuous(values)) => {
                values.len() == low.len()
                    && values
                        .iter()
                        .zip(low.iter().zip(high.iter()))
                        .all(|(v, (l, h))| v.is_finite() && v >= l && v <= h)
            }
            _ => false,
        }
    }

    /// Sample a random action. Takes `&mut impl Rng` for determinism.
    ///
    /// # Panics
    ///
    /// Panics on an empty discrete space (`n == 0`).
    pub fn sample(&self, rng: &mut impl Rng) -> Action {
        match self {
            ActionSpace::Discrete { n } => Action::Discrete(rng.gen_range(0..*n as i64)),
            ActionSpace::Continuous { low, high } => Action::Continuous(
                low.iter()
                    .zip(high.iter())
                    .map(|(l, h)| if l < h { rng.gen_range(*l..=*h) } else { *l })
                    .collect(),
            ),
        }
    }

    /// Saturate an action into this space
    pub fn clamp(&self, action: &Action) -> Action {
        match (self, action) {
            (ActionSpace::Discrete { n }, Action::Discrete(index)) => {
                Action::Discrete((*index).clamp(0, (*n as i64 - 1).max(0)))
            }
            (ActionSpace::Continuous { low, high }, Action::Continuous(values)) => {
                Action::Continuous(
                    values
                        .iter()
                        .zip(low.iter().zip(high.iter()))
                        .map(|(v, (l, h))| v.clamp(*l, *h))
                        .collect(),
                )
            }
            _ => action.clone(),
        }
    }

    /// Validate `action` and convert it into the values sent to the simulation
    pub fn to_vector(&self, action: &Action) -> Result<Vec<f64>> {
        if !self.contains(action) {
            return Err(SimGymError::InvalidAction(format!(
                "{:?} not in action space {:?}",
                action, self
            )));
        }
        Ok(match action {
            Action::Discrete(index) => vec![*index as f64],
            Action::Continuous(values) => values.clone(),
        })
    }

    /// All-zero action vector of this space's size
    pub fn zeros(&self) -> Vec<f64> {
        vec![0.0; self.size()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_checked_constructors() {
        assert!(matches!(
            ActionSpace::discrete(0),
            Err(SimGymError::InvalidAction(_))
        ));
        assert_eq!(ActionSpace::discrete(3).unwrap(), ActionSpace::Discrete { n: 3 });
        assert!(ActionSpace::continuous(vec![-1.0], vec![1.0]).is_ok());
        assert!(ActionSpace::continuous(vec![-1.0, 0.0], vec![1.0]).is_err());
        assert!(ActionSpace::continuous(vec![1.0], vec![-1.0]).is_err());
        assert!(ActionSpace::continuous(vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn test_discrete_contains() {
        let space = ActionSpace::Discrete { n: 3 };
        assert!(space.contains(&Action::Discrete(0)));
        assert!(space.contains(&Action::Discrete(2)));
        assert!(!space.contains(&Action::Discrete(3)));
        assert!(!space.contains(&Action::Discrete(-1)));
        assert!(!space.contains(&Action::Continuous(vec![1.0])));
    }

    #[test]
    fn test_continuous_contains() {
        let space = ActionSpace::uniform(2, -1.0, 1.0);
        assert!(space.contains(&Action::Continuous(vec![0.0, 1.0])));
        assert!(!space.contains(&Action::Continuous(vec![0.0, 1.5])));
        assert!(!space.contains(&Action::Continuous(vec![0.0])));
        assert!(!space.contains(&Action::Continuous(vec![0.0, f64::NAN])));
        assert!(!space.contains(&Action::Discrete(0)));
    }

    #[test]
    fn test_sample_stays_in_space() {
        let mut rng = SmallRng::seed_from_u64(7);
        let spaces = [
            ActionSpace::Discrete { n: 3 },
            ActionSpace::Continuous {
                low: vec![-1.0, 0.0, 5.0],
                high: vec![1.0, 10.0, 5.0],
            },
        ];
        for space in &spaces {
            for _ in 0..100 {
                let action = space.sample(&mut rng);
                assert!(space.contains(&action), "{:?} outside {:?}", action, space);
            }
        }
    }

    #[test]
    fn test_clamp() {
        let space = ActionSpace::uniform(2, -1.0, 1.0);
        assert_eq!(
            space.clamp(&Action::Continuous(vec![-4.0, 0.5])),
            Action::Continuous(vec![-1.0, 0.5])
        );
        let space = ActionSpace::Discrete { n: 3 };
        assert_eq!(space.clamp(&Action::Discrete(9)), Action::Discrete(2));
    }

    #[test]
    fn test_to_vector() {
        let space = ActionSpace::Discrete { n: 3 };
        assert_eq!(space.to_vector(&Action::Discrete(2)).unwrap(), vec![2.0]);
        assert!(matches!(
            space.to_vector(&Action::Discrete(5)),
            Err(SimGymError::InvalidAction(_))
        ));
        assert_eq!(space.zeros(), vec![0.0]);
    }

    #[test]
    fn test_space_json_format() {
        let json = r#"{"Type":"Continuous","low":[-1.0],"high":[1.0]}"#;
        let space: ActionSpace = serde_json::from_str(json).unwrap();
        assert_eq!(space, ActionSpace::uniform(1, -1.0, 1.0));

        let action: Action = serde_json::from_str("[0.25]").unwrap();
        assert_eq!(action, Action::Continuous(vec![0.25]));
        let action: Action = serde_json::from_str("1").unwrap();
        assert_eq!(action, Action::Discrete(1));
    }
}
