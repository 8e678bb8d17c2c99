//! Observation bookkeeping over the pruned search space.
//!
//! Each configuration is addressed by its dense index in enumeration order.
//! The store keeps the unvisited set as an incremental cache: `record` is the
//! only mutation and removes exactly one index from it, so the cache always
//! equals `{0..N} \ observed`. [`ObservationStore::check_invariants`] verifies
//! this explicitly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use kt_types::{internal_error, SearchSpaceError, TuneResult};

use crate::trial::ObjectiveDirection;

/// A single measurement of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub index: usize,
    pub score: f64,
    pub valid: bool,
}

/// Result of measuring a configuration, as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Valid(f64),
    Invalid,
}

impl From<Option<f64>> for Measurement {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Self::Valid(v),
            _ => Self::Invalid,
        }
    }
}

fn key(configuration: &[f64]) -> Vec<u64> {
    configuration.iter().map(|v| v.to_bits()).collect()
}

fn describe(configuration: &[f64]) -> String {
    format!("{configuration:?}")
}

/// Observations, unvisited cache and running optimum for one run.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    configurations: Vec<Vec<f64>>,
    lookup: HashMap<Vec<u64>, usize>,
    observations: Vec<Option<Observation>>,
    unvisited: BTreeSet<usize>,
    valid_indices: Vec<usize>,
    direction: ObjectiveDirection,
    optimum: Option<(usize, f64)>,
}

impl ObservationStore {
    pub fn new(configurations: Vec<Vec<f64>>, direction: ObjectiveDirection) -> TuneResult<Self> {
        if configurations.is_empty() {
            return Err(SearchSpaceError::EmptySearchSpace.into());
        }
        let mut lookup = HashMap::with_capacity(configurations.len());
        for (index, configuration) in configurations.iter().enumerate() {
            if lookup.insert(key(configuration), index).is_some() {
                return Err(internal_error!(
                    "duplicate configuration {} in pruned space",
                    describe(configuration)
                ));
            }
        }
        let n = configurations.len();
        Ok(Self {
            configurations,
            lookup,
            observations: vec![None; n],
            unvisited: (0..n).collect(),
            valid_indices: Vec::new(),
            direction,
            optimum: None,
        })
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn configurations(&self) -> &[Vec<f64>] {
        &self.configurations
    }

    pub fn configuration(&self, index: usize) -> Option<&[f64]> {
        self.configurations.get(index).map(Vec::as_slice)
    }

    /// Constant-time reverse lookup of a pruned configuration.
    pub fn find_index(&self, configuration: &[f64]) -> TuneResult<usize> {
        self.lookup.get(&key(configuration)).copied().ok_or_else(|| {
            SearchSpaceError::NotInSpace {
                configuration: describe(configuration),
            }
            .into()
        })
    }

    pub fn is_unvisited(&self, index: usize) -> bool {
        self.unvisited.contains(&index)
    }

    /// Unvisited indices in enumeration order.
    pub fn unvisited_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.unvisited.iter().copied()
    }

    /// Unvisited configurations in enumeration order.
    pub fn unvisited(&self) -> Vec<&[f64]> {
        self.unvisited
            .iter()
            .map(|&i| self.configurations[i].as_slice())
            .collect()
    }

    pub fn unvisited_count(&self) -> usize {
        self.unvisited.len()
    }

    pub fn visited_count(&self) -> usize {
        self.len() - self.unvisited.len()
    }

    pub fn valid_count(&self) -> usize {
        self.valid_indices.len()
    }

    pub fn observation(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index).and_then(Option::as_ref)
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().flatten()
    }

    /// Best valid score so far.
    pub fn optimum(&self) -> Option<f64> {
        self.optimum.map(|(_, v)| v)
    }

    pub fn optimum_index(&self) -> Option<usize> {
        self.optimum.map(|(i, _)| i)
    }

    /// Valid observations in the order they were recorded.
    pub fn valid_scores(&self) -> Vec<f64> {
        self.valid_indices
            .iter()
            .filter_map(|&i| self.observation(i).map(|o| o.score))
            .collect()
    }

    /// Training set for the surrogate: valid configurations and their scores.
    pub fn training_data(&self) -> (Vec<&[f64]>, Vec<f64>) {
        let x = self
            .valid_indices
            .iter()
            .map(|&i| self.configurations[i].as_slice())
            .collect();
        (x, self.valid_scores())
    }

    /// Record the measurement of `index` and update the optimum.
    ///
    /// Each index may be recorded once.
    pub fn record(
        &mut self,
        measurement: Measurement,
        index: usize,
        configuration: &[f64],
    ) -> TuneResult<()> {
        match self.configurations.get(index) {
            Some(stored) if stored.as_slice() == configuration => {}
            _ => {
                return Err(SearchSpaceError::NotInSpace {
                    configuration: describe(configuration),
                }
                .into())
            }
        }
        if !self.unvisited.remove(&index) {
            return Err(SearchSpaceError::AlreadyObserved { index }.into());
        }

        let observation = match measurement {
            Measurement::Valid(score) if score.is_finite() => {
                self.valid_indices.push(index);
                let improves = match self.optimum {
                    None => true,
                    Some((_, best)) => self.direction.is_better_than(score, best),
                };
                if improves {
                    self.optimum = Some((index, score));
                }
                Observation {
                    index,
                    score,
                    valid: true,
                }
            }
            _ => Observation {
                index,
                score: f64::NAN,
                valid: false,
            },
        };
        self.observations[index] = Some(observation);
        Ok(())
    }

    /// Verify the unvisited cache and optimum against the observations.
    pub fn check_invariants(&self) -> TuneResult<()> {
        for (index, observation) in self.observations.iter().enumerate() {
            if observation.is_some() == self.unvisited.contains(&index) {
                return Err(internal_error!(
                    "index {index} is both observed and unvisited, or neither"
                ));
            }
        }
        let observed = self.observations.iter().flatten().count();
        if self.unvisited.len() != self.len() - observed {
            return Err(internal_error!(
                "unvisited cache holds {} entries, expected {}",
                self.unvisited.len(),
                self.len() - observed
            ));
        }
        let scores = self.valid_scores();
        let best = self.direction.best_index(&scores).map(|i| scores[i]);
        if best != self.optimum() {
            return Err(internal_error!(
                "running optimum {:?} differs from best observed {:?}",
                self.optimum(),
                best
            ));
        }
        Ok(())
    }
}
