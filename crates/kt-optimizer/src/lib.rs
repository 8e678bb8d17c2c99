//! # kt-optimizer
//!
//! Search strategies for KernelTune.
//!
//! Provides search-space enumeration, normalization and pruning, the
//! observation store, a Gaussian-process surrogate, acquisition functions and
//! the Bayesian-optimization loop, plus the shared strategy entry point and a
//! random-sampling baseline.

mod acquisition;
mod bayes_opt;
mod config;
mod evaluation;
mod normalize;
mod observations;
mod space;
mod strategy;
mod surrogate;
mod trial;

pub use acquisition::{
    acquisition_by_name, select_best, Acquisition, AcquisitionContext, AcquisitionFunction,
    AcquisitionPolicy, MultiPolicy, MultiSchedule,
};
pub use bayes_opt::{BayesianOptimization, LoopState, Termination};
pub use config::{
    BayesOptConfig, Contextual, CovarianceKernel, ExplorationFactor, SamplingMethod,
    TuningOptions, DEFAULT_BLOCK_SIZE_NAMES,
};
pub use evaluation::{Budget, CostFunction, EvalOutcome, RunnerCostFunction};
pub use normalize::{compute_eps, to_pruned, NormalizationMap, PrunedSpace};
pub use observations::{Measurement, Observation, ObservationStore};
pub use space::{config_valid, SearchSpace};
pub use strategy::{
    strategy_by_name, tune, BayesOptStrategy, RandomSampling, RandomSamplingConfig, Strategy,
    TuneOutput,
};
pub use surrogate::{GaussianProcess, Prediction, Surrogate};
pub use trial::{ObjectiveDirection, RunId, RunState, RunSummary};
