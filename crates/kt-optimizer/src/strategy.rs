//! The strategy entry contract and its implementations.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kt_types::{
    config_error, DeviceOptions, Environment, EvaluationRecord, KernelOptions, Runner,
    StrategyError, TuneResult,
};

use crate::bayes_opt::{BayesianOptimization, Termination};
use crate::config::{BayesOptConfig, TuningOptions};
use crate::evaluation::{CostFunction, EvalOutcome, RunnerCostFunction};
use crate::space::SearchSpace;
use crate::trial::RunSummary;

/// Everything a strategy hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneOutput {
    pub results: Vec<EvaluationRecord>,
    pub environment: Environment,
    pub summary: RunSummary,
}

/// A search strategy over the configurations described by `TuningOptions`.
pub trait Strategy {
    fn name(&self) -> &'static str;

    fn tune(
        &self,
        runner: &mut dyn Runner,
        kernel_options: &KernelOptions,
        device_options: &DeviceOptions,
        tuning_options: &TuningOptions,
    ) -> TuneResult<TuneOutput>;
}

/// Look up a strategy by its registered name.
pub fn strategy_by_name(name: &str) -> TuneResult<Box<dyn Strategy>> {
    match name {
        BayesOptStrategy::NAME => Ok(Box::new(BayesOptStrategy)),
        RandomSampling::NAME => Ok(Box::new(RandomSampling)),
        other => Err(config_error!("unknown strategy '{other}'")),
    }
}

/// Run the named strategy.
pub fn tune(
    strategy: &str,
    runner: &mut dyn Runner,
    kernel_options: &KernelOptions,
    device_options: &DeviceOptions,
    tuning_options: &TuningOptions,
) -> TuneResult<TuneOutput> {
    strategy_by_name(strategy)?.tune(runner, kernel_options, device_options, tuning_options)
}

fn start(
    strategy: &dyn Strategy,
    runner: &dyn Runner,
    kernel_options: &KernelOptions,
    device_options: &DeviceOptions,
    tuning_options: &TuningOptions,
) -> TuneResult<(SearchSpace, RunSummary)> {
    let space = SearchSpace::enumerate(tuning_options, runner.device().max_threads())?;
    info!(
        "Tuning {} on device {} (platform {}) with {}: {} configurations",
        kernel_options.kernel_name,
        device_options.device,
        device_options.platform,
        strategy.name(),
        space.len()
    );
    let mut summary = RunSummary::new(strategy.name(), tuning_options.objective);
    summary.mark_running();
    Ok((space, summary))
}

fn finish(
    mut summary: RunSummary,
    outcome: TuneResult<Termination>,
    results: Vec<EvaluationRecord>,
    environment: Environment,
) -> TuneResult<TuneOutput> {
    match outcome {
        Ok(Termination::Stopped) => summary.mark_stopped(),
        Ok(_) => summary.mark_completed(),
        Err(e) => {
            // The error is the result; the partial records go with it.
            warn!(
                "{} failed after {} evaluations: {e}",
                summary.strategy,
                results.len()
            );
            return Err(e);
        }
    }
    summary.observe_all(&results);
    info!(
        "{} finished in state {:?}: {} evaluations, {} invalid",
        summary.strategy, summary.state, summary.evaluations, summary.invalid_evaluations
    );
    Ok(TuneOutput {
        results,
        environment,
        summary,
    })
}

/// Bayesian optimization with a Gaussian-process surrogate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BayesOptStrategy;

impl BayesOptStrategy {
    pub const NAME: &'static str = "bayes_opt";
}

impl Strategy for BayesOptStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn tune(
        &self,
        runner: &mut dyn Runner,
        kernel_options: &KernelOptions,
        device_options: &DeviceOptions,
        tuning_options: &TuningOptions,
    ) -> TuneResult<TuneOutput> {
        let config = BayesOptConfig::from_strategy_options(&tuning_options.strategy_options)?;
        let (space, summary) = start(self, runner, kernel_options, device_options, tuning_options)?;
        let environment = runner.device().environment();

        let mut bo = BayesianOptimization::new(&space, tuning_options, config)?;
        let outcome = {
            let mut cost = RunnerCostFunction::new(runner, kernel_options, tuning_options);
            bo.optimize(&mut cost)
        };
        finish(summary, outcome, bo.into_results(), environment)
    }
}

/// Settings of [`RandomSampling`]. Other keys in `strategy_options` are
/// ignored so the same options can be shared with other strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSamplingConfig {
    /// Fraction of the search space to sample, used when `max_fevals` is unset.
    pub fraction: f64,
    pub max_fevals: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for RandomSamplingConfig {
    fn default() -> Self {
        Self {
            fraction: 0.1,
            max_fevals: None,
            seed: None,
        }
    }
}

impl RandomSamplingConfig {
    pub fn from_strategy_options(options: &serde_json::Value) -> TuneResult<Self> {
        let config: Self = match options {
            serde_json::Value::Null => Self::default(),
            other => serde_json::from_value(other.clone()).map_err(|e| {
                StrategyError::InvalidConfig {
                    message: e.to_string(),
                }
            })?,
        };
        if !(config.fraction > 0.0 && config.fraction <= 1.0) {
            return Err(StrategyError::InvalidConfig {
                message: format!("fraction must be in (0, 1], got {}", config.fraction),
            }
            .into());
        }
        Ok(config)
    }

    /// Number of samples to draw from a space of `len` configurations.
    pub fn sample_count(&self, len: usize) -> usize {
        let count = match self.max_fevals {
            Some(n) => n,
            None => ((len as f64) * self.fraction).ceil() as usize,
        };
        count.clamp(1, len.max(1)).min(len)
    }
}

/// Uniform sampling without replacement over the enumerated space.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampling;

impl RandomSampling {
    pub const NAME: &'static str = "random_sample";
}

impl Strategy for RandomSampling {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn tune(
        &self,
        runner: &mut dyn Runner,
        kernel_options: &KernelOptions,
        device_options: &DeviceOptions,
        tuning_options: &TuningOptions,
    ) -> TuneResult<TuneOutput> {
        let config = RandomSamplingConfig::from_strategy_options(&tuning_options.strategy_options)?;
        let (space, summary) = start(self, runner, kernel_options, device_options, tuning_options)?;
        let environment = runner.device().environment();

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let sample = space.random_sample(config.sample_count(space.len()), &mut rng);

        let mut results = Vec::with_capacity(sample.len());
        let mut cost = RunnerCostFunction::new(runner, kernel_options, tuning_options);
        let mut outcome = Ok(Termination::SpaceExhausted);
        for configuration in sample {
            match cost.evaluate(configuration, &mut results) {
                Ok(EvalOutcome::BudgetExhausted) => {
                    outcome = Ok(Termination::Stopped);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        finish(summary, outcome, results, environment)
    }
}
