//! The cost-evaluation contract shared by all strategies.
//!
//! Running out of budget is an ordinary outcome here, not an error: callers
//! match on [`EvalOutcome::BudgetExhausted`] and stop with whatever results
//! have accumulated.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use kt_types::{
    format_configuration, EvaluationRecord, KernelOptions, ParameterValue, RunOutcome, Runner,
    SearchSpaceError, TuneResult,
};

use crate::config::TuningOptions;
use crate::space::config_valid;

/// Result of asking for the cost of one configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalOutcome {
    Evaluated(f64),
    /// The configuration could not be measured (restrictions, compile or
    /// launch failure).
    Invalid,
    /// The external budget is spent; nothing was measured.
    BudgetExhausted,
}

/// Measures configurations, appending one record per new measurement.
pub trait CostFunction {
    fn evaluate(
        &mut self,
        config: &[ParameterValue],
        results: &mut Vec<EvaluationRecord>,
    ) -> TuneResult<EvalOutcome>;
}

/// External limits on the number of unique evaluations and on wall time.
#[derive(Debug, Clone)]
pub struct Budget {
    max_fevals: Option<usize>,
    time_limit: Option<Duration>,
    started: Instant,
}

impl Budget {
    pub fn new(max_fevals: Option<usize>, time_limit: Option<Duration>) -> Self {
        Self {
            max_fevals,
            time_limit,
            started: Instant::now(),
        }
    }

    pub fn from_options(options: &TuningOptions) -> Self {
        Self::new(options.max_fevals, options.time_limit)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether another evaluation would exceed the budget.
    pub fn exhausted(&self, fevals: usize) -> bool {
        if self.max_fevals.is_some_and(|max| fevals >= max) {
            return true;
        }
        self.time_limit.is_some_and(|limit| self.elapsed() >= limit)
    }
}

/// Cost function that measures configurations with a [`Runner`].
///
/// Repeated configurations are answered from a cache and do not consume
/// budget. Configurations failing restrictions are recorded as invalid
/// without reaching the runner.
pub struct RunnerCostFunction<'a> {
    runner: &'a mut dyn Runner,
    kernel_options: &'a KernelOptions,
    options: &'a TuningOptions,
    budget: Budget,
    cache: HashMap<String, EvalOutcome>,
    unique_fevals: usize,
}

impl<'a> RunnerCostFunction<'a> {
    pub fn new(
        runner: &'a mut dyn Runner,
        kernel_options: &'a KernelOptions,
        options: &'a TuningOptions,
    ) -> Self {
        Self {
            runner,
            kernel_options,
            options,
            budget: Budget::from_options(options),
            cache: HashMap::new(),
            unique_fevals: 0,
        }
    }

    pub fn unique_fevals(&self) -> usize {
        self.unique_fevals
    }

    fn log(&self, message: String) {
        if self.options.verbose {
            info!("{message}");
        } else {
            debug!("{message}");
        }
    }
}

impl CostFunction for RunnerCostFunction<'_> {
    fn evaluate(
        &mut self,
        config: &[ParameterValue],
        results: &mut Vec<EvaluationRecord>,
    ) -> TuneResult<EvalOutcome> {
        let expected = self.options.tune_params.len();
        if config.len() != expected {
            return Err(SearchSpaceError::LengthMismatch {
                expected,
                actual: config.len(),
            }
            .into());
        }

        let key = format_configuration(config);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }
        if self.budget.exhausted(self.unique_fevals) {
            self.log(format!(
                "Budget exhausted after {} evaluations ({:.1?})",
                self.unique_fevals,
                self.budget.elapsed()
            ));
            return Ok(EvalOutcome::BudgetExhausted);
        }

        let view = self.options.tune_params.view(config);
        let max_threads = self.runner.device().max_threads();
        if !config_valid(config, self.options, max_threads) {
            results.push(EvaluationRecord::invalid(results.len(), &view));
            self.cache.insert(key, EvalOutcome::Invalid);
            return Ok(EvalOutcome::Invalid);
        }

        let outcome = self.runner.run(&view, self.kernel_options)?;
        self.unique_fevals += 1;
        let evaluated = match outcome {
            RunOutcome::Time(t) if t.is_finite() => EvalOutcome::Evaluated(t),
            _ => EvalOutcome::Invalid,
        };
        self.log(format!("{view}: {outcome:?}"));
        results.push(EvaluationRecord::from_outcome(results.len(), &view, &outcome));
        self.cache.insert(key, evaluated);
        Ok(evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kt_types::{FnRunner, Restriction, StaticDevice, TuneParams};

    fn options() -> TuningOptions {
        TuningOptions::new(
            TuneParams::new()
                .add_ints("block_size_x", &[32, 64, 128])
                .add_ints("tile", &[1, 2]),
        )
        .unwrap()
    }

    fn runner() -> FnRunner<impl FnMut(&kt_types::ConfigView<'_>) -> RunOutcome> {
        FnRunner::new(StaticDevice::new(1024), |c| {
            let bx = c.get("block_size_x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let tile = c.get("tile").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if tile > 1.0 && bx > 64.0 {
                RunOutcome::CompileFailed("out of shared memory".into())
            } else {
                RunOutcome::Time(bx / 32.0 + tile)
            }
        })
    }

    fn config(bx: i64, tile: i64) -> Vec<ParameterValue> {
        vec![ParameterValue::Int(bx), ParameterValue::Int(tile)]
    }

    #[test]
    fn measures_and_records() {
        let opts = options();
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        let mut results = Vec::new();

        let outcome = cost.evaluate(&config(64, 1), &mut results).unwrap();
        assert_eq!(outcome, EvalOutcome::Evaluated(3.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].time, Some(3.0));
        assert_eq!(results[0].sequence, 0);
    }

    #[test]
    fn failures_are_invalid_outcomes() {
        let opts = options();
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        let mut results = Vec::new();

        let outcome = cost.evaluate(&config(128, 2), &mut results).unwrap();
        assert_eq!(outcome, EvalOutcome::Invalid);
        assert!(!results[0].is_valid());
        assert_eq!(cost.unique_fevals(), 1);
    }

    #[test]
    fn repeated_configurations_hit_the_cache() {
        let opts = options();
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        let mut results = Vec::new();

        cost.evaluate(&config(32, 1), &mut results).unwrap();
        let again = cost.evaluate(&config(32, 1), &mut results).unwrap();
        assert_eq!(again, EvalOutcome::Evaluated(2.0));
        assert_eq!(results.len(), 1);
        assert_eq!(cost.unique_fevals(), 1);
    }

    #[test]
    fn budget_stops_new_evaluations() {
        let opts = options().with_budget(Some(2), None);
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        let mut results = Vec::new();

        cost.evaluate(&config(32, 1), &mut results).unwrap();
        cost.evaluate(&config(64, 1), &mut results).unwrap();
        let stopped = cost.evaluate(&config(128, 1), &mut results).unwrap();
        assert_eq!(stopped, EvalOutcome::BudgetExhausted);
        assert_eq!(results.len(), 2);
        // Cached answers are still available.
        assert_eq!(
            cost.evaluate(&config(32, 1), &mut results).unwrap(),
            EvalOutcome::Evaluated(2.0)
        );
    }

    #[test]
    fn zero_time_limit_is_exhausted_immediately() {
        let budget = Budget::new(None, Some(Duration::ZERO));
        assert!(budget.exhausted(0));
        assert!(!Budget::new(None, None).exhausted(usize::MAX));
    }

    #[test]
    fn restricted_configurations_skip_the_runner() {
        let opts = options().with_restriction(Restriction::new(|c| {
            c.get("tile").and_then(|v| v.as_i64()) == Some(1)
        }));
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        let mut results = Vec::new();

        let outcome = cost.evaluate(&config(32, 2), &mut results).unwrap();
        assert_eq!(outcome, EvalOutcome::Invalid);
        assert_eq!(cost.unique_fevals(), 0);
        assert_eq!(results[0].status, kt_types::EvaluationStatus::InvalidConfig);
    }

    #[test]
    fn wrong_length_is_an_error() {
        let opts = options();
        let kernel = KernelOptions::new("stencil");
        let mut runner = runner();
        let mut cost = RunnerCostFunction::new(&mut runner, &kernel, &opts);
        assert!(cost.evaluate(&[ParameterValue::Int(32)], &mut Vec::new()).is_err());
    }
}
