//! Bayesian optimization over an enumerated kernel configuration space.
//!
//! The controller owns every piece of run-time state: the normalization map,
//! the pruned space, the observation store, the surrogate and the acquisition
//! policy. Configurations are addressed by their index in the pruned space;
//! only [`BayesianOptimization::update_after_evaluation`] mutates the store.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kt_types::{EvaluationRecord, ParameterValue, TuneResult};

use crate::acquisition::{
    select_best, Acquisition, AcquisitionContext, AcquisitionFunction, AcquisitionPolicy,
    MultiSchedule,
};
use crate::config::{BayesOptConfig, ExplorationFactor, SamplingMethod, TuningOptions};
use crate::evaluation::{CostFunction, EvalOutcome};
use crate::normalize::{compute_eps, NormalizationMap, PrunedSpace};
use crate::observations::{Measurement, ObservationStore};
use crate::space::SearchSpace;
use crate::surrogate::{GaussianProcess, Prediction, Surrogate};
use crate::trial::ObjectiveDirection;

/// Relative exploration used before any improvement can be measured.
const DEFAULT_EXPLORATION: f64 = 0.01;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    InitialSampling,
    SurrogateFit,
    CandidateScoring,
    RealEvaluation,
    ObservationUpdate,
    Terminated,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The configured evaluation budget was used up.
    BudgetReached,
    /// Every configuration in the space has been visited.
    SpaceExhausted,
    /// The cost function reported an exhausted external budget.
    Stopped,
}

/// Loop controller for one Bayesian-optimization run.
pub struct BayesianOptimization {
    config: BayesOptConfig,
    map: NormalizationMap,
    pruned: PrunedSpace,
    store: ObservationStore,
    surrogate: GaussianProcess,
    policy: AcquisitionPolicy,
    rng: StdRng,
    state: LoopState,
    budget: usize,
    popsize: usize,
    fevals: usize,
    initial_sample_mean: Option<f64>,
    results: Vec<EvaluationRecord>,
    verbose: bool,
}

impl BayesianOptimization {
    /// Normalize and prune `space`, then set up an empty run.
    ///
    /// Fails immediately on an invalid config or an unknown acquisition
    /// function name.
    pub fn new(
        space: &SearchSpace,
        options: &TuningOptions,
        config: BayesOptConfig,
    ) -> TuneResult<Self> {
        config.validate()?;
        let policy = AcquisitionPolicy::from_name(&config.method, &config)?;

        let eps = compute_eps(space.params(), options.scaling);
        let map = NormalizationMap::new(space.params(), eps, options.snap);
        let normalized = map.normalize_space(space)?;
        let pruned = PrunedSpace::prune(normalized, &map, config.prune_parameter_space);
        let store = ObservationStore::new(pruned.configurations().to_vec(), options.objective)?;

        let budget = config.max_fevals.min(store.len());
        let popsize = config.popsize.min(budget);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let surrogate = GaussianProcess::new(
            config.covariance_kernel,
            config.covariance_lengthscale,
            config.noise,
        );

        info!(
            "Bayesian optimization over {} configurations ({} of {} parameters pruned), \
             budget {}, policy {}",
            store.len(),
            pruned.removed_count(),
            map.len(),
            budget,
            policy.name()
        );

        Ok(Self {
            config,
            map,
            pruned,
            store,
            surrogate,
            policy,
            rng,
            state: LoopState::InitialSampling,
            budget,
            popsize,
            fevals: 0,
            initial_sample_mean: None,
            results: Vec::new(),
            verbose: options.verbose,
        })
    }

    pub fn config(&self) -> &BayesOptConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.store.direction()
    }

    /// Effective evaluation budget, `min(max_fevals, |space|)`.
    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn popsize(&self) -> usize {
        self.popsize
    }

    pub fn fevals(&self) -> usize {
        self.fevals
    }

    /// The pruned normalized search space in enumeration order.
    pub fn search_space(&self) -> &[Vec<f64>] {
        self.store.configurations()
    }

    /// Per original parameter, the fixed value removed by pruning.
    pub fn removed_params(&self) -> &[Option<f64>] {
        self.pruned.removed()
    }

    pub fn observations(&self) -> &ObservationStore {
        &self.store
    }

    pub fn current_optimum(&self) -> Option<f64> {
        self.store.optimum()
    }

    pub fn initial_sample_mean(&self) -> Option<f64> {
        self.initial_sample_mean
    }

    pub fn results(&self) -> &[EvaluationRecord] {
        &self.results
    }

    pub fn into_results(self) -> Vec<EvaluationRecord> {
        self.results
    }

    pub fn is_better_than(&self, a: f64, b: f64) -> bool {
        self.direction().is_better_than(a, b)
    }

    pub fn is_unvisited(&self, index: usize) -> bool {
        self.store.is_unvisited(index)
    }

    pub fn unvisited(&self) -> Vec<&[f64]> {
        self.store.unvisited()
    }

    pub fn find_param_config_index(&self, pruned: &[f64]) -> TuneResult<usize> {
        self.store.find_index(pruned)
    }

    pub fn normalize_param_config(&self, raw: &[ParameterValue]) -> TuneResult<Vec<f64>> {
        self.map.normalize(raw)
    }

    pub fn denormalize_param_config(&self, normalized: &[f64]) -> TuneResult<Vec<ParameterValue>> {
        self.map.denormalize(normalized)
    }

    pub fn prune_param_config(&self, normalized: &[f64]) -> Vec<f64> {
        self.pruned.prune_one(normalized)
    }

    pub fn unprune_param_config(&self, pruned: &[f64]) -> TuneResult<Vec<f64>> {
        self.pruned.unprune(pruned)
    }

    /// Raw configuration for a pruned-space index.
    pub fn raw_configuration(&self, index: usize) -> TuneResult<Vec<ParameterValue>> {
        let pruned = self.store.configuration(index).ok_or_else(|| {
            kt_types::SearchSpaceError::NotInSpace {
                configuration: format!("index {index}"),
            }
        })?;
        self.denormalize_param_config(&self.unprune_param_config(pruned)?)
    }

    /// Replace the acquisition policy by name (`ei`, `poi`, `lcb`, `multi`,
    /// `multi-fast`). On error the current policy is kept.
    pub fn set_acquisition_function(&mut self, name: &str) -> TuneResult<()> {
        self.policy = AcquisitionPolicy::from_name(name, &self.config)?;
        self.config.method = name.to_string();
        Ok(())
    }

    pub fn acquisition_policy(&self) -> &AcquisitionPolicy {
        &self.policy
    }

    /// The function that will score the next candidate.
    pub fn active_acquisition_function(&self) -> AcquisitionFunction {
        self.policy.active()
    }

    /// Relative exploration derived from the surrogate's uncertainty and the
    /// improvement over the initial sample.
    pub fn contextual_variance(&self, contextual_stds: &[f64]) -> f64 {
        let (Some(optimum), Some(initial_mean)) = (self.store.optimum(), self.initial_sample_mean)
        else {
            return DEFAULT_EXPLORATION;
        };
        if contextual_stds.is_empty() {
            return DEFAULT_EXPLORATION;
        }
        let improvement = if optimum > 0.0 && initial_mean > 0.0 {
            match self.direction() {
                ObjectiveDirection::Minimize => initial_mean / optimum,
                ObjectiveDirection::Maximize => optimum / initial_mean,
            }
        } else {
            1.0
        };
        let mean_std = contextual_stds.iter().sum::<f64>() / contextual_stds.len() as f64;
        DEFAULT_EXPLORATION * mean_std / improvement
    }

    /// Record the measurement of `index` in the observation store.
    pub fn update_after_evaluation(
        &mut self,
        measurement: Measurement,
        index: usize,
        pruned: &[f64],
    ) -> TuneResult<()> {
        self.store.record(measurement, index, pruned)?;
        self.fevals += 1;
        debug!(
            "Observed {:?} at index {} ({} unvisited, optimum {:?})",
            measurement,
            index,
            self.store.unvisited_count(),
            self.store.optimum()
        );
        Ok(())
    }

    /// Run the loop until the budget or the space is exhausted, or the cost
    /// function stops it. Results gathered so far are kept in every case.
    pub fn optimize(&mut self, cost: &mut dyn CostFunction) -> TuneResult<Termination> {
        self.state = LoopState::InitialSampling;
        for index in self.initial_sample() {
            if let Some(stop) = self.evaluate_index(index, cost)? {
                return Ok(self.terminate(stop));
            }
        }
        self.initial_sample_mean = self.valid_mean();

        while self.fevals < self.budget {
            if self.store.unvisited_count() == 0 {
                break;
            }
            let step = if self.store.valid_count() == 0 {
                // Nothing to fit yet.
                let index = self.random_unvisited();
                self.evaluate_index(index, cost)?
            } else {
                self.model_step(cost)?
            };
            if let Some(stop) = step {
                return Ok(self.terminate(stop));
            }
        }

        let reason = if self.store.unvisited_count() == 0 {
            Termination::SpaceExhausted
        } else {
            Termination::BudgetReached
        };
        Ok(self.terminate(reason))
    }

    /// One fit followed by one (single, discounted) or several (round-robin)
    /// evaluations.
    fn model_step(&mut self, cost: &mut dyn CostFunction) -> TuneResult<Option<Termination>> {
        self.state = LoopState::SurrogateFit;
        self.fit_surrogate()?;
        if self.initial_sample_mean.is_none() {
            self.initial_sample_mean = self.valid_mean();
        }

        self.state = LoopState::CandidateScoring;
        let (candidates, prediction) = self.predict_unvisited()?;
        let ctx = self.acquisition_context(&prediction);

        let members: Vec<(usize, AcquisitionFunction)> = match &mut self.policy {
            AcquisitionPolicy::Single(af) => vec![(0, *af)],
            AcquisitionPolicy::Multi(multi) => match multi.schedule() {
                MultiSchedule::Discounted => {
                    let af = multi.select_by_credit();
                    vec![(multi.active_position(), af)]
                }
                MultiSchedule::RoundRobin => {
                    multi.portfolio().iter().copied().enumerate().collect()
                }
            },
        };

        let mut taken = vec![false; candidates.len()];
        for (position, af) in members {
            if self.fevals >= self.budget {
                break;
            }
            if let AcquisitionPolicy::Multi(multi) = &mut self.policy {
                multi.set_active(position);
            }
            let scores = af.score_all(&prediction, &ctx);
            let choice = match select_best(&scores, self.direction(), &taken) {
                Some(choice) => choice,
                None => {
                    // No comparable score; keep the loop moving with a random candidate.
                    let open: Vec<usize> = (0..taken.len()).filter(|&i| !taken[i]).collect();
                    if open.is_empty() {
                        break;
                    }
                    debug!("{} produced no usable score, picking at random", af.name());
                    open[self.rng.random_range(0..open.len())]
                }
            };
            taken[choice] = true;
            self.log(format!(
                "{} picked index {} (mean {:.4}, std {:.4})",
                af.name(),
                candidates[choice],
                prediction.means[choice],
                prediction.stds[choice]
            ));

            let before = self.store.optimum();
            if let Some(stop) = self.evaluate_index(candidates[choice], cost)? {
                return Ok(Some(stop));
            }
            let improved = match (before, self.store.optimum()) {
                (None, Some(_)) => true,
                (Some(b), Some(a)) => self.is_better_than(a, b),
                _ => false,
            };
            if let AcquisitionPolicy::Multi(multi) = &mut self.policy {
                if multi.schedule() == MultiSchedule::Discounted {
                    multi.reward(improved);
                }
            }
        }
        Ok(None)
    }

    fn fit_surrogate(&mut self) -> TuneResult<()> {
        let (x, y) = self.store.training_data();
        self.surrogate.fit(&x, &y)
    }

    fn predict_unvisited(&self) -> TuneResult<(Vec<usize>, Prediction)> {
        let candidates: Vec<usize> = self.store.unvisited_indices().collect();
        let x: Vec<&[f64]> = candidates
            .iter()
            .filter_map(|&i| self.store.configuration(i))
            .collect();
        let prediction = self.surrogate.predict_batch(&x)?;
        Ok((candidates, prediction))
    }

    fn acquisition_context(&self, prediction: &Prediction) -> AcquisitionContext {
        let optimum = self
            .store
            .optimum()
            .unwrap_or_else(|| self.direction().worst_value());
        let relative = match self.config.exploration {
            ExplorationFactor::Fixed(value) => value,
            ExplorationFactor::Contextual(_) => {
                self.contextual_variance(&prediction.contextual_stds)
            }
        };
        let exploration = if optimum.is_finite() {
            relative * optimum.abs()
        } else {
            0.0
        };
        AcquisitionContext {
            optimum,
            direction: self.direction(),
            exploration,
            kappa: self.config.lcb_kappa,
        }
    }

    /// Evaluate one index and record it, unless the cost function stops.
    fn evaluate_index(
        &mut self,
        index: usize,
        cost: &mut dyn CostFunction,
    ) -> TuneResult<Option<Termination>> {
        self.state = LoopState::RealEvaluation;
        let raw = self.raw_configuration(index)?;
        let measurement = match cost.evaluate(&raw, &mut self.results)? {
            EvalOutcome::Evaluated(score) => Measurement::Valid(score),
            EvalOutcome::Invalid => Measurement::Invalid,
            EvalOutcome::BudgetExhausted => return Ok(Some(Termination::Stopped)),
        };

        self.state = LoopState::ObservationUpdate;
        let pruned = self
            .store
            .configuration(index)
            .map(<[f64]>::to_vec)
            .unwrap_or_default();
        self.update_after_evaluation(measurement, index, &pruned)?;
        Ok(None)
    }

    fn terminate(&mut self, reason: Termination) -> Termination {
        self.state = LoopState::Terminated;
        info!(
            "Bayesian optimization finished ({:?}) after {} evaluations, optimum {:?}",
            reason,
            self.fevals,
            self.store.optimum()
        );
        reason
    }

    fn valid_mean(&self) -> Option<f64> {
        let scores = self.store.valid_scores();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    fn random_unvisited(&mut self) -> usize {
        let unvisited: Vec<usize> = self.store.unvisited_indices().collect();
        unvisited[self.rng.random_range(0..unvisited.len())]
    }

    /// Indices for the initial sample, distinct and unvisited.
    fn initial_sample(&mut self) -> Vec<usize> {
        let count = self.popsize.min(self.store.unvisited_count());
        if count == 0 {
            return Vec::new();
        }
        match self.config.sampling_method {
            SamplingMethod::Random => {
                let unvisited: Vec<usize> = self.store.unvisited_indices().collect();
                index::sample(&mut self.rng, unvisited.len(), count)
                    .into_iter()
                    .map(|i| unvisited[i])
                    .collect()
            }
            SamplingMethod::Lhs => self.latin_hypercube(count),
        }
    }

    /// Latin-hypercube points in the pruned box, each snapped to the nearest
    /// configuration not already taken.
    fn latin_hypercube(&mut self, count: usize) -> Vec<usize> {
        let dims = self.pruned.dimensions();
        let configurations = self.store.configurations();
        let mut lower = vec![f64::INFINITY; dims];
        let mut upper = vec![f64::NEG_INFINITY; dims];
        for c in configurations {
            for (d, &v) in c.iter().enumerate() {
                lower[d] = lower[d].min(v);
                upper[d] = upper[d].max(v);
            }
        }

        let strata: Vec<Vec<usize>> = (0..dims)
            .map(|_| {
                let mut perm: Vec<usize> = (0..count).collect();
                perm.shuffle(&mut self.rng);
                perm
            })
            .collect();

        let mut taken: Vec<bool> = (0..self.store.len())
            .map(|i| !self.store.is_unvisited(i))
            .collect();
        let mut sample = Vec::with_capacity(count);
        for i in 0..count {
            let point: Vec<f64> = (0..dims)
                .map(|d| {
                    let u = (strata[d][i] as f64 + self.rng.random::<f64>()) / count as f64;
                    lower[d] + u * (upper[d] - lower[d])
                })
                .collect();

            let mut nearest: Option<(usize, f64)> = None;
            for (index, c) in self.store.configurations().iter().enumerate() {
                if taken[index] {
                    continue;
                }
                let distance: f64 = c.iter().zip(&point).map(|(a, b)| (a - b).powi(2)).sum();
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((index, distance));
                }
            }
            if let Some((index, _)) = nearest {
                taken[index] = true;
                sample.push(index);
            }
        }
        sample
    }

    fn log(&self, message: String) {
        if self.verbose {
            info!("{message}");
        } else {
            debug!("{message}");
        }
    }
}
