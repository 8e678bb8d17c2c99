//! Tuning options and the typed Bayesian-optimization configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use kt_types::{config_error, validation_error, Restriction, StrategyError, TuneParams, TuneResult};

use crate::trial::ObjectiveDirection;

/// Parameter names whose product is bounded by the device thread limit.
pub const DEFAULT_BLOCK_SIZE_NAMES: [&str; 3] = ["block_size_x", "block_size_y", "block_size_z"];

/// Options shared by every strategy for one tuning run.
///
/// Built once before the run and read-only afterwards. Strategy-specific
/// settings stay raw in `strategy_options` until a strategy parses them into
/// its own typed config.
#[derive(Debug, Clone)]
pub struct TuningOptions {
    pub tune_params: TuneParams,
    pub restrictions: Option<Restriction>,
    pub strategy_options: serde_json::Value,
    /// Map parameter values onto evenly spaced positions before searching.
    pub scaling: bool,
    /// Snap off-grid normalized values to the nearest admissible one.
    pub snap: bool,
    pub verbose: bool,
    pub objective: ObjectiveDirection,
    /// External cap on unique evaluations.
    pub max_fevals: Option<usize>,
    /// External cap on wall-clock tuning time.
    pub time_limit: Option<Duration>,
    pub block_size_names: Vec<String>,
}

impl TuningOptions {
    pub fn new(tune_params: TuneParams) -> TuneResult<Self> {
        tune_params.validate()?;
        if tune_params.is_empty() {
            return Err(config_error!("at least one tune parameter is required"));
        }
        Ok(Self {
            tune_params,
            restrictions: None,
            strategy_options: serde_json::Value::Object(serde_json::Map::new()),
            scaling: true,
            snap: true,
            verbose: false,
            objective: ObjectiveDirection::Minimize,
            max_fevals: None,
            time_limit: None,
            block_size_names: DEFAULT_BLOCK_SIZE_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_restriction(mut self, restriction: Restriction) -> Self {
        self.restrictions = Some(restriction);
        self
    }

    pub fn with_strategy_options(mut self, options: serde_json::Value) -> Self {
        self.strategy_options = options;
        self
    }

    pub fn with_objective(mut self, direction: ObjectiveDirection) -> Self {
        self.objective = direction;
        self
    }

    pub fn with_budget(mut self, max_fevals: Option<usize>, time_limit: Option<Duration>) -> Self {
        self.max_fevals = max_fevals;
        self.time_limit = time_limit;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// How the initial sample is drawn before the surrogate takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    Random,
    Lhs,
}

/// Covariance function of the Gaussian-process surrogate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceKernel {
    Matern32,
    Matern52,
    Rbf,
}

/// Marker for the contextual exploration setting (`"CV"` in config files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contextual {
    #[serde(rename = "CV")]
    Cv,
}

/// Exploration offset used by EI and POI, relative to the current optimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExplorationFactor {
    Fixed(f64),
    /// Derived each iteration from the surrogate's uncertainty.
    Contextual(Contextual),
}

/// Settings of the Bayesian-optimization strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BayesOptConfig {
    /// Number of initial samples drawn before the surrogate is used.
    pub popsize: usize,
    pub max_fevals: usize,
    /// Acquisition policy: `ei`, `poi`, `lcb`, `multi` or `multi-fast`.
    pub method: String,
    pub sampling_method: SamplingMethod,
    pub covariance_kernel: CovarianceKernel,
    pub covariance_lengthscale: f64,
    /// Diagonal jitter added to the covariance matrix.
    pub noise: f64,
    pub exploration: ExplorationFactor,
    /// Confidence-bound width for `lcb`.
    pub lcb_kappa: f64,
    /// Portfolio used by the `multi` policies, in rotation order.
    pub multi_af_names: Vec<String>,
    pub multi_discount_factor: f64,
    pub prune_parameter_space: bool,
    pub seed: Option<u64>,
}

impl Default for BayesOptConfig {
    fn default() -> Self {
        Self {
            popsize: 20,
            max_fevals: 100,
            method: "multi-fast".to_string(),
            sampling_method: SamplingMethod::Lhs,
            covariance_kernel: CovarianceKernel::Matern32,
            covariance_lengthscale: 1.5,
            noise: 1e-6,
            exploration: ExplorationFactor::Contextual(Contextual::Cv),
            lcb_kappa: 2.0,
            multi_af_names: vec!["ei".into(), "poi".into(), "lcb".into()],
            multi_discount_factor: 0.65,
            prune_parameter_space: true,
            seed: None,
        }
    }
}

impl BayesOptConfig {
    /// Parse and validate from a raw `strategy_options` object.
    pub fn from_strategy_options(options: &serde_json::Value) -> TuneResult<Self> {
        let config: Self = match options {
            serde_json::Value::Null => Self::default(),
            other => serde_json::from_value(other.clone()).map_err(|e| {
                StrategyError::InvalidConfig {
                    message: e.to_string(),
                }
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.max_fevals == 0 {
            return Err(validation_error!("max_fevals must be positive"));
        }
        if !(self.covariance_lengthscale.is_finite() && self.covariance_lengthscale > 0.0) {
            return Err(validation_error!(
                "covariance_lengthscale must be positive, got {}",
                self.covariance_lengthscale
            ));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(validation_error!("noise must be non-negative, got {}", self.noise));
        }
        if !(self.lcb_kappa.is_finite() && self.lcb_kappa >= 0.0) {
            return Err(validation_error!("lcb_kappa must be non-negative, got {}", self.lcb_kappa));
        }
        if !(self.multi_discount_factor > 0.0 && self.multi_discount_factor <= 1.0) {
            return Err(validation_error!(
                "multi_discount_factor must be in (0, 1], got {}",
                self.multi_discount_factor
            ));
        }
        if let ExplorationFactor::Fixed(v) = self.exploration {
            if !(v.is_finite() && v >= 0.0) {
                return Err(validation_error!("exploration must be non-negative, got {v}"));
            }
        }
        if self.multi_af_names.is_empty() {
            return Err(validation_error!("multi_af_names must not be empty"));
        }
        Ok(())
    }

    pub fn with_popsize(mut self, n: usize) -> Self {
        self.popsize = n;
        self
    }

    pub fn with_max_fevals(mut self, n: usize) -> Self {
        self.max_fevals = n;
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_sampling_method(mut self, method: SamplingMethod) -> Self {
        self.sampling_method = method;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_when_options_are_empty() {
        let config = BayesOptConfig::from_strategy_options(&json!({})).unwrap();
        assert_eq!(config, BayesOptConfig::default());
        let config = BayesOptConfig::from_strategy_options(&serde_json::Value::Null).unwrap();
        assert_eq!(config.popsize, 20);
        assert_eq!(config.method, "multi-fast");
    }

    #[test]
    fn parses_recognized_keys() {
        let config = BayesOptConfig::from_strategy_options(&json!({
            "popsize": 0,
            "max_fevals": 10,
            "method": "ei",
            "sampling_method": "random",
            "covariance_kernel": "matern52",
            "exploration": 0.05,
            "seed": 7
        }))
        .unwrap();
        assert_eq!(config.popsize, 0);
        assert_eq!(config.max_fevals, 10);
        assert_eq!(config.sampling_method, SamplingMethod::Random);
        assert_eq!(config.covariance_kernel, CovarianceKernel::Matern52);
        assert_eq!(config.exploration, ExplorationFactor::Fixed(0.05));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn contextual_exploration_round_trips() {
        let config = BayesOptConfig::from_strategy_options(&json!({"exploration": "CV"})).unwrap();
        assert_eq!(config.exploration, ExplorationFactor::Contextual(Contextual::Cv));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["exploration"], json!("CV"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = BayesOptConfig::from_strategy_options(&json!({"popsiz": 3})).unwrap_err();
        assert!(err.to_string().contains("popsiz"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            json!({"max_fevals": 0}),
            json!({"covariance_lengthscale": -1.0}),
            json!({"multi_discount_factor": 0.0}),
            json!({"multi_af_names": []}),
            json!({"exploration": -0.5}),
        ] {
            assert!(BayesOptConfig::from_strategy_options(&bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn tuning_options_validate_params() {
        let empty = TuneParams::new().add_ints("x", &[]);
        assert!(TuningOptions::new(empty).is_err());
        assert!(TuningOptions::new(TuneParams::new()).is_err());
        let repeated = TuneParams::new().add_ints("block_size_x", &[32, 64, 32]);
        assert!(matches!(
            TuningOptions::new(repeated),
            Err(kt_types::TuneError::SearchSpace(
                kt_types::SearchSpaceError::DuplicateValue { .. }
            ))
        ));
        let nan = TuneParams::new().add_floats("ratio", &[f64::NAN]);
        assert!(TuningOptions::new(nan).is_err());

        let options = TuningOptions::new(TuneParams::new().add_ints("x", &[1, 2]))
            .unwrap()
            .with_budget(Some(5), None)
            .with_objective(ObjectiveDirection::Maximize);
        assert_eq!(options.max_fevals, Some(5));
        assert!(options.scaling);
        assert_eq!(options.block_size_names.len(), 3);
    }
}
