//! Gaussian-process surrogate over the pruned normalized space.
//!
//! Targets are standardized before fitting (zero mean, unit spread) so a unit
//! signal variance is appropriate for any cost scale. Predictions are made in
//! chunks of candidates with one triangular solve per chunk, and chunks run in
//! parallel.

use nalgebra::{linalg::Cholesky, DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use kt_types::{StrategyError, TuneResult};

use crate::config::CovarianceKernel;

/// Candidates per prediction chunk.
const PREDICT_CHUNK: usize = 256;

/// Attempts at factorizing with growing diagonal jitter.
const MAX_JITTER_ATTEMPTS: usize = 6;

const SQRT_3: f64 = 1.732_050_807_568_877_2;
const SQRT_5: f64 = 2.236_067_977_499_79;

/// Batch prediction over a list of configurations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub means: Vec<f64>,
    /// Standard deviations in score units.
    pub stds: Vec<f64>,
    /// Standard deviations in units of the observed score spread.
    pub contextual_stds: Vec<f64>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Regression model trained on observed (configuration, score) pairs.
pub trait Surrogate: Send + Sync {
    /// Train from scratch on the given observations.
    fn fit(&mut self, x: &[&[f64]], y: &[f64]) -> TuneResult<()>;

    fn predict_batch(&self, x: &[&[f64]]) -> TuneResult<Prediction>;

    fn is_fitted(&self) -> bool;
}

impl CovarianceKernel {
    /// Correlation between two points at scaled distance `r`.
    fn correlation(self, r: f64) -> f64 {
        match self {
            Self::Matern32 => {
                let s = SQRT_3 * r;
                (1.0 + s) * (-s).exp()
            }
            Self::Matern52 => {
                let s = SQRT_5 * r;
                (1.0 + s + 5.0 / 3.0 * r * r) * (-s).exp()
            }
            Self::Rbf => (-0.5 * r * r).exp(),
        }
    }
}

fn scaled_distance(a: &[f64], b: &[f64], lengthscale: f64) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (x - y) / lengthscale;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Mean and spread of the targets, computed without overflow for scores
/// close to the largest finite float. A zero spread becomes 1.
fn standardization(y: &[f64]) -> TuneResult<(f64, f64)> {
    let mut mean = 0.0;
    for (i, v) in y.iter().enumerate() {
        mean += (v - mean) / (i + 1) as f64;
    }
    let scale = y.iter().map(|v| (v - mean).abs()).fold(0.0, f64::max);
    if !mean.is_finite() || !scale.is_finite() {
        return Err(StrategyError::SurrogateFit {
            message: format!("target scale out of range (mean {mean:e}, deviation {scale:e})"),
        }
        .into());
    }
    if scale <= 1e-12 {
        return Ok((mean, 1.0));
    }
    let n = y.len() as f64;
    let relative = y.iter().map(|v| ((v - mean) / scale).powi(2)).sum::<f64>() / n;
    let spread = scale * relative.sqrt();
    Ok((mean, if spread > 1e-12 { spread } else { 1.0 }))
}

#[derive(Debug, Clone)]
struct FittedModel {
    x_train: Vec<Vec<f64>>,
    /// Lower Cholesky factor of K + jitter·I.
    l: DMatrix<f64>,
    /// (K + jitter·I)^-1 y, standardized.
    alpha: DVector<f64>,
    y_mean: f64,
    y_spread: f64,
}

/// Exact GP regression with a stationary kernel and fixed lengthscale.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: CovarianceKernel,
    lengthscale: f64,
    noise: f64,
    model: Option<FittedModel>,
}

impl GaussianProcess {
    pub fn new(kernel: CovarianceKernel, lengthscale: f64, noise: f64) -> Self {
        Self {
            kernel,
            lengthscale,
            noise,
            model: None,
        }
    }

    fn k(&self, a: &[f64], b: &[f64]) -> f64 {
        self.kernel.correlation(scaled_distance(a, b, self.lengthscale))
    }

    /// Observed score spread the current fit was standardized with.
    pub fn score_spread(&self) -> Option<f64> {
        self.model.as_ref().map(|m| m.y_spread)
    }

    fn predict_chunk(
        &self,
        model: &FittedModel,
        chunk: &[&[f64]],
    ) -> TuneResult<Vec<(f64, f64, f64)>> {
        let n = model.x_train.len();
        let k_star = DMatrix::from_fn(chunk.len(), n, |i, j| self.k(chunk[i], &model.x_train[j]));
        let means = &k_star * &model.alpha;
        let v = model
            .l
            .solve_lower_triangular(&k_star.transpose())
            .ok_or_else(|| StrategyError::SurrogatePredict {
                message: "singular Cholesky factor".to_string(),
            })?;

        Ok((0..chunk.len())
            .map(|i| {
                let var = (1.0 - v.column(i).norm_squared()).max(0.0);
                let std_standardized = var.sqrt();
                (
                    means[i] * model.y_spread + model.y_mean,
                    std_standardized * model.y_spread,
                    std_standardized,
                )
            })
            .collect())
    }
}

impl Surrogate for GaussianProcess {
    fn fit(&mut self, x: &[&[f64]], y: &[f64]) -> TuneResult<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(StrategyError::SurrogateFit {
                message: format!(
                    "need matching non-empty data, got {} inputs and {} targets",
                    x.len(),
                    y.len()
                ),
            }
            .into());
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(StrategyError::SurrogateFit {
                message: "targets must be finite".to_string(),
            }
            .into());
        }

        let (y_mean, y_spread) = standardization(y)?;
        let y_standardized =
            DVector::from_iterator(y.len(), y.iter().map(|v| (v - y_mean) / y_spread));

        let base = DMatrix::from_fn(x.len(), x.len(), |i, j| self.k(x[i], x[j]));
        let mut jitter = self.noise.max(1e-10);
        let mut cholesky = None;
        for attempt in 0..MAX_JITTER_ATTEMPTS {
            let mut k = base.clone();
            for i in 0..x.len() {
                k[(i, i)] += jitter;
            }
            if let Some(c) = Cholesky::new(k) {
                cholesky = Some(c);
                break;
            }
            debug!("Cholesky failed at jitter {jitter:e} (attempt {attempt}), retrying");
            jitter *= 10.0;
        }
        let cholesky = cholesky.ok_or_else(|| StrategyError::SurrogateFit {
            message: format!("covariance matrix not positive definite after jitter {jitter:e}"),
        })?;

        let alpha = cholesky.solve(&y_standardized);
        self.model = Some(FittedModel {
            x_train: x.iter().map(|c| c.to_vec()).collect(),
            l: cholesky.l(),
            alpha,
            y_mean,
            y_spread,
        });
        Ok(())
    }

    fn predict_batch(&self, x: &[&[f64]]) -> TuneResult<Prediction> {
        let model = self.model.as_ref().ok_or_else(|| StrategyError::SurrogatePredict {
            message: "model has not been fitted".to_string(),
        })?;
        let dims = model.x_train[0].len();
        if let Some(bad) = x.iter().find(|c| c.len() != dims) {
            return Err(StrategyError::SurrogatePredict {
                message: format!("expected {dims} dimensions, got {}", bad.len()),
            }
            .into());
        }

        let chunks = x
            .par_chunks(PREDICT_CHUNK)
            .map(|chunk| self.predict_chunk(model, chunk))
            .collect::<TuneResult<Vec<_>>>()?;

        let mut prediction = Prediction {
            means: Vec::with_capacity(x.len()),
            stds: Vec::with_capacity(x.len()),
            contextual_stds: Vec::with_capacity(x.len()),
        };
        for (mean, std, contextual) in chunks.into_iter().flatten() {
            prediction.means.push(mean);
            prediction.stds.push(std);
            prediction.contextual_stds.push(contextual);
        }
        Ok(prediction)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}
