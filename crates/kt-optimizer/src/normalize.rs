//! Normalization of raw parameter values onto evenly spaced positions, and
//! pruning of parameters that cannot vary.
//!
//! The i-th value of every domain maps to `eps * i + eps / 2`, so adjacent
//! raw values are exactly `eps` apart regardless of their magnitude. `eps` is
//! shared by all parameters so distances stay comparable across dimensions.

use kt_types::{
    format_configuration, ParameterValue, SearchSpaceError, TuneParams, TuneResult,
};

use crate::space::SearchSpace;

/// Spacing between neighboring normalized values.
///
/// With scaling, the smallest `1 / |domain|` over all parameters, so the
/// largest domain spans exactly `[0, 1]`. Without scaling, plain index steps.
pub fn compute_eps(params: &TuneParams, scaling: bool) -> f64 {
    if !scaling {
        return 1.0;
    }
    params
        .iter()
        .map(|p| 1.0 / p.values.len().max(1) as f64)
        .fold(1.0, f64::min)
}

#[derive(Debug, Clone, PartialEq)]
struct ParamMap {
    name: String,
    original: Vec<ParameterValue>,
    normalized: Vec<f64>,
}

/// Per-parameter bijection between raw values and normalized positions.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationMap {
    eps: f64,
    snap: bool,
    params: Vec<ParamMap>,
}

impl NormalizationMap {
    pub fn new(params: &TuneParams, eps: f64, snap: bool) -> Self {
        let params = params
            .iter()
            .map(|p| ParamMap {
                name: p.name.clone(),
                original: p.values.clone(),
                normalized: (0..p.values.len())
                    .map(|i| eps * i as f64 + 0.5 * eps)
                    .collect(),
            })
            .collect();
        Self { eps, snap, params }
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Normalized domain of the parameter at `index`.
    pub fn domain(&self, index: usize) -> &[f64] {
        self.params
            .get(index)
            .map(|p| p.normalized.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_normalized(&self, index: usize, value: &ParameterValue) -> TuneResult<f64> {
        let param = self.param(index)?;
        param
            .original
            .iter()
            .position(|v| v == value)
            .map(|i| param.normalized[i])
            .ok_or_else(|| {
                SearchSpaceError::Domain {
                    parameter: param.name.clone(),
                    value: value.to_string(),
                }
                .into()
            })
    }

    pub fn to_original(&self, index: usize, value: f64) -> TuneResult<&ParameterValue> {
        let param = self.param(index)?;
        if let Some(i) = param.normalized.iter().position(|&n| n == value) {
            return Ok(&param.original[i]);
        }
        if self.snap && value.is_finite() {
            let nearest = param
                .normalized
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
                .map(|(i, _)| i);
            if let Some(i) = nearest {
                return Ok(&param.original[i]);
            }
        }
        Err(SearchSpaceError::Domain {
            parameter: param.name.clone(),
            value: value.to_string(),
        }
        .into())
    }

    pub fn normalize(&self, raw: &[ParameterValue]) -> TuneResult<Vec<f64>> {
        self.check_len(raw.len())?;
        raw.iter()
            .enumerate()
            .map(|(i, v)| self.to_normalized(i, v))
            .collect()
    }

    pub fn denormalize(&self, normalized: &[f64]) -> TuneResult<Vec<ParameterValue>> {
        self.check_len(normalized.len())?;
        normalized
            .iter()
            .enumerate()
            .map(|(i, &v)| self.to_original(i, v).cloned())
            .collect()
    }

    pub fn normalize_space(&self, space: &SearchSpace) -> TuneResult<Vec<Vec<f64>>> {
        space
            .configurations()
            .iter()
            .map(|c| self.normalize(c))
            .collect()
    }

    fn param(&self, index: usize) -> TuneResult<&ParamMap> {
        self.params.get(index).ok_or_else(|| {
            SearchSpaceError::LengthMismatch {
                expected: self.params.len(),
                actual: index + 1,
            }
            .into()
        })
    }

    fn check_len(&self, actual: usize) -> TuneResult<()> {
        if actual != self.params.len() {
            return Err(SearchSpaceError::LengthMismatch {
                expected: self.params.len(),
                actual,
            }
            .into());
        }
        Ok(())
    }
}

/// Normalized space with the single-valued parameters stripped out.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedSpace {
    configurations: Vec<Vec<f64>>,
    /// One entry per original parameter: the fixed normalized value if the
    /// parameter was removed, `None` if it was kept.
    removed: Vec<Option<f64>>,
}

impl PrunedSpace {
    /// Remove every parameter whose domain has exactly one value.
    ///
    /// With `enabled = false` all coordinates are kept.
    pub fn prune(normalized_space: Vec<Vec<f64>>, map: &NormalizationMap, enabled: bool) -> Self {
        let removed: Vec<Option<f64>> = (0..map.len())
            .map(|i| match map.domain(i) {
                [only] if enabled => Some(*only),
                _ => None,
            })
            .collect();

        let configurations = if removed.iter().any(Option::is_some) {
            normalized_space
                .into_iter()
                .map(|c| strip(&c, &removed))
                .collect()
        } else {
            normalized_space
        };

        Self {
            configurations,
            removed,
        }
    }

    pub fn configurations(&self) -> &[Vec<f64>] {
        &self.configurations
    }

    pub fn removed(&self) -> &[Option<f64>] {
        &self.removed
    }

    pub fn removed_count(&self) -> usize {
        self.removed.iter().filter(|r| r.is_some()).count()
    }

    /// Dimensionality after pruning.
    pub fn dimensions(&self) -> usize {
        self.removed.len() - self.removed_count()
    }

    /// Strip the removed coordinates from a full normalized configuration.
    pub fn prune_one(&self, normalized: &[f64]) -> Vec<f64> {
        strip(normalized, &self.removed)
    }

    /// Reinsert the fixed values at their original positions.
    pub fn unprune(&self, pruned: &[f64]) -> TuneResult<Vec<f64>> {
        if pruned.len() != self.dimensions() {
            return Err(SearchSpaceError::LengthMismatch {
                expected: self.dimensions(),
                actual: pruned.len(),
            }
            .into());
        }
        let mut kept = pruned.iter();
        Ok(self
            .removed
            .iter()
            .map(|r| match r {
                Some(fixed) => *fixed,
                None => kept.next().copied().unwrap_or_default(),
            })
            .collect())
    }
}

fn strip(normalized: &[f64], removed: &[Option<f64>]) -> Vec<f64> {
    normalized
        .iter()
        .zip(removed)
        .filter(|(_, r)| r.is_none())
        .map(|(v, _)| *v)
        .collect()
}

/// Raw configuration to pruned normalized form, failing on unknown values.
pub fn to_pruned(
    raw: &[ParameterValue],
    map: &NormalizationMap,
    pruned: &PrunedSpace,
) -> TuneResult<Vec<f64>> {
    map.normalize(raw).map(|n| pruned.prune_one(&n)).map_err(|e| match e {
        kt_types::TuneError::SearchSpace(SearchSpaceError::LengthMismatch { .. }) => {
            SearchSpaceError::NotInSpace {
                configuration: format_configuration(raw),
            }
            .into()
        }
        other => other,
    })
}
