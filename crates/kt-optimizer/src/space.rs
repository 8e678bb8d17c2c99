//! Enumeration of the valid configurations of a tuning problem.

use rand::seq::index;
use rand::Rng;
use tracing::debug;

use kt_types::{ConfigView, ParameterValue, SearchSpaceError, TuneParams, TuneResult};

use crate::config::TuningOptions;

/// Whether `values` passes the restrictions and the device thread bound.
pub fn config_valid(values: &[ParameterValue], options: &TuningOptions, max_threads: u64) -> bool {
    let view = options.tune_params.view(values);
    if block_threads(&view, &options.block_size_names) > max_threads {
        return false;
    }
    match &options.restrictions {
        Some(restriction) => restriction.check(&view),
        None => true,
    }
}

/// Product of the block-size parameters present in the configuration.
fn block_threads(view: &ConfigView<'_>, block_size_names: &[String]) -> u64 {
    block_size_names
        .iter()
        .filter_map(|name| view.get(name))
        .filter_map(|v| v.as_i64())
        .fold(1u64, |acc, v| acc.saturating_mul(v.max(0) as u64))
}

/// The ordered list of valid raw configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    params: TuneParams,
    configurations: Vec<Vec<ParameterValue>>,
}

impl SearchSpace {
    /// Cartesian product of the domains (last parameter varies fastest),
    /// with invalid configurations silently dropped.
    pub fn enumerate(options: &TuningOptions, max_threads: u64) -> TuneResult<Self> {
        options.tune_params.validate()?;

        let mut product: Vec<Vec<ParameterValue>> = vec![Vec::new()];
        for param in options.tune_params.iter() {
            let mut next = Vec::with_capacity(product.len() * param.values.len());
            for existing in &product {
                for value in &param.values {
                    let mut combo = Vec::with_capacity(options.tune_params.len());
                    combo.extend_from_slice(existing);
                    combo.push(value.clone());
                    next.push(combo);
                }
            }
            product = next;
        }

        let total = product.len();
        let configurations: Vec<Vec<ParameterValue>> = product
            .into_iter()
            .filter(|c| config_valid(c, options, max_threads))
            .collect();
        debug!(
            "Enumerated {} valid configurations out of {}",
            configurations.len(),
            total
        );

        if configurations.is_empty() {
            return Err(SearchSpaceError::EmptySearchSpace.into());
        }

        Ok(Self {
            params: options.tune_params.clone(),
            configurations,
        })
    }

    pub fn params(&self) -> &TuneParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[ParameterValue]> {
        self.configurations.get(index).map(Vec::as_slice)
    }

    pub fn configurations(&self) -> &[Vec<ParameterValue>] {
        &self.configurations
    }

    /// Up to `count` distinct configurations drawn uniformly at random.
    pub fn random_sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Vec<&[ParameterValue]> {
        let amount = count.min(self.configurations.len());
        index::sample(rng, self.configurations.len(), amount)
            .into_iter()
            .map(|i| self.configurations[i].as_slice())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kt_types::Restriction;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn options(params: TuneParams) -> TuningOptions {
        TuningOptions::new(params).unwrap()
    }

    #[test]
    fn enumerates_full_product_in_order() {
        let opts = options(
            TuneParams::new()
                .add_ints("x", &[1, 2, 3])
                .add_ints("y", &[4, 5, 6])
                .add_ints("z", &[7]),
        );
        let space = SearchSpace::enumerate(&opts, 1024).unwrap();
        assert_eq!(space.len(), 9);
        assert_eq!(
            space.get(0).unwrap(),
            &[ParameterValue::Int(1), ParameterValue::Int(4), ParameterValue::Int(7)]
        );
        assert_eq!(
            space.get(1).unwrap(),
            &[ParameterValue::Int(1), ParameterValue::Int(5), ParameterValue::Int(7)]
        );
        assert_eq!(
            space.get(8).unwrap(),
            &[ParameterValue::Int(3), ParameterValue::Int(6), ParameterValue::Int(7)]
        );
    }

    #[test]
    fn restrictions_filter_silently() {
        let opts = options(TuneParams::new().add_ints("x", &[1, 2, 3]).add_ints("y", &[1, 2, 3]))
            .with_restriction(Restriction::new(|c| {
                let x = c.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
                let y = c.get("y").and_then(|v| v.as_i64()).unwrap_or(0);
                x <= y
            }));
        let space = SearchSpace::enumerate(&opts, 1024).unwrap();
        assert_eq!(space.len(), 6);
    }

    #[test]
    fn thread_bound_filters_block_sizes() {
        let opts = options(
            TuneParams::new()
                .add_ints("block_size_x", &[32, 64, 128, 256])
                .add_ints("block_size_y", &[1, 2, 4]),
        );
        let space = SearchSpace::enumerate(&opts, 256).unwrap();
        for config in space.configurations() {
            let threads = config[0].as_i64().unwrap() * config[1].as_i64().unwrap();
            assert!(threads <= 256);
        }
        // 32x{1,2,4}, 64x{1,2,4}, 128x{1,2}, 256x{1}
        assert_eq!(space.len(), 9);
    }

    #[test]
    fn empty_space_is_an_error() {
        let opts = options(TuneParams::new().add_ints("block_size_x", &[2048]));
        let err = SearchSpace::enumerate(&opts, 1024).unwrap_err();
        assert!(matches!(
            err,
            kt_types::TuneError::SearchSpace(SearchSpaceError::EmptySearchSpace)
        ));
    }

    #[test]
    fn random_sample_is_distinct_and_bounded() {
        let opts = options(TuneParams::new().add_ints("x", &[1, 2, 3, 4, 5]));
        let space = SearchSpace::enumerate(&opts, 1024).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let sample = space.random_sample(3, &mut rng);
        assert_eq!(sample.len(), 3);
        let unique: HashSet<i64> = sample.iter().map(|c| c[0].as_i64().unwrap()).collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(space.random_sample(50, &mut rng).len(), 5);
    }
}
