//! Acquisition functions and the policies that choose between them.
//!
//! Every acquisition score is expressed in the orientation of the objective:
//! when minimizing, lower scores are more desirable; when maximizing, higher
//! ones are. Candidate selection can then use
//! [`ObjectiveDirection::is_better_than`] for both the optimum and the
//! acquisition scores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use kt_types::{StrategyError, TuneError, TuneResult};

use crate::config::BayesOptConfig;
use crate::surrogate::Prediction;
use crate::trial::ObjectiveDirection;

/// Standard deviation below which a prediction is treated as certain.
const MIN_STD: f64 = 1e-12;

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Zelen & Severo rational approximation, |error| < 7.5e-8).
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782
                + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let upper = norm_pdf(x.abs()) * poly;
    if x >= 0.0 {
        1.0 - upper
    } else {
        upper
    }
}

/// Inputs shared by all candidates in one scoring pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionContext {
    pub optimum: f64,
    pub direction: ObjectiveDirection,
    /// Absolute margin a candidate must beat the optimum by (EI, POI).
    pub exploration: f64,
    /// Confidence-bound width (LCB).
    pub kappa: f64,
}

impl AcquisitionContext {
    /// Predicted improvement over the optimum, positive when better.
    fn improvement(&self, mean: f64) -> f64 {
        match self.direction {
            ObjectiveDirection::Minimize => (self.optimum - self.exploration) - mean,
            ObjectiveDirection::Maximize => mean - (self.optimum + self.exploration),
        }
    }

    /// Express a "higher is more desirable" quantity in objective orientation.
    fn orient(&self, desirability: f64) -> f64 {
        match self.direction {
            ObjectiveDirection::Minimize => -desirability,
            ObjectiveDirection::Maximize => desirability,
        }
    }
}

/// Scores a candidate from its predicted mean and uncertainty.
pub trait Acquisition {
    fn name(&self) -> &'static str;

    fn score(&self, mean: f64, std: f64, ctx: &AcquisitionContext) -> f64;

    fn score_all(&self, prediction: &Prediction, ctx: &AcquisitionContext) -> Vec<f64> {
        prediction
            .means
            .iter()
            .zip(&prediction.stds)
            .map(|(&m, &s)| self.score(m, s, ctx))
            .collect()
    }
}

/// The basic acquisition functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionFunction {
    #[serde(rename = "ei")]
    ExpectedImprovement,
    #[serde(rename = "poi")]
    ProbabilityOfImprovement,
    #[serde(rename = "lcb")]
    LowerConfidenceBound,
}

impl AcquisitionFunction {
    pub const ALL: [AcquisitionFunction; 3] = [
        Self::ExpectedImprovement,
        Self::ProbabilityOfImprovement,
        Self::LowerConfidenceBound,
    ];
}

impl Acquisition for AcquisitionFunction {
    fn name(&self) -> &'static str {
        match self {
            Self::ExpectedImprovement => "ei",
            Self::ProbabilityOfImprovement => "poi",
            Self::LowerConfidenceBound => "lcb",
        }
    }

    fn score(&self, mean: f64, std: f64, ctx: &AcquisitionContext) -> f64 {
        match self {
            Self::ExpectedImprovement => {
                let improvement = ctx.improvement(mean);
                let ei = if std < MIN_STD {
                    improvement.max(0.0)
                } else {
                    let z = improvement / std;
                    (improvement * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
                };
                ctx.orient(ei)
            }
            Self::ProbabilityOfImprovement => {
                let improvement = ctx.improvement(mean);
                let p = if std < MIN_STD {
                    if improvement > 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    norm_cdf(improvement / std)
                };
                ctx.orient(p)
            }
            Self::LowerConfidenceBound => match ctx.direction {
                ObjectiveDirection::Minimize => mean - ctx.kappa * std,
                ObjectiveDirection::Maximize => mean + ctx.kappa * std,
            },
        }
    }
}

impl FromStr for AcquisitionFunction {
    type Err = TuneError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|af| af.name() == name)
            .ok_or_else(|| {
                StrategyError::UnknownAcquisitionFunction {
                    name: name.to_string(),
                }
                .into()
            })
    }
}

impl fmt::Display for AcquisitionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Look up a basic acquisition function by its short name.
pub fn acquisition_by_name(name: &str) -> TuneResult<AcquisitionFunction> {
    name.parse()
}

/// Index of the best score not yet taken, first occurrence on ties.
pub fn select_best(scores: &[f64], direction: ObjectiveDirection, taken: &[bool]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() || taken.get(i).copied().unwrap_or(false) {
            continue;
        }
        match best {
            Some((_, b)) if !direction.is_better_than(score, b) => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// How a multi policy rotates through its portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiSchedule {
    /// One surrogate fit per round; each member picks one candidate in turn.
    RoundRobin,
    /// Each iteration the member with the highest discounted credit picks.
    Discounted,
}

/// Portfolio of acquisition functions with a rotation schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPolicy {
    portfolio: Vec<AcquisitionFunction>,
    schedule: MultiSchedule,
    credits: Vec<f64>,
    discount: f64,
    active: usize,
}

impl MultiPolicy {
    pub fn new(
        portfolio: Vec<AcquisitionFunction>,
        schedule: MultiSchedule,
        discount: f64,
    ) -> Self {
        let credits = vec![1.0; portfolio.len()];
        Self {
            portfolio,
            schedule,
            credits,
            discount,
            active: 0,
        }
    }

    pub fn portfolio(&self) -> &[AcquisitionFunction] {
        &self.portfolio
    }

    pub fn schedule(&self) -> MultiSchedule {
        self.schedule
    }

    pub fn credits(&self) -> &[f64] {
        &self.credits
    }

    pub fn active(&self) -> AcquisitionFunction {
        self.portfolio[self.active]
    }

    pub fn active_position(&self) -> usize {
        self.active
    }

    pub fn set_active(&mut self, position: usize) {
        if position < self.portfolio.len() {
            self.active = position;
        }
    }

    /// Make the member with the highest credit active (first on ties).
    pub fn select_by_credit(&mut self) -> AcquisitionFunction {
        let mut best = 0;
        for (i, &credit) in self.credits.iter().enumerate() {
            if credit > self.credits[best] {
                best = i;
            }
        }
        self.active = best;
        self.active()
    }

    /// Credit the active member with whether its pick improved the optimum.
    pub fn reward(&mut self, improved: bool) {
        let gain = if improved { 1.0 } else { 0.0 };
        let credit = &mut self.credits[self.active];
        *credit = self.discount * *credit + (1.0 - self.discount) * gain;
    }
}

/// The decision policy used by the optimization loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionPolicy {
    Single(AcquisitionFunction),
    Multi(MultiPolicy),
}

impl AcquisitionPolicy {
    pub const MULTI: &'static str = "multi";
    pub const MULTI_FAST: &'static str = "multi-fast";

    /// Resolve a policy name, taking the portfolio settings from `config`.
    pub fn from_name(name: &str, config: &BayesOptConfig) -> TuneResult<Self> {
        let schedule = match name {
            Self::MULTI => MultiSchedule::Discounted,
            Self::MULTI_FAST => MultiSchedule::RoundRobin,
            single => return Ok(Self::Single(acquisition_by_name(single)?)),
        };
        let portfolio = config
            .multi_af_names
            .iter()
            .map(|n| acquisition_by_name(n))
            .collect::<TuneResult<Vec<_>>>()?;
        if portfolio.is_empty() {
            return Err(StrategyError::InvalidConfig {
                message: "multi policy needs at least one acquisition function".to_string(),
            }
            .into());
        }
        Ok(Self::Multi(MultiPolicy::new(
            portfolio,
            schedule,
            config.multi_discount_factor,
        )))
    }

    /// Policy name as accepted by [`AcquisitionPolicy::from_name`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single(af) => af.name(),
            Self::Multi(multi) => match multi.schedule {
                MultiSchedule::Discounted => Self::MULTI,
                MultiSchedule::RoundRobin => Self::MULTI_FAST,
            },
        }
    }

    /// The function that will score the next candidate.
    pub fn active(&self) -> AcquisitionFunction {
        match self {
            Self::Single(af) => *af,
            Self::Multi(multi) => multi.active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(direction: ObjectiveDirection, optimum: f64) -> AcquisitionContext {
        AcquisitionContext {
            optimum,
            direction,
            exploration: 0.0,
            kappa: 2.0,
        }
    }

    #[test]
    fn dispatch_by_name() {
        for name in ["ei", "poi", "lcb"] {
            let af = acquisition_by_name(name).unwrap();
            assert_eq!(af.name(), name);
            let score = af.score(1.0, 0.5, &ctx(ObjectiveDirection::Minimize, 1.0));
            assert!(score.is_finite());
        }
    }

    #[test]
    fn unknown_name_fails() {
        let err = acquisition_by_name("gp-hedge").unwrap_err();
        assert!(matches!(
            err,
            TuneError::Strategy(StrategyError::UnknownAcquisitionFunction { ref name })
                if name == "gp-hedge"
        ));
        let config = BayesOptConfig::default();
        assert!(AcquisitionPolicy::from_name("multi-slow", &config).is_err());
    }

    #[test]
    fn normal_cdf_matches_known_values() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((norm_cdf(-1.0) - 0.158_655_25).abs() < 1e-6);
        assert_eq!(norm_cdf(-9.0), 0.0);
        assert_eq!(norm_cdf(9.0), 1.0);
    }

    #[test]
    fn ei_prefers_lower_mean_when_minimizing() {
        let c = ctx(ObjectiveDirection::Minimize, 5.0);
        let ei = AcquisitionFunction::ExpectedImprovement;
        let good = ei.score(3.0, 1.0, &c);
        let bad = ei.score(7.0, 1.0, &c);
        assert!(ObjectiveDirection::Minimize.is_better_than(good, bad));
        assert!(good <= 0.0 && bad <= 0.0);
    }

    #[test]
    fn ei_prefers_higher_mean_when_maximizing() {
        let c = ctx(ObjectiveDirection::Maximize, 5.0);
        let ei = AcquisitionFunction::ExpectedImprovement;
        let good = ei.score(7.0, 1.0, &c);
        let bad = ei.score(3.0, 1.0, &c);
        assert!(ObjectiveDirection::Maximize.is_better_than(good, bad));
    }

    #[test]
    fn ei_rewards_uncertainty_at_the_optimum() {
        let c = ctx(ObjectiveDirection::Minimize, 5.0);
        let ei = AcquisitionFunction::ExpectedImprovement;
        let certain = ei.score(5.0, 0.0, &c);
        let uncertain = ei.score(5.0, 2.0, &c);
        assert_eq!(certain, 0.0);
        assert!(ObjectiveDirection::Minimize.is_better_than(uncertain, certain));
    }

    #[test]
    fn poi_is_a_probability() {
        let poi = AcquisitionFunction::ProbabilityOfImprovement;
        for direction in [ObjectiveDirection::Minimize, ObjectiveDirection::Maximize] {
            let c = ctx(direction, 1.0);
            for (mean, std) in [(0.0, 1.0), (2.0, 0.5), (1.0, 0.0), (0.5, 0.0)] {
                let p = poi.score(mean, std, &c).abs();
                assert!((0.0..=1.0).contains(&p));
            }
        }
        let c = ctx(ObjectiveDirection::Minimize, 1.0);
        assert_eq!(poi.score(0.5, 0.0, &c), -1.0);
    }

    #[test]
    fn exploration_margin_lowers_improvement() {
        let poi = AcquisitionFunction::ProbabilityOfImprovement;
        let plain = ctx(ObjectiveDirection::Minimize, 5.0);
        let cautious = AcquisitionContext {
            exploration: 1.0,
            ..plain
        };
        // Less likely to beat a stricter target.
        assert!(poi.score(4.5, 1.0, &cautious) > poi.score(4.5, 1.0, &plain));
    }

    #[test]
    fn lcb_bounds_follow_direction() {
        let lcb = AcquisitionFunction::LowerConfidenceBound;
        assert_eq!(lcb.score(3.0, 1.0, &ctx(ObjectiveDirection::Minimize, 0.0)), 1.0);
        assert_eq!(lcb.score(3.0, 1.0, &ctx(ObjectiveDirection::Maximize, 0.0)), 5.0);
    }

    #[test]
    fn select_best_breaks_ties_by_order() {
        let scores = [2.0, 1.0, 1.0, f64::NAN, 3.0];
        let none = [false; 5];
        assert_eq!(select_best(&scores, ObjectiveDirection::Minimize, &none), Some(1));
        let taken = [false, true, false, false, false];
        assert_eq!(select_best(&scores, ObjectiveDirection::Minimize, &taken), Some(2));
        assert_eq!(select_best(&scores, ObjectiveDirection::Maximize, &none), Some(4));
        assert_eq!(select_best(&[], ObjectiveDirection::Maximize, &[]), None);
    }

    #[test]
    fn score_all_matches_pointwise() {
        let prediction = Prediction {
            means: vec![1.0, 2.0],
            stds: vec![0.5, 0.1],
            contextual_stds: vec![0.5, 0.1],
        };
        let c = ctx(ObjectiveDirection::Minimize, 1.5);
        for af in AcquisitionFunction::ALL {
            let all = af.score_all(&prediction, &c);
            assert_eq!(all[0], af.score(1.0, 0.5, &c));
            assert_eq!(all[1], af.score(2.0, 0.1, &c));
        }
    }

    #[test]
    fn policy_names_round_trip() {
        let config = BayesOptConfig::default();
        for name in ["ei", "poi", "lcb", "multi", "multi-fast"] {
            assert_eq!(AcquisitionPolicy::from_name(name, &config).unwrap().name(), name);
        }
    }

    #[test]
    fn multi_fast_uses_configured_portfolio() {
        let mut config = BayesOptConfig::default();
        config.multi_af_names = vec!["lcb".into(), "ei".into()];
        match AcquisitionPolicy::from_name("multi-fast", &config).unwrap() {
            AcquisitionPolicy::Multi(multi) => {
                assert_eq!(
                    multi.portfolio(),
                    &[
                        AcquisitionFunction::LowerConfidenceBound,
                        AcquisitionFunction::ExpectedImprovement,
                    ]
                );
                assert_eq!(multi.schedule(), MultiSchedule::RoundRobin);
            }
            other => panic!("expected multi policy, got {other:?}"),
        }
        config.multi_af_names = vec!["ei".into(), "bogus".into()];
        assert!(AcquisitionPolicy::from_name("multi", &config).is_err());
    }

    #[test]
    fn discounted_credit_rotates_after_stalls() {
        let mut multi = MultiPolicy::new(
            AcquisitionFunction::ALL.to_vec(),
            MultiSchedule::Discounted,
            0.65,
        );
        assert_eq!(multi.select_by_credit(), AcquisitionFunction::ExpectedImprovement);
        multi.reward(true);
        assert_eq!(multi.select_by_credit(), AcquisitionFunction::ExpectedImprovement);
        multi.reward(false);
        assert_eq!(multi.select_by_credit(), AcquisitionFunction::ProbabilityOfImprovement);
        multi.reward(false);
        assert_eq!(multi.select_by_credit(), AcquisitionFunction::LowerConfidenceBound);
        multi.reward(false);
        // All stalled once: first member leads again.
        assert_eq!(multi.select_by_credit(), AcquisitionFunction::ExpectedImprovement);
    }
}
