use crate::error::{Error, Result};
use crate::logfact::ln_beta;
use crate::shrink;
use log::debug;
use serde::{Deserialize, Serialize};

/// `successes` out of `trials` for one group. Always satisfies `successes <= trials`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CountObservation {
    successes: u64,
    trials: u64,
}

impl CountObservation {
    pub fn new(successes: u64, trials: u64) -> Option<Self> {
        if successes > trials {
            return None;
        }
        Some(Self { successes, trials })
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn trials(&self) -> u64 {
        self.trials
    }

    pub fn failures(&self) -> u64 {
        self.trials - self.successes
    }

    /// Observed success fraction, `None` for a group without trials.
    pub fn proportion(&self) -> Option<f64> {
        if self.trials == 0 {
            return None;
        }
        Some(self.successes as f64 / self.trials as f64)
    }
}

/// Validates raw (successes, trials) pairs, failing on the first pair with a
/// negative count or more successes than trials.
pub fn observations_from_counts<I>(counts: I) -> Result<Vec<CountObservation>>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    counts
        .into_iter()
        .enumerate()
        .map(|(index, (successes, trials))| {
            let k = u64::try_from(successes).ok();
            let n = u64::try_from(trials).ok();
            k.zip(n)
                .and_then(|(k, n)| CountObservation::new(k, n))
                .ok_or(Error::InvalidObservation {
                    index,
                    successes,
                    trials,
                })
        })
        .collect()
}

/// Shape parameters of a Beta prior.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaParams {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta: 2.0,
        }
    }
}

impl BetaParams {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Both shapes finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.alpha > 0.0 && self.beta > 0.0
    }

    /// Method-of-moments estimate from the observed success fractions.
    /// Groups without trials are skipped.
    pub fn from_moments(observations: &[CountObservation]) -> Option<Self> {
        let mut mean = 0.0;
        let mut sum_sq = 0.0;
        let mut count = 0.0;
        for proportion in observations.iter().filter_map(|o| o.proportion()) {
            mean += proportion;
            sum_sq += proportion * proportion;
            count += 1.0;
        }
        if count < 2.0 {
            debug!("Too few groups with trials for a moment estimate");
            return None;
        }
        mean /= count;
        let variance = sum_sq / count - mean * mean;
        if variance < 1e-12 {
            debug!("Variance is too small, cannot estimate Beta moments.");
            return None;
        }
        let common = mean * (1.0 - mean) / variance - 1.0;
        if common <= 0.0 {
            debug!("Common term is non-positive, cannot estimate Beta moments.");
            return None;
        }
        let params = BetaParams::new(mean * common, (1.0 - mean) * common);
        params.is_valid().then_some(params)
    }

    /// Prior mean a / (a + b).
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn variance(&self) -> f64 {
        let numerator = self.alpha * self.beta;
        let denominator = (self.alpha + self.beta).powf(2.0) * (self.alpha + self.beta + 1.0);
        numerator / denominator
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn log_beta(&self) -> f64 {
        ln_beta(self.alpha, self.beta)
    }

    /// Conjugate update with `successes` out of `trials`.
    pub fn posterior(&self, successes: u64, trials: u64) -> Self {
        let failures = trials.saturating_sub(successes);
        Self {
            alpha: self.alpha + successes as f64,
            beta: self.beta + failures as f64,
        }
    }

    /// Posterior mean for one group, see [`shrink::shrink`].
    pub fn shrink(&self, successes: u64, trials: u64) -> f64 {
        shrink::shrink(successes, trials, self.alpha, self.beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_observation_rejects_more_successes_than_trials() {
        assert!(CountObservation::new(3, 2).is_none());
        let obs = CountObservation::new(2, 5).unwrap();
        assert_eq!(obs.successes(), 2);
        assert_eq!(obs.trials(), 5);
        assert_eq!(obs.failures(), 3);
        assert_eq!(obs.proportion(), Some(0.4));
        assert_eq!(CountObservation::new(0, 0).unwrap().proportion(), None);
    }

    #[test]
    fn test_observations_from_counts() {
        let obs = observations_from_counts(vec![(1, 2), (0, 0), (4, 4)]).unwrap();
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[2].successes(), 4);
    }

    #[test]
    fn test_observations_from_counts_reports_offending_index() {
        for (pairs, bad) in vec![
            (vec![(1, 2), (3, 2)], 1),
            (vec![(-1, 2)], 0),
            (vec![(0, 1), (0, 1), (0, -1)], 2),
        ] {
            match observations_from_counts(pairs) {
                Err(Error::InvalidObservation { index, .. }) => assert_eq!(index, bad),
                other => panic!("expected InvalidObservation, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_beta_params_moments() {
        let params = BetaParams::new(3.0, 7.0);
        assert!((params.mean() - 0.3).abs() < 1e-12);
        assert!((params.variance() - 21.0 / 1100.0).abs() < 1e-12);
        assert!((params.standard_deviation() - (21.0f64 / 1100.0).sqrt()).abs() < 1e-12);
        assert!(params.is_valid());
        assert!(!BetaParams::new(0.0, 1.0).is_valid());
        assert!(!BetaParams::new(1.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_posterior_update() {
        let prior = BetaParams::new(1.0, 1.0);
        let posterior = prior.posterior(3, 5);
        assert_eq!(posterior, BetaParams::new(4.0, 3.0));
        assert!((prior.shrink(3, 5) - posterior.mean()).abs() < 1e-12);
    }

    #[test]
    fn test_from_moments() {
        let obs = observations_from_counts(vec![(1, 10), (3, 10), (5, 10), (2, 10), (0, 0)]).unwrap();
        let params = BetaParams::from_moments(&obs).unwrap();
        assert!(params.is_valid());
        assert!((params.mean() - 0.275).abs() < 1e-12);
    }

    #[test]
    fn test_from_moments_degenerate() {
        let equal = observations_from_counts(vec![(1, 2), (1, 2), (2, 4)]).unwrap();
        assert!(BetaParams::from_moments(&equal).is_none());
        let single = observations_from_counts(vec![(1, 2)]).unwrap();
        assert!(BetaParams::from_moments(&single).is_none());
        // all-or-nothing fractions have variance mean * (1 - mean)
        let extreme = observations_from_counts(vec![(0, 1), (1, 1)]).unwrap();
        assert!(BetaParams::from_moments(&extreme).is_none());
    }
}
