use crate::logfact::{ln_beta, ln_choose, LogFactorial};
use crate::model::CountObservation;
use ahash::AHashMap as HashMap;
use itertools::Itertools;

fn valid_shapes(a: f64, b: f64) -> bool {
    a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0
}

/// Log-probability of `k` successes in `n` trials under Beta-Binomial(a, b).
///
/// Returns 0 for `n = 0`, `-inf` for `k > n` and NaN when a shape is not
/// strictly positive.
pub fn log_pmf(k: u64, n: u64, a: f64, b: f64) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    if n == 0 {
        return 0.0;
    }
    if !valid_shapes(a, b) {
        return f64::NAN;
    }
    ln_choose(n, k) + ln_beta(k as f64 + a, (n - k) as f64 + b) - ln_beta(a, b)
}

/// [`log_pmf`] for every observation, in input order.
pub fn log_pmfs(observations: &[CountObservation], a: f64, b: f64) -> Vec<f64> {
    observations
        .iter()
        .map(|o| log_pmf(o.successes(), o.trials(), a, b))
        .collect()
}

/// `-sum(log_pmf)` over the observations. Non-positive or non-finite shapes
/// give `+inf` so a minimizer can step away from them.
pub fn negative_log_likelihood(observations: &[CountObservation], a: f64, b: f64) -> f64 {
    if !valid_shapes(a, b) {
        return f64::INFINITY;
    }
    let nll = -observations
        .iter()
        .map(|o| log_pmf(o.successes(), o.trials(), a, b))
        .sum::<f64>();
    if nll.is_nan() { f64::INFINITY } else { nll }
}

/// Beta-Binomial objective over a fixed set of observations.
///
/// Identical (k, n) pairs are collapsed into weights and the log-binomial
/// coefficients, which do not depend on (a, b), are summed once up front.
#[derive(Clone, Debug)]
pub struct BetaBinomialLikelihood {
    terms: Vec<(u64, u64, f64)>,
    n_observations: usize,
    n_informative: f64,
    ln_choose_total: f64,
}

impl BetaBinomialLikelihood {
    pub fn new(observations: &[CountObservation]) -> Self {
        let mut weights: HashMap<(u64, u64), u64> = HashMap::new();
        for obs in observations.iter().filter(|o| o.trials() > 0) {
            *weights.entry((obs.successes(), obs.trials())).or_insert(0) += 1;
        }
        let max_trials = weights.keys().map(|&(_, n)| n).max().unwrap_or(0);
        let log_factorial = LogFactorial::new(usize::try_from(max_trials).unwrap_or(usize::MAX));

        // Fixed order keeps the floating-point sum reproducible.
        let terms = weights
            .into_iter()
            .map(|((k, n), w)| (k, n, w as f64))
            .sorted_by_key(|&(k, n, _)| (n, k))
            .collect::<Vec<_>>();
        let ln_choose_total = terms
            .iter()
            .map(|&(k, n, w)| w * log_factorial.ln_choose(n, k))
            .sum();
        let n_informative = terms.iter().map(|&(_, _, w)| w).sum();

        Self {
            terms,
            n_observations: observations.len(),
            n_informative,
            ln_choose_total,
        }
    }

    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    /// Number of distinct (k, n) pairs with at least one trial.
    pub fn n_distinct(&self) -> usize {
        self.terms.len()
    }

    pub fn ln_choose_total(&self) -> f64 {
        self.ln_choose_total
    }

    /// Total log-likelihood, `-inf` outside the feasible region.
    pub fn log_likelihood(&self, a: f64, b: f64) -> f64 {
        -self.negative_log_likelihood(a, b)
    }

    pub fn negative_log_likelihood(&self, a: f64, b: f64) -> f64 {
        if !valid_shapes(a, b) {
            return f64::INFINITY;
        }
        let data_term: f64 = self
            .terms
            .iter()
            .map(|&(k, n, w)| w * ln_beta(k as f64 + a, (n - k) as f64 + b))
            .sum();
        let ll = self.ln_choose_total + data_term - self.n_informative * ln_beta(a, b);
        if ll.is_nan() { f64::INFINITY } else { -ll }
    }
}
