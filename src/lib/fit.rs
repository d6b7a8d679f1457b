use crate::error::{Error, Result};
use crate::likelihood::BetaBinomialLikelihood;
use crate::model::{BetaParams, CountObservation};
use crate::optimizer::{Minimizer, NelderMead};
use log::{debug, info, warn};
use serde::Serialize;

/// Prior strength α + β above which the likelihood is treated as flat and
/// no standard errors are reported.
pub const MAX_PRIOR_STRENGTH: f64 = 1e6;

/// Starting point of the search.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum InitialGuess {
    Fixed(BetaParams),
    /// Moment estimate from the observed fractions, (2, 2) when it is degenerate.
    MethodOfMoments,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FitOptions {
    pub initial: InitialGuess,
    pub xtol: f64,
    pub ftol: f64,
    pub max_iter: usize,
    pub max_evaluations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial: InitialGuess::Fixed(BetaParams::default()),
            xtol: 1e-4,
            ftol: 1e-4,
            max_iter: 500,
            max_evaluations: 1000,
        }
    }
}

impl FitOptions {
    pub fn with_initial(mut self, alpha: f64, beta: f64) -> Self {
        self.initial = InitialGuess::Fixed(BetaParams::new(alpha, beta));
        self
    }

    pub fn with_method_of_moments(mut self) -> Self {
        self.initial = InitialGuess::MethodOfMoments;
        self
    }

    /// Sets both the parameter and the objective tolerance.
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.xtol = tol;
        self.ftol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, tol) in [("xtol", self.xtol), ("ftol", self.ftol)] {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(Error::InvalidOption {
                    reason: format!("{} must be positive and finite, got {}", name, tol),
                });
            }
        }
        if self.max_iter == 0 || self.max_evaluations == 0 {
            return Err(Error::InvalidOption {
                reason: "iteration and evaluation limits must be at least 1".to_string(),
            });
        }
        if let InitialGuess::Fixed(params) = self.initial {
            if !params.is_valid() {
                return Err(Error::InvalidOption {
                    reason: format!(
                        "initial parameters must be positive, got ({}, {})",
                        params.alpha, params.beta
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn nelder_mead(&self) -> NelderMead {
        NelderMead::new(self.xtol, self.ftol, self.max_iter, self.max_evaluations)
    }

    fn start(&self, observations: &[CountObservation]) -> BetaParams {
        match self.initial {
            InitialGuess::Fixed(params) => params,
            InitialGuess::MethodOfMoments => BetaParams::from_moments(observations)
                .unwrap_or_else(|| {
                    debug!("Falling back to the default starting point");
                    BetaParams::default()
                }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FitResult {
    pub params: BetaParams,
    pub log_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
    pub evaluations: usize,
    pub n_observations: usize,
    /// Asymptotic standard errors of (alpha, beta), `None` when the
    /// observed information is not positive definite.
    pub standard_errors: Option<[f64; 2]>,
}

impl FitResult {
    pub fn prior_mean(&self) -> f64 {
        self.params.mean()
    }

    pub fn aic(&self) -> f64 {
        2.0 * 2.0 - 2.0 * self.log_likelihood
    }

    pub fn bic(&self) -> f64 {
        2.0 * (self.n_observations as f64).ln() - 2.0 * self.log_likelihood
    }

    /// Turns a non-converged fit into [`Error::FitDidNotConverge`].
    pub fn ensure_converged(&self) -> Result<&Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(Error::FitDidNotConverge {
                iterations: self.iterations,
            })
        }
    }
}

/// Maximum-likelihood Beta-Binomial fit with the default Nelder-Mead search.
pub fn fit_beta_binomial(observations: &[CountObservation], options: &FitOptions) -> Result<FitResult> {
    fit_beta_binomial_with(observations, options, &options.nelder_mead())
}

/// Maximum-likelihood Beta-Binomial fit with a caller-chosen minimizer.
///
/// A search that stops before reaching the tolerances is not an error: the
/// result carries the best point found and `converged = false`.
pub fn fit_beta_binomial_with<M: Minimizer>(
    observations: &[CountObservation],
    options: &FitOptions,
    minimizer: &M,
) -> Result<FitResult> {
    if observations.is_empty() {
        return Err(Error::EmptyInput);
    }
    options.validate()?;

    let objective = BetaBinomialLikelihood::new(observations);
    let start = options.start(observations);
    debug!(
        "Fitting beta-binomial to {} observations ({} distinct) from α = {:.4}, β = {:.4}",
        objective.n_observations(),
        objective.n_distinct(),
        start.alpha,
        start.beta
    );

    let minimum = minimizer.minimize(
        |x: &[f64]| objective.negative_log_likelihood(x[0], x[1]),
        &[start.alpha, start.beta],
    );
    let params = BetaParams::new(minimum.point[0], minimum.point[1]);
    if !minimum.converged {
        warn!(
            "Beta-binomial fit did not converge after {} iterations (α = {:.4}, β = {:.4})",
            minimum.iterations, params.alpha, params.beta
        );
    }
    let unbounded = params.alpha + params.beta > MAX_PRIOR_STRENGTH;
    if unbounded {
        warn!(
            "α + β = {:.3e} exceeds {:.0e}: the groups show no overdispersion and the prior \
             collapses to its mean {:.4}",
            params.alpha + params.beta,
            MAX_PRIOR_STRENGTH,
            params.mean()
        );
    }
    let standard_errors = if params.is_valid() && !unbounded {
        standard_errors(&objective, params)
    } else {
        None
    };
    info!(
        "Fitted α = {:.4}, β = {:.4}, prior mean = {:.4}, log-likelihood = {:.3}",
        params.alpha,
        params.beta,
        params.mean(),
        -minimum.value
    );

    Ok(FitResult {
        params,
        log_likelihood: -minimum.value,
        converged: minimum.converged,
        iterations: minimum.iterations,
        evaluations: minimum.evaluations,
        n_observations: objective.n_observations(),
        standard_errors,
    })
}

/// Inverse of the central finite-difference Hessian of the negative
/// log-likelihood.
fn standard_errors(objective: &BetaBinomialLikelihood, params: BetaParams) -> Option<[f64; 2]> {
    let f = |a: f64, b: f64| objective.negative_log_likelihood(a, b);
    let (a, b) = (params.alpha, params.beta);
    let (ha, hb) = (a * 1e-3, b * 1e-3);
    let f0 = f(a, b);

    let faa = (f(a + ha, b) - 2.0 * f0 + f(a - ha, b)) / (ha * ha);
    let fbb = (f(a, b + hb) - 2.0 * f0 + f(a, b - hb)) / (hb * hb);
    let fab = (f(a + ha, b + hb) - f(a + ha, b - hb) - f(a - ha, b + hb) + f(a - ha, b - hb))
        / (4.0 * ha * hb);

    let det = faa * fbb - fab * fab;
    if !(det.is_finite() && det > 0.0 && faa > 0.0) {
        debug!("Observed information is not positive definite");
        return None;
    }
    Some([(fbb / det).sqrt(), (faa / det).sqrt()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::observations_from_counts;
    use crate::optimizer::testing::StayPut;
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use statrs::distribution::Beta;

    fn simulate(alpha: f64, beta: f64, groups: usize, trials: u64, seed: u64) -> Vec<CountObservation> {
        let mut rng = StdRng::seed_from_u64(seed);
        let prior = Beta::new(alpha, beta).unwrap();
        (0..groups)
            .map(|_| {
                let p: f64 = prior.sample(&mut rng);
                let k = (0..trials).filter(|_| rng.gen_bool(p)).count() as u64;
                CountObservation::new(k, trials).unwrap()
            })
            .collect()
    }

    fn within(estimate: f64, truth: f64, rel: f64) -> bool {
        ((estimate - truth) / truth).abs() <= rel
    }

    #[test]
    fn test_empty_input() {
        let result = fit_beta_binomial(&[], &FitOptions::default());
        assert!(matches!(result, Err(Error::EmptyInput)));
    }

    #[test]
    fn test_invalid_options() {
        let obs = observations_from_counts(vec![(1, 2), (0, 2)]).unwrap();
        for options in [
            FitOptions::default().with_tolerance(0.0),
            FitOptions::default().with_tolerance(f64::NAN),
            FitOptions::default().with_max_iter(0),
            FitOptions::default().with_max_evaluations(0),
            FitOptions::default().with_initial(-1.0, 2.0),
        ] {
            assert!(matches!(
                fit_beta_binomial(&obs, &options),
                Err(Error::InvalidOption { .. })
            ));
        }
    }

    #[test]
    fn test_recovers_generating_parameters() {
        let obs = simulate(3.0, 7.0, 4000, 50, 7);
        let fit = fit_beta_binomial(&obs, &FitOptions::default()).unwrap();
        assert!(fit.converged);
        assert!(within(fit.params.alpha, 3.0, 0.15), "alpha = {}", fit.params.alpha);
        assert!(within(fit.params.beta, 7.0, 0.15), "beta = {}", fit.params.beta);
        assert_eq!(fit.n_observations, 4000);
        let se = fit.standard_errors.unwrap();
        assert!(se[0] > 0.0 && se[0] < 1.0);
        assert!(se[1] > 0.0 && se[1] < 2.0);
    }

    #[test]
    fn test_method_of_moments_start_reaches_same_optimum() {
        let obs = simulate(3.0, 7.0, 1500, 30, 11);
        let tight = FitOptions::default().with_tolerance(1e-8).with_max_iter(2000).with_max_evaluations(4000);
        let fixed = fit_beta_binomial(&obs, &tight).unwrap();
        let moments = fit_beta_binomial(&obs, &tight.clone().with_method_of_moments()).unwrap();
        assert!(fixed.converged && moments.converged);
        assert!(within(moments.params.alpha, fixed.params.alpha, 1e-3));
        assert!(within(moments.params.beta, fixed.params.beta, 1e-3));
    }

    #[test]
    fn test_log_likelihood_matches_objective() {
        let obs = observations_from_counts(vec![(1, 5), (3, 5), (0, 4), (4, 6), (2, 9), (8, 10)]).unwrap();
        let fit = fit_beta_binomial(&obs, &FitOptions::default()).unwrap();
        let direct = crate::likelihood::negative_log_likelihood(&obs, fit.params.alpha, fit.params.beta);
        assert!((fit.log_likelihood + direct).abs() < 1e-8);
        assert!((fit.aic() - (4.0 - 2.0 * fit.log_likelihood)).abs() < 1e-12);
        assert!((fit.bic() - (2.0 * 6f64.ln() - 2.0 * fit.log_likelihood)).abs() < 1e-12);
    }

    #[test]
    fn test_optimum_beats_neighbours() {
        let obs = simulate(2.0, 5.0, 300, 20, 3);
        let fit = fit_beta_binomial(&obs, &FitOptions::default().with_tolerance(1e-8)).unwrap();
        let objective = BetaBinomialLikelihood::new(&obs);
        let best = objective.negative_log_likelihood(fit.params.alpha, fit.params.beta);
        for (da, db) in [(1.05, 1.0), (0.95, 1.0), (1.0, 1.05), (1.0, 0.95)] {
            let other = objective.negative_log_likelihood(fit.params.alpha * da, fit.params.beta * db);
            assert!(best <= other);
        }
    }

    #[test]
    fn test_not_converged_is_returned_not_raised() {
        let obs = simulate(3.0, 7.0, 200, 20, 5);
        let fit = fit_beta_binomial(&obs, &FitOptions::default().with_max_iter(3)).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 3);
        assert!(fit.params.is_valid());
        assert!(fit.log_likelihood.is_finite());
        assert!(matches!(
            fit.ensure_converged(),
            Err(Error::FitDidNotConverge { iterations: 3 })
        ));
    }

    #[test]
    fn test_deterministic() {
        let obs = simulate(1.5, 4.0, 100, 15, 9);
        let first = fit_beta_binomial(&obs, &FitOptions::default()).unwrap();
        let second = fit_beta_binomial(&obs, &FitOptions::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_minimizer() {
        let obs = observations_from_counts(vec![(1, 2), (1, 1), (0, 2), (1, 1)]).unwrap();
        let options = FitOptions::default().with_initial(1.5, 2.5);
        let fit = fit_beta_binomial_with(&obs, &options, &StayPut).unwrap();
        assert_eq!(fit.params, BetaParams::new(1.5, 2.5));
        assert_eq!(fit.evaluations, 1);
        let direct = crate::likelihood::negative_log_likelihood(&obs, 1.5, 2.5);
        assert!((fit.log_likelihood + direct).abs() < 1e-10);
    }

    #[test]
    fn test_no_standard_errors_for_unbounded_prior() {
        let obs = observations_from_counts(vec![(3, 7), (4, 9), (2, 5), (5, 11)]).unwrap();
        let options = FitOptions::default().with_initial(4e6, 5e6);
        let fit = fit_beta_binomial_with(&obs, &options, &StayPut).unwrap();
        assert!(fit.params.is_valid());
        assert!(fit.params.alpha + fit.params.beta > MAX_PRIOR_STRENGTH);
        assert_eq!(fit.standard_errors, None);

        let bounded = fit_beta_binomial_with(&obs, &FitOptions::default(), &StayPut).unwrap();
        assert!(bounded.params.alpha + bounded.params.beta <= MAX_PRIOR_STRENGTH);
    }

    #[test]
    fn test_all_groups_without_trials() {
        let obs = observations_from_counts(vec![(0, 0), (0, 0)]).unwrap();
        let fit = fit_beta_binomial(&obs, &FitOptions::default()).unwrap();
        assert_eq!(fit.log_likelihood, 0.0);
        assert!(fit.params.is_valid());
    }
}
