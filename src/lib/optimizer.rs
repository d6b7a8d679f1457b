//! Derivative-free minimization.
//!
//! The fitter only needs a point that minimizes a scalar objective, so the
//! search method sits behind [`Minimizer`]. [`NelderMead`] is the default.
//! Objectives signal infeasible points by returning `+inf`; NaN values are
//! treated the same way.

use log::debug;
use serde::Serialize;

/// Outcome of one minimization run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

pub trait Minimizer {
    fn minimize<F>(&self, objective: F, x0: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64;
}

/// Downhill simplex search with the standard reflection (1), expansion (2),
/// contraction (0.5) and shrink (0.5) coefficients.
///
/// Stops when every vertex lies within `xtol` of the best vertex in each
/// coordinate and every function value lies within `ftol` of the best value.
#[derive(Clone, Debug, PartialEq)]
pub struct NelderMead {
    pub xtol: f64,
    pub ftol: f64,
    pub max_iter: usize,
    pub max_evaluations: usize,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            max_iter: 500,
            max_evaluations: 1000,
        }
    }
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const NONZERO_DELTA: f64 = 0.05;
const ZERO_DELTA: f64 = 0.00025;

struct Counted<F> {
    objective: F,
    evaluations: usize,
}

impl<F: Fn(&[f64]) -> f64> Counted<F> {
    fn eval(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        let value = (self.objective)(x);
        if value.is_nan() { f64::INFINITY } else { value }
    }
}

/// `(1 + t) * centroid - t * worst`
fn along(centroid: &[f64], worst: &[f64], t: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst.iter())
        .map(|(&c, &w)| (1.0 + t) * c - t * w)
        .collect()
}

impl NelderMead {
    pub fn new(xtol: f64, ftol: f64, max_iter: usize, max_evaluations: usize) -> Self {
        Self {
            xtol,
            ftol,
            max_iter,
            max_evaluations,
        }
    }

    fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(x0.len() + 1);
        simplex.push(x0.to_vec());
        for k in 0..x0.len() {
            let mut vertex = x0.to_vec();
            if vertex[k] != 0.0 {
                vertex[k] *= 1.0 + NONZERO_DELTA;
            } else {
                vertex[k] = ZERO_DELTA;
            }
            simplex.push(vertex);
        }
        simplex
    }

    fn within_tolerance(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let best = &simplex[0];
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|v| (v - values[0]).abs())
            .fold(0.0, f64::max);
        x_spread <= self.xtol && f_spread <= self.ftol
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

impl Minimizer for NelderMead {
    fn minimize<F>(&self, objective: F, x0: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut f = Counted {
            objective,
            evaluations: 0,
        };
        let n = x0.len();
        let mut simplex = Self::initial_simplex(x0);
        let mut values: Vec<f64> = simplex.iter().map(|v| f.eval(v)).collect();
        sort_simplex(&mut simplex, &mut values);

        let mut iterations = 1;
        let mut converged = false;
        while f.evaluations < self.max_evaluations && iterations < self.max_iter {
            if self.within_tolerance(&simplex, &values) {
                converged = true;
                break;
            }

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
                .collect();
            let worst = simplex[n].clone();

            let reflected = along(&centroid, &worst, REFLECTION);
            let f_reflected = f.eval(&reflected);
            let mut do_shrink = false;

            if f_reflected < values[0] {
                let expanded = along(&centroid, &worst, REFLECTION * EXPANSION);
                let f_expanded = f.eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
            } else if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
            } else if f_reflected < values[n] {
                let contracted = along(&centroid, &worst, CONTRACTION * REFLECTION);
                let f_contracted = f.eval(&contracted);
                if f_contracted <= f_reflected {
                    simplex[n] = contracted;
                    values[n] = f_contracted;
                } else {
                    do_shrink = true;
                }
            } else {
                let contracted = along(&centroid, &worst, -CONTRACTION);
                let f_contracted = f.eval(&contracted);
                if f_contracted < values[n] {
                    simplex[n] = contracted;
                    values[n] = f_contracted;
                } else {
                    do_shrink = true;
                }
            }

            if do_shrink {
                let best = simplex[0].clone();
                for j in 1..=n {
                    simplex[j] = best
                        .iter()
                        .zip(simplex[j].iter())
                        .map(|(&b, &x)| b + SHRINK * (x - b))
                        .collect();
                    values[j] = f.eval(&simplex[j]);
                }
            }

            sort_simplex(&mut simplex, &mut values);
            iterations += 1;
        }

        // The last iteration may have reached the tolerance exactly.
        if !converged && self.within_tolerance(&simplex, &values) {
            converged = true;
        }
        debug!(
            "Nelder-Mead finished after {} iterations, {} evaluations (converged: {})",
            iterations, f.evaluations, converged
        );

        Minimum {
            point: simplex.swap_remove(0),
            value: values[0],
            iterations,
            evaluations: f.evaluations,
            converged,
        }
    }
}
