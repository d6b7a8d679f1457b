/// Empirical-Bayes estimate of a success probability: the mean of the
/// Beta(a + successes, b + trials - successes) posterior.
///
/// A group without trials gets the prior mean `a / (a + b)`.
pub fn shrink(successes: u64, trials: u64, a: f64, b: f64) -> f64 {
    (a + successes as f64) / (a + b + trials as f64)
}

/// [`shrink`] over raw binary outcomes of one group.
pub fn shrink_outcomes<I>(outcomes: I, a: f64, b: f64) -> f64
where
    I: IntoIterator<Item = bool>,
{
    let (ones, total) = outcomes
        .into_iter()
        .fold((0u64, 0u64), |(ones, total), outcome| {
            (ones + outcome as u64, total + 1)
        });
    shrink(ones, total, a, b)
}
