use statrs::function::factorial;
use statrs::function::gamma::ln_gamma;

/// Upper bound on the number of entries kept in a [`LogFactorial`] table.
pub const MAX_CACHE_SIZE: usize = 1 << 16;

/// Table of log(m!) for m up to the cache size, falling back to
/// [`ln_factorial`] above it.
#[derive(Clone, Debug)]
pub struct LogFactorial {
    cache: Vec<f64>,
}

impl LogFactorial {
    pub fn new(cache_size: usize) -> Self {
        let cache_size = cache_size.min(MAX_CACHE_SIZE);
        let mut cache = Vec::with_capacity(cache_size + 1);
        cache.push(0.0);
        let mut z = 0.0;
        for i in 1..=cache_size {
            z += (i as f64).ln();
            cache.push(z);
        }
        Self { cache }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len() - 1
    }

    pub fn ln_factorial(&self, m: u64) -> f64 {
        usize::try_from(m)
            .ok()
            .and_then(|i| self.cache.get(i))
            .copied()
            .unwrap_or_else(|| ln_factorial(m))
    }

    /// log of the binomial coefficient; `-inf` when `k > n`.
    pub fn ln_choose(&self, n: u64, k: u64) -> f64 {
        if k > n {
            return f64::NEG_INFINITY;
        }
        self.ln_factorial(n) - self.ln_factorial(k) - self.ln_factorial(n - k)
    }
}

pub fn ln_factorial(m: u64) -> f64 {
    factorial::ln_factorial(m)
}

/// log of the binomial coefficient; `-inf` when `k > n`.
pub fn ln_choose(n: u64, k: u64) -> f64 {
    factorial::ln_binomial(n, k)
}

/// log B(x, y) through log-gamma, so large arguments do not overflow.
pub fn ln_beta(x: f64, y: f64) -> f64 {
    ln_gamma(x) + ln_gamma(y) - ln_gamma(x + y)
}
