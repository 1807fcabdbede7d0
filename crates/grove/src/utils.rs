//! Common utilities used across the crate.
//!
//! Confidence estimators shared by trees and combiners, the softmax used by
//! boosted classification, and the parallelism switch used for chunked
//! ensemble evaluation.

use rayon::prelude::*;

// =============================================================================
// Statistical Utilities
// =============================================================================

/// Default z-score for confidence estimates (95% two-sided).
pub const DEFAULT_Z: f64 = 1.96;

/// Lower 5% quantile of the standard normal distribution.
const NORMAL_Q05: f64 = -1.644_853_626_951_472_2;

/// Wilson score interval lower bound for a binomial proportion.
///
/// `share` is the observed proportion of the category of interest and `n` the
/// number of observations it was measured over. Returns 0 when `n` is not
/// positive.
///
/// The bound is non-decreasing in `share` for a fixed `n`, non-decreasing in
/// `n` for a fixed `share`, and converges to `share` as `n` grows.
#[inline]
pub fn wilson_score(share: f64, n: f64, z: f64) -> f64 {
    if n <= 0.0 || !share.is_finite() {
        return 0.0;
    }
    let z2 = z * z;
    let factor = z2 / n;
    let spread = ((share * (1.0 - share) + factor / 4.0) / n).sqrt();
    (share + factor / 2.0 - z * spread) / (1.0 + factor)
}

/// Degrees of freedom above which the Wilson–Hilferty approximation is within
/// a relative 3e-7 of the exact quantile.
const CHI_SQUARED_EXACT_MAX_K: f64 = 1000.0;

/// Lanczos coefficients (g = 7, n = 9).
const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural logarithm of the gamma function for `x > 0`.
fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection.
        return (std::f64::consts::PI / (std::f64::consts::PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS[1..]
        .iter()
        .enumerate()
        .fold(LANCZOS[0], |acc, (i, c)| acc + c / (x + (i + 1) as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized lower incomplete gamma function `P(a, x)`.
///
/// Series expansion below `a + 1`, Lentz continued fraction above.
fn lower_regularized_gamma(a: f64, x: f64) -> f64 {
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;
    const MAX_ITER: usize = 1000;

    if x <= 0.0 {
        return 0.0;
    }
    let ln_prefix = a * x.ln() - x - ln_gamma(a);
    if x < a + 1.0 {
        let mut term = 1.0 / a;
        let mut sum = term;
        let mut n = a;
        for _ in 0..MAX_ITER {
            n += 1.0;
            term *= x / n;
            sum += term;
            if term.abs() < sum.abs() * EPS {
                break;
            }
        }
        return (sum * ln_prefix.exp()).min(1.0);
    }

    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    (1.0 - ln_prefix.exp() * h).max(0.0)
}

/// Lower 5% quantile of the chi-squared distribution with `k` degrees of freedom.
///
/// Inverts the chi-squared CDF by bisection; large `k` uses the
/// Wilson–Hilferty approximation.
pub fn chi_squared_q05(k: f64) -> f64 {
    if k <= 0.0 || !k.is_finite() {
        return 0.0;
    }
    if k > CHI_SQUARED_EXACT_MAX_K {
        let h = 2.0 / (9.0 * k);
        let cube = 1.0 - h + NORMAL_Q05 * h.sqrt();
        return (k * cube * cube * cube).max(0.0);
    }

    // CDF of chi2(k) at x is P(k / 2, x / 2).
    let (mut low, mut high) = (0.0, k + 10.0 * (2.0 * k).sqrt() + 10.0);
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if lower_regularized_gamma(k / 2.0, mid / 2.0) < 0.05 {
            low = mid;
        } else {
            high = mid;
        }
        if high - low <= 1e-12 * high {
            break;
        }
    }
    0.5 * (low + high)
}

/// Expected error of a regression estimate from the variance of its training
/// distribution.
///
/// Computes `sqrt(var * (n - 1) / q * (sqrt(n) + z)^2 / n)` where `q` is the
/// lower 5% chi-squared quantile with `n` degrees of freedom. Returns 0 when
/// the error is undefined (fewer than two instances, or a non-finite variance).
pub fn regression_error(variance: f64, population: f64, z: f64) -> f64 {
    if population <= 1.0 || !variance.is_finite() {
        return 0.0;
    }
    let quantile = chi_squared_q05(population);
    if quantile <= 0.0 {
        return 0.0;
    }
    let error = variance * (population - 1.0) / quantile * (population.sqrt() + z).powi(2);
    (error / population).sqrt()
}

/// Apply softmax in-place to a row of scores.
#[inline]
pub fn softmax_inplace(row: &mut [f64]) {
    if row.is_empty() {
        return;
    }

    // Find max for numerical stability
    let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut sum = 0.0;
    for x in row.iter_mut() {
        *x = (*x - max_val).exp();
        sum += *x;
    }

    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// When `true`, components may use `rayon` parallel iterators.
/// When `false`, components must use sequential iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if rayon pool has multiple threads, sequential otherwise)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Map over `iter`, in parallel when allowed. Output order follows input order.
    #[inline]
    pub fn maybe_par_map<T, B, I, F>(self, iter: I, f: F) -> Vec<B>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> B + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }
}

// =============================================================================
// Thread Pool Setup
// =============================================================================

/// Thread pool owned by a long-lived evaluator.
///
/// Thread count semantics:
/// - `0` = auto (the global rayon pool)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = a dedicated pool of exactly `n` threads
pub struct WorkerPool {
    parallelism: Parallelism,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Set up a pool for `n_threads`.
    ///
    /// Falls back to sequential evaluation if the dedicated pool cannot be built.
    pub fn new(n_threads: usize) -> Self {
        let parallelism = Parallelism::from_threads(n_threads);
        if n_threads <= 1 || !parallelism.is_parallel() {
            return Self { parallelism, pool: None };
        }

        match rayon::ThreadPoolBuilder::new().num_threads(n_threads).build() {
            Ok(pool) => Self {
                parallelism,
                pool: Some(pool),
            },
            Err(error) => {
                tracing::warn!(%error, n_threads, "thread pool unavailable, evaluating sequentially");
                Self {
                    parallelism: Parallelism::Sequential,
                    pool: None,
                }
            }
        }
    }

    /// Sequential pool.
    pub fn sequential() -> Self {
        Self {
            parallelism: Parallelism::Sequential,
            pool: None,
        }
    }

    #[inline]
    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Run a closure inside the pool.
    pub fn install<T: Send>(&self, f: impl FnOnce(Parallelism) -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(|| f(self.parallelism)),
            None => f(self.parallelism),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("parallelism", &self.parallelism)
            .field("dedicated", &self.pool.is_some())
            .finish()
    }
}
