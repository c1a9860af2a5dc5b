//! Adaptive tuning of random-walk proposals.
//!
//! Every controller collects a batch of [`BATCH_SIZE`] iterations and is adapted once at
//! the end of each batch, never mid-batch. The driver only calls `adapt` outside of the
//! production phase, so production draws come from a fixed kernel.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use rand::Rng;

use crate::distributions::standard_normal_vector;

/// Number of iterations per tuning batch.
pub const BATCH_SIZE: usize = 50;

/// Target acceptance rate of a scalar random walk.
pub const SCALAR_TARGET: f64 = 0.44;

/// Target acceptance rate of a `dim`-dimensional random-walk proposal.
pub fn optimal_acceptance(dim: usize) -> f64 {
    const TARGETS: [f64; 5] = [0.44, 0.35, 0.32, 0.25, 0.234];
    TARGETS[dim.clamp(1, TARGETS.len()) - 1]
}

/// Running acceptance counts, reset at the start of production.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcceptanceCount {
    pub accepted: u64,
    pub proposed: u64,
}

impl AcceptanceCount {
    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        self.accepted += accepted as u64;
    }

    pub fn rate(&self) -> Option<f64> {
        (self.proposed > 0).then(|| self.accepted as f64 / self.proposed as f64)
    }
}

/**
Step size controller for a scalar random walk.

At the end of each batch the log step size moves by `δ(k) = min(0.01, k^-1/2)`: up if
the batch acceptance rate exceeded [`SCALAR_TARGET`], down otherwise.

# Examples

```rust
use mvgp_mcmc::tuning::{ScalarTuner, BATCH_SIZE};

let mut tuner = ScalarTuner::new(0.25);
for _ in 0..BATCH_SIZE {
    tuner.record(true);
}
tuner.adapt(BATCH_SIZE - 1);
assert!(tuner.scale() > 0.25);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarTuner {
    scale: f64,
    batch_accepts: usize,
    count: AcceptanceCount,
}

impl ScalarTuner {
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            batch_accepts: 0,
            count: AcceptanceCount::default(),
        }
    }

    /// Current proposal standard deviation.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn record(&mut self, accepted: bool) {
        self.batch_accepts += accepted as usize;
        self.count.record(accepted);
    }

    pub fn batch_rate(&self) -> f64 {
        self.batch_accepts as f64 / BATCH_SIZE as f64
    }

    pub fn adapt(&mut self, k: usize) {
        let delta = (1.0 / (k as f64).sqrt()).min(0.01);
        let log_scale = self.scale.ln();
        self.scale = if self.batch_rate() > SCALAR_TARGET {
            (log_scale + delta).exp()
        } else {
            (log_scale - delta).exp()
        };
        self.batch_accepts = 0;
    }

    /// Drops a partially filled batch, so the next batch starts clean.
    pub fn reset_batch(&mut self) {
        self.batch_accepts = 0;
    }

    pub fn count(&self) -> AcceptanceCount {
        self.count
    }

    pub fn reset_count(&mut self) {
        self.count = AcceptanceCount::default();
    }
}

/// Independent [`ScalarTuner`]s, one per element of a vector updated one entry at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTuner {
    tuners: Vec<ScalarTuner>,
}

impl VectorTuner {
    pub fn new(len: usize, scale: f64) -> Self {
        Self {
            tuners: vec![ScalarTuner::new(scale); len],
        }
    }

    pub fn scale(&self, i: usize) -> f64 {
        self.tuners[i].scale()
    }

    pub fn record(&mut self, i: usize, accepted: bool) {
        self.tuners[i].record(accepted);
    }

    pub fn adapt(&mut self, k: usize) {
        self.tuners.iter_mut().for_each(|t| t.adapt(k));
    }

    /// Pooled acceptance counts over all elements.
    pub fn count(&self) -> AcceptanceCount {
        self.tuners
            .iter()
            .fold(AcceptanceCount::default(), |acc, t| AcceptanceCount {
                accepted: acc.accepted + t.count.accepted,
                proposed: acc.proposed + t.count.proposed,
            })
    }

    pub fn reset_batch(&mut self) {
        self.tuners.iter_mut().for_each(ScalarTuner::reset_batch);
    }

    pub fn reset_count(&mut self) {
        self.tuners.iter_mut().for_each(ScalarTuner::reset_count);
    }
}

/**
Proposal covariance controller for a multivariate random walk
`x* = x + λ · L · z`, `z ~ N(0, I)`, `Σ = L Lᵗ`.

At the end of each batch, with `n = floor(k / W)` batches already adapted,
`γ₁ = (n + 3)^-0.8` and `γ₂ = 10 γ₁`:

- `λ ← λ · exp(γ₂ (rate - target))`,
- `Σ ← Σ + γ₁ (Ŝ - Σ)` with `Ŝ` the empirical covariance of the batch draws,
- `L` is refactorised; if `Σ` is not positive definite the previous `Σ` and `L` are kept.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceTuner {
    lambda: f64,
    sigma: DMatrix<f64>,
    chol: DMatrix<f64>,
    batch: Array2<f64>,
    batch_accepts: usize,
    target: f64,
    count: AcceptanceCount,
}

impl CovarianceTuner {
    /// Starts from `Σ = I`.
    pub fn new(dim: usize, lambda: f64) -> Self {
        Self {
            lambda,
            sigma: DMatrix::identity(dim, dim),
            chol: DMatrix::identity(dim, dim),
            batch: Array2::zeros((BATCH_SIZE, dim)),
            batch_accepts: 0,
            target: optimal_acceptance(dim),
            count: AcceptanceCount::default(),
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn sigma(&self) -> &DMatrix<f64> {
        &self.sigma
    }

    pub fn chol(&self) -> &DMatrix<f64> {
        &self.chol
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Random-walk increment `λ · L · z`.
    pub fn step<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        &self.chol * standard_normal_vector(self.chol.nrows(), rng) * self.lambda
    }

    /// Records the outcome of iteration `k` and the value the chain holds afterwards.
    pub fn record(&mut self, k: usize, accepted: bool, value: &DVector<f64>) {
        self.batch_accepts += accepted as usize;
        self.count.record(accepted);
        let mut row = self.batch.row_mut(k % BATCH_SIZE);
        for (dst, src) in row.iter_mut().zip(value.iter()) {
            *dst = *src;
        }
    }

    pub fn batch_rate(&self) -> f64 {
        self.batch_accepts as f64 / BATCH_SIZE as f64
    }

    pub fn adapt(&mut self, k: usize) {
        let times_adapted = (k / BATCH_SIZE) as f64;
        let gamma1 = 1.0 / (times_adapted + 3.0).powf(0.8);
        let gamma2 = 10.0 * gamma1;
        self.lambda *= (gamma2 * (self.batch_rate() - self.target)).exp();

        if let Ok(empirical) = self.batch.t().cov(1.0) {
            let dim = self.sigma.nrows();
            let empirical = DMatrix::from_fn(dim, dim, |i, j| empirical[[i, j]]);
            let sigma = &self.sigma + (empirical - &self.sigma) * gamma1;
            if let Some(chol) = sigma.clone().cholesky() {
                self.chol = chol.l();
                self.sigma = sigma;
            }
        }

        self.reset_batch();
    }

    pub fn reset_batch(&mut self) {
        self.batch_accepts = 0;
        self.batch.fill(0.0);
    }

    pub fn count(&self) -> AcceptanceCount {
        self.count
    }

    pub fn reset_count(&mut self) {
        self.count = AcceptanceCount::default();
    }
}
