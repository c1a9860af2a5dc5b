/*!
Log-densities and random draws used inside every acceptance ratio and Gibbs step.

All log-densities are pure functions returning `f64::NEG_INFINITY` outside the support,
so a proposal that leaves the support is rejected by the usual Metropolis–Hastings
comparison without any special casing.

# Examples

```rust
use mvgp_mcmc::distributions::{log_density_mvn_chol, log_density_normal};
use nalgebra::{DMatrix, DVector};

// A diagonal covariance: the multivariate density factorises.
let chol = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0]));
let y = DVector::from_vec(vec![0.5, -1.0]);
let mean = DVector::zeros(2);
let joint = log_density_mvn_chol(&y, &mean, &chol);
let product = log_density_normal(0.5, 0.0, 1.0) + log_density_normal(-1.0, 0.0, 2.0);
assert!((joint - product).abs() < 1e-12);
```
*/

use std::f64::consts::{LN_2, PI};

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma, StandardNormal};
use statrs::function::beta::ln_beta;
use statrs::function::gamma::ln_gamma;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/**
Gaussian log-density of `y` with mean `mean` and covariance `L Lᵗ`, given the lower
Cholesky factor `L`.

The residual is whitened with a triangular solve, so the cost is O(k²) and the
covariance is never inverted. Returns `-inf` if `L` is singular.
*/
pub fn log_density_mvn_chol(y: &DVector<f64>, mean: &DVector<f64>, chol: &DMatrix<f64>) -> f64 {
    let k = y.len() as f64;
    let Some(white) = chol.solve_lower_triangular(&(y - mean)) else {
        return f64::NEG_INFINITY;
    };
    let log_det_half: f64 = chol.diagonal().iter().map(|l| l.ln()).sum();
    -0.5 * k * LN_2PI - log_det_half - 0.5 * white.norm_squared()
}

/// Univariate normal log-density with standard deviation `sd`.
pub fn log_density_normal(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * LN_2PI - sd.ln() - 0.5 * z * z
}

/// Gamma log-density in the shape/rate parameterisation.
pub fn log_density_gamma(x: f64, shape: f64, rate: f64) -> f64 {
    if x <= 0.0 {
        return f64::NEG_INFINITY;
    }
    shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
}

/// Beta log-density on (0, 1).
pub fn log_density_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return f64::NEG_INFINITY;
    }
    (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta(a, b)
}

/// Half-Cauchy log-density `2s / (π (x² + s²))` on `x ≥ 0`.
pub fn log_density_half_cauchy(x: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    LN_2 + scale.ln() - PI.ln() - (x * x + scale * scale).ln()
}

/// A vector of independent standard normal draws.
pub fn standard_normal_vector<R: Rng + ?Sized>(n: usize, rng: &mut R) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.sample(StandardNormal))
}

/// Draws from `N(mean, L Lᵗ)` given the lower Cholesky factor `L`.
pub fn sample_mvn_chol<R: Rng + ?Sized>(
    mean: &DVector<f64>,
    chol: &DMatrix<f64>,
    rng: &mut R,
) -> DVector<f64> {
    mean + chol * standard_normal_vector(mean.len(), rng)
}

/**
Draws from `N(A⁻¹ b, A⁻¹)`, the form in which Gaussian full conditionals arise.

With `A = L Lᵗ` the mean is obtained from two triangular solves and the noise term is
`L⁻ᵗ z`. Returns `None` if `A` is not positive definite.
*/
pub fn sample_mvn_canonical<R: Rng + ?Sized>(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    rng: &mut R,
) -> Option<DVector<f64>> {
    let chol = a.clone().cholesky()?;
    let mean = chol.solve(b);
    let z = standard_normal_vector(b.len(), rng);
    let noise = chol.l().transpose().solve_upper_triangular(&z)?;
    Some(mean + noise)
}

/// Gamma draw in the shape/rate parameterisation.
///
/// # Panics
///
/// If `shape` or `rate` is not positive and finite. Callers only pass hyper-parameters
/// that the configuration validated or sums of positive state values.
pub fn sample_gamma<R: Rng + ?Sized>(shape: f64, rate: f64, rng: &mut R) -> f64 {
    Gamma::new(shape, 1.0 / rate)
        .expect("Expecting gamma shape and rate to be positive.")
        .sample(rng)
}

/// Beta draw.
///
/// # Panics
///
/// If either shape parameter is not positive.
pub fn sample_beta<R: Rng + ?Sized>(a: f64, b: f64, rng: &mut R) -> f64 {
    Beta::new(a, b)
        .expect("Expecting beta shape parameters to be positive.")
        .sample(rng)
}
