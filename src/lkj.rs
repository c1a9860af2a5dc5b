/*!
Correlation matrices from canonical partial correlations.

A `d × d` correlation matrix is parameterised by `B = d(d - 1)/2` partial correlations
`xi ∈ (-1, 1)^B`, listed row by row over the strict upper triangle. The construction
builds an upper triangular `R` with unit-norm columns, so `Omega = RᵗR` is a valid
correlation matrix for every admissible `xi`.

The sampler moves `xi` on the unconstrained scale `logit((xi + 1) / 2)`; the
[`LkjFactor::log_jacobian`] term accounts for that change of variables.
*/

use nalgebra::{DMatrix, DVector};

use crate::error::{McmcError, Result};

/// Number of partial correlations of a `d × d` correlation matrix.
pub fn n_partials(d: usize) -> usize {
    d * d.saturating_sub(1) / 2
}

/// Output of [`build_correlation_from_partials`].
#[derive(Debug, Clone, PartialEq)]
pub struct LkjFactor {
    /// Upper triangular square root, `Omega = RᵗR`.
    pub r: DMatrix<f64>,
    /// `Σ_b log(xi_tilde_b (1 - xi_tilde_b))` with `xi_tilde = (xi + 1) / 2`.
    pub log_jacobian: f64,
    /// Log-determinant of the map from partial correlations to `Omega`.
    pub log_jacobian_partials: f64,
}

impl LkjFactor {
    pub fn omega(&self) -> DMatrix<f64> {
        self.r.transpose() * &self.r
    }
}

/**
Maps partial correlations to the upper triangular factor `R` of a correlation matrix.

Row 0 of `R` is `[1, xi(0,1), …, xi(0,d-1)]`. For each later row `i`, the entries to the
right of the diagonal scale the partial correlation by the length still left in
column `j`, and the diagonal takes whatever length remains, so every column has unit
norm.

# Errors

[`McmcError::Dimension`] if `xi` does not have `d(d-1)/2` entries and
[`McmcError::PartialCorrelationOutOfRange`] if an entry is not in (-1, 1).

# Examples

```rust
use mvgp_mcmc::lkj::build_correlation_from_partials;
use nalgebra::DVector;

let factor = build_correlation_from_partials(&DVector::from_vec(vec![0.5]), 2).unwrap();
let omega = factor.omega();
assert!((omega[(0, 1)] - 0.5).abs() < 1e-12);
assert!((omega[(1, 1)] - 1.0).abs() < 1e-12);
```
*/
pub fn build_correlation_from_partials(xi: &DVector<f64>, d: usize) -> Result<LkjFactor> {
    let expected = n_partials(d);
    if xi.len() != expected {
        return Err(McmcError::Dimension {
            what: "partial correlations",
            expected,
            got: xi.len(),
        });
    }
    if let Some((index, &value)) = xi
        .iter()
        .enumerate()
        .find(|(_, v)| !(**v > -1.0 && **v < 1.0))
    {
        return Err(McmcError::PartialCorrelationOutOfRange { index, value });
    }

    let mut partial = DMatrix::<f64>::zeros(d, d);
    let mut idx = 0;
    for i in 0..d {
        for j in (i + 1)..d {
            partial[(i, j)] = xi[idx];
            idx += 1;
        }
    }

    let mut r = DMatrix::<f64>::zeros(d, d);
    if d > 0 {
        r[(0, 0)] = 1.0;
        for j in 1..d {
            r[(0, j)] = partial[(0, j)];
        }
    }
    for i in 1..d {
        for j in i..d {
            let used: f64 = (0..i).map(|l| r[(l, j)] * r[(l, j)]).sum();
            let remaining = (1.0 - used).max(0.0).sqrt();
            r[(i, j)] = if i == j {
                remaining
            } else {
                partial[(i, j)] * remaining
            };
        }
    }

    let mut log_jacobian_partials = 0.0;
    for i in 0..d {
        for j in (i + 1)..d {
            let weight = 0.5 * (d as f64 - i as f64 - 2.0);
            log_jacobian_partials += weight * (1.0 - partial[(i, j)].powi(2)).ln();
        }
    }

    let log_jacobian = xi
        .iter()
        .map(|&x| {
            let t = 0.5 * (x + 1.0);
            t.ln() + (1.0 - t).ln()
        })
        .sum();

    Ok(LkjFactor {
        r,
        log_jacobian,
        log_jacobian_partials,
    })
}

/// Beta shape parameters of the partial correlations under an LKJ(`eta`) prior.
///
/// The partial correlations of row `i` are marginally
/// `2 · Beta(eta + (d - 2 - i)/2, eta + (d - 2 - i)/2) - 1`.
pub fn lkj_concentrations(eta: f64, d: usize) -> DVector<f64> {
    let mut out = Vec::with_capacity(n_partials(d));
    for i in 0..d.saturating_sub(1) {
        let shape = eta + (d as f64 - 2.0 - i as f64) / 2.0;
        out.extend(std::iter::repeat(shape).take(d - i - 1));
    }
    DVector::from_vec(out)
}

#[inline]
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

#[inline]
pub fn expit(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
