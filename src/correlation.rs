/*!
Distance and correlation matrices for the predictive-process Gaussian process.

The latent surface is represented at `K` knots. Every other covariate position is a
linear interpolation of the knot values through `Z = c · C⁻¹`, where `C` is the
knot-knot correlation matrix and `c` the position-knot cross correlation.

# Examples

```rust
use mvgp_mcmc::correlation::{build_correlation, Kernel, KnotCorrelation};
use nalgebra::DVector;

let knots = DVector::from_vec(vec![-1.0, 0.0, 1.0]);
let (dist, corr) = build_correlation(&knots, &knots, 2.0, Kernel::Exponential);
assert_eq!(corr[(0, 0)], 1.0);
assert!((corr[(0, 2)] - (-1.0_f64).exp()).abs() < 1e-12);

let knot_corr = KnotCorrelation::new(&dist, 2.0).unwrap();
assert_eq!(knot_corr.inv.nrows(), 3);
```
*/

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::error::{McmcError, Result};

/// Correlation function of the Gaussian process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// `exp(-|a - b| / phi)`
    Exponential,
    /// `exp(-|a - b|² / phi)`
    Gaussian,
}

impl Kernel {
    /// Transforms an absolute difference into the kernel's distance.
    #[inline]
    pub fn distance(self, a: f64, b: f64) -> f64 {
        let raw = (a - b).abs();
        match self {
            Kernel::Exponential => raw,
            Kernel::Gaussian => raw * raw,
        }
    }
}

impl FromStr for Kernel {
    type Err = McmcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exponential" => Ok(Kernel::Exponential),
            "gaussian" => Ok(Kernel::Gaussian),
            other => Err(McmcError::UnsupportedKernel(other.to_string())),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Exponential => write!(f, "exponential"),
            Kernel::Gaussian => write!(f, "gaussian"),
        }
    }
}

/// Pairwise kernel distances between two sets of positions (rows follow `a`).
pub fn distance_matrix(a: &DVector<f64>, b: &DVector<f64>, kernel: Kernel) -> DMatrix<f64> {
    DMatrix::from_fn(a.len(), b.len(), |i, j| kernel.distance(a[i], b[j]))
}

/// Element-wise `exp(-D / phi)`.
pub fn correlation_from_distance(dist: &DMatrix<f64>, phi: f64) -> DMatrix<f64> {
    dist.map(|d| (-d / phi).exp())
}

/// Builds the distance matrix between `a` and `b` and the matching correlation matrix.
pub fn build_correlation(
    a: &DVector<f64>,
    b: &DVector<f64>,
    phi: f64,
    kernel: Kernel,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let dist = distance_matrix(a, b, kernel);
    let corr = correlation_from_distance(&dist, phi);
    (dist, corr)
}

/// Knot correlation matrix `C` together with its lower Cholesky factor and inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct KnotCorrelation {
    pub corr: DMatrix<f64>,
    /// Lower triangular `L` with `C = L Lᵗ`.
    pub chol: DMatrix<f64>,
    pub inv: DMatrix<f64>,
}

impl KnotCorrelation {
    /// Factorises `exp(-dist / phi)`.
    pub fn new(dist: &DMatrix<f64>, phi: f64) -> Result<Self> {
        Self::try_new(dist, phi).ok_or(McmcError::NotPositiveDefinite("knot correlation matrix"))
    }

    /// Same as [`KnotCorrelation::new`] but signals a failed factorisation with `None`,
    /// which is what a proposal needs.
    pub fn try_new(dist: &DMatrix<f64>, phi: f64) -> Option<Self> {
        let corr = correlation_from_distance(dist, phi);
        let chol = corr.clone().cholesky()?;
        let inv = chol.inverse();
        Some(Self {
            chol: chol.l(),
            corr,
            inv,
        })
    }
}

/// Cross correlation between all covariate positions and the knots, and the
/// interpolation matrix it induces.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossCorrelation {
    /// N × K kernel distances.
    pub dist: DMatrix<f64>,
    /// N × K correlations.
    pub corr: DMatrix<f64>,
    /// N × K interpolation matrix `c · C⁻¹`.
    pub z: DMatrix<f64>,
}

impl CrossCorrelation {
    pub fn new(
        positions: &DVector<f64>,
        knots: &DVector<f64>,
        phi: f64,
        kernel: Kernel,
        c_inv: &DMatrix<f64>,
    ) -> Self {
        Self::from_distance(distance_matrix(positions, knots, kernel), phi, c_inv)
    }

    /// Reuses an existing distance matrix; only `phi` or `C⁻¹` changed.
    pub fn from_distance(dist: DMatrix<f64>, phi: f64, c_inv: &DMatrix<f64>) -> Self {
        let corr = correlation_from_distance(&dist, phi);
        let z = &corr * c_inv;
        Self { dist, corr, z }
    }

    /// Overwrites the row belonging to a single covariate value.
    pub fn set_row(&mut self, i: usize, row: &CovariateRow) {
        self.dist.set_row(i, &row.dist);
        self.corr.set_row(i, &row.corr);
        self.z.set_row(i, &row.z);
    }
}

/// Distance, correlation and interpolation vectors of one covariate value against all knots.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateRow {
    pub dist: RowDVector<f64>,
    pub corr: RowDVector<f64>,
    pub z: RowDVector<f64>,
}

impl CovariateRow {
    /// O(K²) because of the product with `C⁻¹`; the kernel itself is O(K).
    pub fn new(
        position: f64,
        knots: &DVector<f64>,
        phi: f64,
        kernel: Kernel,
        c_inv: &DMatrix<f64>,
    ) -> Self {
        let dist = RowDVector::from_fn(knots.len(), |_, k| kernel.distance(position, knots[k]));
        let corr = dist.map(|d| (-d / phi).exp());
        let z = &corr * c_inv;
        Self { dist, corr, z }
    }
}
