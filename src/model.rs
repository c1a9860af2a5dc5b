/*!
Immutable data of a fit: responses, the partially observed covariate, knots, kernel and
the derived constants every update reads.

The covariate vector holds `n_obs` observed values followed by placeholders for the
missing ones. Missing values are sampled on a centered scale: the chain holds
`x - x_center`, with `x_center` and `x_scale` the mean and standard deviation (ddof 1) of
the observed prefix, computed once here.
*/

use nalgebra::storage::Storage;
use nalgebra::{DMatrix, DVector, Dyn, Matrix, U1};

use crate::config::{McmcConfig, Priors};
use crate::correlation::{distance_matrix, Kernel};
use crate::distributions::log_density_normal;
use crate::error::{McmcError, Result};
use crate::lkj::{lkj_concentrations, n_partials};

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    y: DMatrix<f64>,
    x: DVector<f64>,
    n_obs: usize,
    knots: DVector<f64>,
    kernel: Kernel,
    priors: Priors,
    x_center: f64,
    x_scale: f64,
    knot_dist: DMatrix<f64>,
    lkj_shapes: DVector<f64>,
}

impl Model {
    /**
    Validates the data against the configuration and precomputes the knot distances and
    the prior concentrations of the partial correlations.

    # Errors

    [`McmcError::InvalidConfig`] if `x` and `y` disagree on `N`, `n_obs` is outside
    `[2, N]`, there are no knots, `y` has no columns, or the observed covariate values
    have zero spread (the centered prior would be degenerate).
    */
    pub fn new(
        y: DMatrix<f64>,
        x: DVector<f64>,
        n_obs: usize,
        knots: DVector<f64>,
        config: &McmcConfig,
    ) -> Result<Self> {
        let invalid = |msg: String| Err(McmcError::InvalidConfig(msg));
        let n = y.nrows();
        if x.len() != n {
            return invalid(format!(
                "covariate has {} entries but the response has {n} rows",
                x.len()
            ));
        }
        if y.ncols() == 0 {
            return invalid("response must have at least one column".into());
        }
        if !(2..=n).contains(&n_obs) {
            return invalid(format!("n_obs must lie in [2, {n}], got {n_obs}"));
        }
        if knots.is_empty() {
            return invalid("at least one knot is required".into());
        }

        let observed = x.rows(0, n_obs);
        let x_center = observed.mean();
        let x_scale = observed.variance() * n_obs as f64 / (n_obs as f64 - 1.0);
        let x_scale = x_scale.sqrt();
        if !(x_scale > 0.0 && x_scale.is_finite()) {
            return invalid(format!(
                "observed covariate values must vary, got standard deviation {x_scale}"
            ));
        }

        let knot_dist = distance_matrix(&knots, &knots, config.kernel);
        let lkj_shapes = lkj_concentrations(config.priors.lkj_eta, y.ncols());
        Ok(Self {
            y,
            x,
            n_obs,
            knots,
            kernel: config.kernel,
            priors: config.priors.clone(),
            x_center,
            x_scale,
            knot_dist,
            lkj_shapes,
        })
    }

    pub fn y(&self) -> &DMatrix<f64> {
        &self.y
    }

    pub fn n(&self) -> usize {
        self.y.nrows()
    }

    pub fn d(&self) -> usize {
        self.y.ncols()
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn n_missing(&self) -> usize {
        self.n() - self.n_obs
    }

    pub fn n_knots(&self) -> usize {
        self.knots.len()
    }

    /// Number of partial correlations, `d(d - 1)/2`.
    pub fn n_partials(&self) -> usize {
        n_partials(self.d())
    }

    pub fn knots(&self) -> &DVector<f64> {
        &self.knots
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    /// Mean of the observed covariate values.
    pub fn x_center(&self) -> f64 {
        self.x_center
    }

    /// Standard deviation of the observed covariate values; the prior scale of every
    /// centered missing value.
    pub fn x_scale(&self) -> f64 {
        self.x_scale
    }

    /// Knot-knot kernel distances.
    pub fn knot_dist(&self) -> &DMatrix<f64> {
        &self.knot_dist
    }

    /// Beta shapes of the partial correlations, one per pair.
    pub fn lkj_shapes(&self) -> &DVector<f64> {
        &self.lkj_shapes
    }

    /// Placeholder tail of the covariate, centered.
    pub fn placeholder_missing(&self) -> DVector<f64> {
        self.x.rows(self.n_obs, self.n_missing()).add_scalar(-self.x_center)
    }

    /// All `N` covariate positions given the centered missing values.
    pub fn positions(&self, x_missing: &DVector<f64>) -> DVector<f64> {
        let mut out = self.x.clone();
        out.rows_mut(self.n_obs, self.n_missing())
            .copy_from(&x_missing.add_scalar(self.x_center));
        out
    }

    /// `Σ_ij (y_ij - mu_j - zeta_ij)²`.
    pub fn residual_sum_sq(&self, mu: &DVector<f64>, zeta: &DMatrix<f64>) -> f64 {
        let mut total = 0.0;
        for j in 0..self.d() {
            for i in 0..self.n() {
                let r = self.y[(i, j)] - mu[j] - zeta[(i, j)];
                total += r * r;
            }
        }
        total
    }

    /// Gaussian log-likelihood up to the terms that do not depend on `mu` or `zeta`.
    pub fn log_like(&self, mu: &DVector<f64>, zeta: &DMatrix<f64>, sigma2: f64) -> f64 {
        -0.5 * self.residual_sum_sq(mu, zeta) / sigma2
    }

    /// Full log-likelihood of row `i` given that row of `zeta`.
    pub fn row_log_like<S: Storage<f64, U1, Dyn>>(
        &self,
        i: usize,
        mu: &DVector<f64>,
        zeta_row: &Matrix<f64, U1, Dyn, S>,
        sigma: f64,
    ) -> f64 {
        (0..self.d())
            .map(|j| log_density_normal(self.y[(i, j)], mu[j] + zeta_row[j], sigma))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_model() -> Model {
        let y = DMatrix::from_row_slice(4, 2, &[1.0, 2.0, 0.5, 1.5, -1.0, 0.0, 3.0, 1.0]);
        let x = DVector::from_vec(vec![0.0, 2.0, 4.0, 0.0]);
        let knots = DVector::from_vec(vec![0.0, 2.0, 4.0]);
        Model::new(y, x, 3, knots, &McmcConfig::default()).unwrap()
    }

    #[test]
    fn centers_on_observed_prefix() {
        let model = small_model();
        assert_abs_diff_eq!(model.x_center(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.x_scale(), 2.0, epsilon = 1e-12);
        assert_eq!(model.n_missing(), 1);
        assert_eq!(model.n_partials(), 1);
        assert_abs_diff_eq!(model.placeholder_missing()[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn positions_restore_original_units() {
        let model = small_model();
        let pos = model.positions(&DVector::from_vec(vec![1.5]));
        assert_eq!(pos.as_slice(), &[0.0, 2.0, 4.0, 3.5]);
    }

    #[test]
    fn row_likelihood_matches_full_residuals() {
        let model = small_model();
        let mu = DVector::from_vec(vec![0.5, 1.0]);
        let zeta = DMatrix::from_element(4, 2, 0.25);
        let sigma2: f64 = 0.7;
        let rows: f64 = (0..4)
            .map(|i| model.row_log_like(i, &mu, &zeta.row(i), sigma2.sqrt()))
            .sum();
        let n_d = 8.0;
        let expected = -0.5 * n_d * (2.0 * std::f64::consts::PI * sigma2).ln()
            + model.log_like(&mu, &zeta, sigma2);
        assert_abs_diff_eq!(rows, expected, epsilon = 1e-10);
    }

    #[test]
    fn rejects_bad_shapes() {
        let config = McmcConfig::default();
        let y = DMatrix::zeros(3, 1);
        let knots = DVector::from_vec(vec![0.0]);
        let short_x = DVector::from_vec(vec![0.0, 1.0]);
        assert!(Model::new(y.clone(), short_x, 2, knots.clone(), &config).is_err());

        let x = DVector::from_vec(vec![0.0, 1.0, 2.0]);
        assert!(Model::new(y.clone(), x.clone(), 1, knots.clone(), &config).is_err());
        assert!(Model::new(y.clone(), x.clone(), 4, knots.clone(), &config).is_err());
        assert!(Model::new(y.clone(), x.clone(), 2, DVector::zeros(0), &config).is_err());

        let flat = DVector::from_vec(vec![1.0, 1.0, 0.0]);
        assert!(matches!(
            Model::new(y, flat, 2, knots, &config),
            Err(McmcError::InvalidConfig(_))
        ));
    }
}
