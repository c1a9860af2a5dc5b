/*!
Mutable state of one chain and the commits that move it.

Every block update computes its proposal, including all quantities that depend on it,
into an [`Update`] without touching the state. [`ChainState::commit`] then swaps the new
values in at once, so `zeta = Z · eta_star · R_tau` holds after every commit.
*/

use nalgebra::{DMatrix, DVector, RowDVector};
use rand::Rng;
use rand_distr::Normal;

use crate::config::{LatentRule, McmcConfig};
use crate::correlation::{CovariateRow, CrossCorrelation, KnotCorrelation};
use crate::distributions::{sample_beta, sample_gamma, sample_mvn_chol, standard_normal_vector};
use crate::error::{McmcError, Result};
use crate::lkj::{build_correlation_from_partials, logit, LkjFactor};
use crate::model::Model;

/// `R · diag(sqrt(tau2))`.
pub fn scale_factor(r: &DMatrix<f64>, tau2: &DVector<f64>) -> DMatrix<f64> {
    r * DMatrix::from_diagonal(&tau2.map(f64::sqrt))
}

/// `Z · eta_star · R_tau`.
pub fn latent_effect(z: &DMatrix<f64>, eta_star: &DMatrix<f64>, r_tau: &DMatrix<f64>) -> DMatrix<f64> {
    z * eta_star * r_tau
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    pub mu: DVector<f64>,
    pub phi: f64,
    /// K × d knot coefficients.
    pub eta_star: DMatrix<f64>,
    pub sigma2: f64,
    pub lambda_sigma2: f64,
    pub tau2: DVector<f64>,
    pub lambda_tau2: DVector<f64>,
    pub s2_tau2: f64,
    pub xi: DVector<f64>,
    /// Missing covariate values, centered on the observed mean.
    pub x_missing: DVector<f64>,
    pub knots: KnotCorrelation,
    pub cross: CrossCorrelation,
    pub lkj: LkjFactor,
    pub r_tau: DMatrix<f64>,
    /// N × d latent effect.
    pub zeta: DMatrix<f64>,
}

/// A proposal that has been accepted, carrying every value that changes with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Mean(DVector<f64>),
    Range {
        phi: f64,
        knots: KnotCorrelation,
        cross: CrossCorrelation,
        zeta: DMatrix<f64>,
    },
    Latent {
        eta_star: DMatrix<f64>,
        zeta: DMatrix<f64>,
    },
    ResidualVariance(f64),
    ResidualScale(f64),
    Sill {
        tau2: DVector<f64>,
        r_tau: DMatrix<f64>,
        zeta: DMatrix<f64>,
    },
    SillScales(DVector<f64>),
    PooledScale(f64),
    Partials {
        xi: DVector<f64>,
        lkj: LkjFactor,
        r_tau: DMatrix<f64>,
        zeta: DMatrix<f64>,
    },
    Covariate {
        /// Index into the missing values.
        missing: usize,
        /// Row of the full data set.
        row: usize,
        value: f64,
        kernel_row: CovariateRow,
        zeta_row: RowDVector<f64>,
    },
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(McmcError::Dimension { what, expected, got })
    }
}

impl ChainState {
    /**
    Builds the starting state from the configured initial values, drawing anything not
    supplied from its prior.

    # Errors

    [`McmcError::Dimension`] for an initial value of the wrong shape,
    [`McmcError::InvalidConfig`] for a non-positive initial sill and
    [`McmcError::NotPositiveDefinite`] if the knot correlation matrix cannot be factorised
    at the starting range.
    */
    pub fn initialize<R: Rng + ?Sized>(
        model: &Model,
        config: &McmcConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let priors = model.priors();
        let init = &config.init;
        let (d, k) = (model.d(), model.n_knots());

        let x_missing = match &init.x_missing {
            Some(x) => {
                check_len("initial missing covariates", model.n_missing(), x.len())?;
                x.add_scalar(-model.x_center())
            }
            None if config.rules.covariate == LatentRule::Fixed => model.placeholder_missing(),
            None => {
                let prior = Normal::new(0.0, model.x_scale())
                    .expect("Expecting a positive covariate scale.");
                DVector::from_fn(model.n_missing(), |_, _| rng.sample(prior))
            }
        };

        let mu = match &init.mu {
            Some(mu) => {
                check_len("initial mean", d, mu.len())?;
                mu.clone()
            }
            None => standard_normal_vector(d, rng),
        };

        let phi = init.phi.unwrap_or_else(|| {
            let draw = rng.gen_range(priors.phi_l..priors.phi_u);
            if draw.min(5.0) > priors.phi_l {
                draw.min(5.0)
            } else {
                draw
            }
        });

        let lambda_sigma2 = sample_gamma(0.5, priors.s2_sigma2, rng);
        let sigma2 = init.sigma2.unwrap_or_else(|| {
            sample_gamma(0.5, lambda_sigma2, rng)
                .min(5.0)
                .max(f64::MIN_POSITIVE)
        });

        let lambda_tau2 =
            DVector::from_fn(d, |_, _| sample_gamma(0.5, priors.s2_tau2, rng).clamp(1.0, 5.0));
        let tau2 = match &init.tau2 {
            Some(tau2) => {
                check_len("initial sills", d, tau2.len())?;
                if tau2.iter().any(|t| !(*t > 0.0)) {
                    return Err(McmcError::InvalidConfig(
                        "initial sills must be positive".into(),
                    ));
                }
                tau2.clone()
            }
            None => lambda_tau2.map(|lambda| sample_gamma(0.5, lambda, rng).clamp(1.0, 5.0)),
        };

        let knots = KnotCorrelation::new(model.knot_dist(), phi)?;
        let cross = CrossCorrelation::new(
            &model.positions(&x_missing),
            model.knots(),
            phi,
            model.kernel(),
            &knots.inv,
        );

        let eta_star = match &init.eta_star {
            Some(eta) => {
                check_len("initial knot coefficient rows", k, eta.nrows())?;
                check_len("initial knot coefficient columns", d, eta.ncols())?;
                eta.clone()
            }
            None => {
                let zero = DVector::zeros(k);
                let mut eta = DMatrix::zeros(k, d);
                for j in 0..d {
                    eta.set_column(j, &sample_mvn_chol(&zero, &knots.chol, rng));
                }
                eta
            }
        };

        let xi = match &init.xi {
            Some(xi) => xi.clone(),
            None => model.lkj_shapes().map(|shape| {
                (2.0 * sample_beta(shape, shape, rng) - 1.0)
                    .clamp(-1.0 + f64::EPSILON, 1.0 - f64::EPSILON)
            }),
        };
        let lkj = build_correlation_from_partials(&xi, d)?;
        let r_tau = scale_factor(&lkj.r, &tau2);
        let zeta = latent_effect(&cross.z, &eta_star, &r_tau);

        Ok(Self {
            mu,
            phi,
            eta_star,
            sigma2,
            lambda_sigma2,
            tau2,
            lambda_tau2,
            s2_tau2: priors.s2_tau2,
            xi,
            x_missing,
            knots,
            cross,
            lkj,
            r_tau,
            zeta,
        })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma2.sqrt()
    }

    /// Partial correlations on the sampling scale, `logit((xi + 1) / 2)`.
    pub fn xi_unconstrained(&self) -> DVector<f64> {
        self.xi.map(|x| logit(0.5 * (x + 1.0)))
    }

    /// Largest absolute difference between the stored `zeta` and one rebuilt from its
    /// factors. Zero up to rounding after every commit.
    pub fn zeta_drift(&self) -> f64 {
        let rebuilt = latent_effect(&self.cross.z, &self.eta_star, &self.r_tau);
        (&self.zeta - rebuilt).amax()
    }

    pub fn commit(&mut self, update: Update) {
        match update {
            Update::Mean(mu) => self.mu = mu,
            Update::Range {
                phi,
                knots,
                cross,
                zeta,
            } => {
                self.phi = phi;
                self.knots = knots;
                self.cross = cross;
                self.zeta = zeta;
            }
            Update::Latent { eta_star, zeta } => {
                self.eta_star = eta_star;
                self.zeta = zeta;
            }
            Update::ResidualVariance(sigma2) => self.sigma2 = sigma2,
            Update::ResidualScale(lambda) => self.lambda_sigma2 = lambda,
            Update::Sill { tau2, r_tau, zeta } => {
                self.tau2 = tau2;
                self.r_tau = r_tau;
                self.zeta = zeta;
            }
            Update::SillScales(lambda) => self.lambda_tau2 = lambda,
            Update::PooledScale(s2) => self.s2_tau2 = s2,
            Update::Partials {
                xi,
                lkj,
                r_tau,
                zeta,
            } => {
                self.xi = xi;
                self.lkj = lkj;
                self.r_tau = r_tau;
                self.zeta = zeta;
            }
            Update::Covariate {
                missing,
                row,
                value,
                kernel_row,
                zeta_row,
            } => {
                self.x_missing[missing] = value;
                self.cross.set_row(row, &kernel_row);
                self.zeta.set_row(row, &zeta_row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialValues;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn model(n: usize, n_obs: usize, d: usize, config: &McmcConfig) -> Model {
        let x = DVector::from_fn(n, |i, _| i as f64 / n as f64);
        let y = DMatrix::from_fn(n, d, |i, j| (i as f64 * 0.3 + j as f64).sin());
        let knots = DVector::from_vec(vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        Model::new(y, x, n_obs, knots, config).unwrap()
    }

    #[test]
    fn initial_state_is_consistent() {
        let config = McmcConfig::default();
        let model = model(20, 15, 3, &config);
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..20 {
            let state = ChainState::initialize(&model, &config, &mut rng).unwrap();
            assert!(state.phi > config.priors.phi_l && state.phi <= 5.0);
            assert!(state.sigma2 > 0.0 && state.sigma2 <= 5.0);
            assert!(state.tau2.iter().all(|t| (1.0..=5.0).contains(t)));
            assert!(state.xi.iter().all(|x| x.abs() < 1.0));
            assert_eq!(state.x_missing.len(), 5);
            assert_eq!(state.eta_star.shape(), (5, 3));
            assert_eq!(state.zeta.shape(), (20, 3));
            assert!(state.zeta_drift() < 1e-12);
        }
    }

    #[test]
    fn configured_values_are_used() {
        let mut config = McmcConfig::default();
        config.init = InitialValues {
            mu: Some(DVector::from_vec(vec![1.0, -1.0])),
            phi: Some(0.8),
            sigma2: Some(0.3),
            tau2: Some(DVector::from_vec(vec![2.0, 0.5])),
            eta_star: Some(DMatrix::zeros(5, 2)),
            xi: Some(DVector::from_vec(vec![0.4])),
            x_missing: Some(DVector::from_vec(vec![0.9, 0.95])),
        };
        let model = model(10, 8, 2, &config);
        let mut rng = SmallRng::seed_from_u64(1);
        let state = ChainState::initialize(&model, &config, &mut rng).unwrap();
        assert_eq!(state.phi, 0.8);
        assert_eq!(state.sigma2, 0.3);
        assert_eq!(state.xi[0], 0.4);
        assert_eq!(state.zeta, DMatrix::zeros(10, 2));
        let positions = model.positions(&state.x_missing);
        assert_abs_diff_eq!(positions[8], 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(positions[9], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn wrong_initial_shape_is_rejected() {
        let mut config = McmcConfig::default();
        config.init.xi = Some(DVector::from_vec(vec![0.1, 0.2]));
        let model = model(10, 8, 2, &config);
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            ChainState::initialize(&model, &config, &mut rng),
            Err(McmcError::Dimension { .. })
        ));
    }

    #[test]
    fn fixed_covariates_start_at_placeholders() {
        let mut config = McmcConfig::default();
        config.rules.covariate = LatentRule::Fixed;
        let model = model(10, 8, 1, &config);
        let mut rng = SmallRng::seed_from_u64(5);
        let state = ChainState::initialize(&model, &config, &mut rng).unwrap();
        assert_abs_diff_eq!(
            model.positions(&state.x_missing),
            DVector::from_fn(10, |i, _| i as f64 / 10.0),
            epsilon = 1e-12
        );
        assert_eq!(state.xi.len(), 0);
    }

    #[test]
    fn covariate_commit_keeps_zeta_in_sync() {
        let config = McmcConfig::default();
        let model = model(12, 9, 2, &config);
        let mut rng = SmallRng::seed_from_u64(9);
        let mut state = ChainState::initialize(&model, &config, &mut rng).unwrap();

        let value = 0.4;
        let kernel_row = CovariateRow::new(
            value + model.x_center(),
            model.knots(),
            state.phi,
            model.kernel(),
            &state.knots.inv,
        );
        let zeta_row = &kernel_row.z * &state.eta_star * &state.r_tau;
        state.commit(Update::Covariate {
            missing: 1,
            row: 10,
            value,
            kernel_row,
            zeta_row,
        });
        assert_eq!(state.x_missing[1], value);
        assert!(state.zeta_drift() < 1e-12);
    }
}
