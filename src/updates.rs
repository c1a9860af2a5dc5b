/*!
Per-block Gibbs draws and Metropolis–Hastings proposals.

Every function reads the current [`ChainState`] and returns the [`Update`] to commit, or
`None` when the proposal is rejected. Nothing here mutates the state, so a rejection
leaves the chain exactly as it was. A proposal outside the support of its prior, or one
whose correlation matrix cannot be factorised, is a rejection.

The acceptance rule is the usual one on the log scale: accept when
`log π(x*) - log π(x) > log U`, `U ~ Uniform(0, 1)`.
*/

use nalgebra::{DMatrix, DVector, RowDVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::correlation::{CovariateRow, CrossCorrelation, KnotCorrelation};
use crate::distributions::{
    log_density_beta, log_density_gamma, log_density_half_cauchy, log_density_mvn_chol,
    log_density_normal, sample_gamma, sample_mvn_canonical,
};
use crate::lkj::{build_correlation_from_partials, expit};
use crate::model::Model;
use crate::state::{latent_effect, scale_factor, ChainState, Update};
use crate::tuning::{CovarianceTuner, ScalarTuner, VectorTuner};

#[inline]
fn accept<R: Rng + ?Sized>(log_ratio: f64, rng: &mut R) -> bool {
    log_ratio > rng.gen::<f64>().ln()
}

#[inline]
fn normal_step<R: Rng + ?Sized>(scale: f64, rng: &mut R) -> f64 {
    scale * rng.sample::<f64, _>(StandardNormal)
}

/// `Σ_j log N(eta_star_j; 0, C)` over the columns of `eta_star`.
fn knot_prior(eta_star: &DMatrix<f64>, chol: &DMatrix<f64>) -> f64 {
    let zero = DVector::zeros(eta_star.nrows());
    eta_star
        .column_iter()
        .map(|col| log_density_mvn_chol(&col.into_owned(), &zero, chol))
        .sum()
}

/// Conjugate draw of the mean: `N(A⁻¹b, A⁻¹)` with
/// `A = (N/sigma2 + 1/s2_mu) I` and `b = colSums(Y - zeta)/sigma2 + mu_mu/s2_mu`.
pub fn mean_gibbs<R: Rng + ?Sized>(model: &Model, state: &ChainState, rng: &mut R) -> Option<Update> {
    let priors = model.priors();
    let d = model.d();
    let precision = model.n() as f64 / state.sigma2 + 1.0 / priors.s2_mu;
    let a = DMatrix::identity(d, d) * precision;
    let col_sums = (model.y() - &state.zeta).row_sum().transpose();
    let b = col_sums / state.sigma2 + DVector::from_element(d, priors.mu_mu / priors.s2_mu);
    sample_mvn_canonical(&a, &b, rng).map(Update::Mean)
}

pub fn mean_metropolis<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &CovarianceTuner,
    rng: &mut R,
) -> Option<Update> {
    let priors = model.priors();
    let sd = priors.s2_mu.sqrt();
    let proposal = &state.mu + tuner.step(rng);
    let prior = |mu: &DVector<f64>| -> f64 {
        mu.iter()
            .map(|m| log_density_normal(*m, priors.mu_mu, sd))
            .sum()
    };
    let log_ratio = model.log_like(&proposal, &state.zeta, state.sigma2) + prior(&proposal)
        - model.log_like(&state.mu, &state.zeta, state.sigma2)
        - prior(&state.mu);
    accept(log_ratio, rng).then_some(Update::Mean(proposal))
}

/// Random walk on the range. The knot factorisation, the cross correlation and `zeta`
/// are all rebuilt for the proposal.
pub fn range<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &ScalarTuner,
    rng: &mut R,
) -> Option<Update> {
    let priors = model.priors();
    let phi = state.phi + normal_step(tuner.scale(), rng);
    if !(phi > priors.phi_l && phi < priors.phi_u) {
        return None;
    }
    let knots = KnotCorrelation::try_new(model.knot_dist(), phi)?;
    let cross = CrossCorrelation::from_distance(state.cross.dist.clone(), phi, &knots.inv);
    let zeta = latent_effect(&cross.z, &state.eta_star, &state.r_tau);

    let log_ratio = model.log_like(&state.mu, &zeta, state.sigma2)
        + knot_prior(&state.eta_star, &knots.chol)
        - model.log_like(&state.mu, &state.zeta, state.sigma2)
        - knot_prior(&state.eta_star, &state.knots.chol);
    accept(log_ratio, rng).then_some(Update::Range {
        phi,
        knots,
        cross,
        zeta,
    })
}

/// Random walk on column `j` of the knot coefficients, prior `N(0, C)`.
pub fn latent_metropolis<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    j: usize,
    tuner: &CovarianceTuner,
    rng: &mut R,
) -> Option<Update> {
    let zero = DVector::zeros(model.n_knots());
    let current = state.eta_star.column(j).into_owned();
    let proposed = &current + tuner.step(rng);
    let mut eta_star = state.eta_star.clone();
    eta_star.set_column(j, &proposed);
    let zeta = latent_effect(&state.cross.z, &eta_star, &state.r_tau);

    let log_ratio = log_density_mvn_chol(&proposed, &zero, &state.knots.chol)
        + model.log_like(&state.mu, &zeta, state.sigma2)
        - log_density_mvn_chol(&current, &zero, &state.knots.chol)
        - model.log_like(&state.mu, &state.zeta, state.sigma2);
    accept(log_ratio, rng).then_some(Update::Latent { eta_star, zeta })
}

/// Random walk on the residual variance with a `Gamma(1/2, rate lambda_sigma2)` prior,
/// which with the hyper-prior on `lambda_sigma2` makes `sigma2` half-Cauchy.
pub fn residual_variance<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &ScalarTuner,
    rng: &mut R,
) -> Option<Update> {
    let sigma2 = state.sigma2 + normal_step(tuner.scale(), rng);
    if !(sigma2 > 0.0) {
        return None;
    }
    let n_d = (model.n() * model.d()) as f64;
    let ss = model.residual_sum_sq(&state.mu, &state.zeta);
    let target = |s2: f64| {
        log_density_gamma(s2, 0.5, state.lambda_sigma2) - 0.5 * n_d * s2.ln() - 0.5 * ss / s2
    };
    accept(target(sigma2) - target(state.sigma2), rng).then_some(Update::ResidualVariance(sigma2))
}

/// Conjugate draw `lambda_sigma2 ~ Gamma(1, rate s2_sigma2 + sigma2)`.
pub fn residual_scale<R: Rng + ?Sized>(model: &Model, state: &ChainState, rng: &mut R) -> Update {
    let rate = model.priors().s2_sigma2 + state.sigma2;
    Update::ResidualScale(sample_gamma(1.0, rate, rng))
}

/// Joint random walk on `log tau2` with half-Cauchy(`s2_tau2`) priors on each sill.
pub fn sill<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &CovarianceTuner,
    rng: &mut R,
) -> Option<Update> {
    let log_tau2 = state.tau2.map(f64::ln);
    let log_tau2_star = &log_tau2 + tuner.step(rng);
    let tau2 = log_tau2_star.map(f64::exp);
    if tau2.iter().any(|t| !(*t > 0.0 && t.is_finite())) {
        return None;
    }
    let r_tau = scale_factor(&state.lkj.r, &tau2);
    let zeta = latent_effect(&state.cross.z, &state.eta_star, &r_tau);

    let prior = |t: &DVector<f64>| -> f64 {
        t.iter()
            .map(|t| log_density_half_cauchy(*t, state.s2_tau2))
            .sum()
    };
    let log_ratio = model.log_like(&state.mu, &zeta, state.sigma2)
        + log_tau2_star.sum()
        + prior(&tau2)
        - model.log_like(&state.mu, &state.zeta, state.sigma2)
        - log_tau2.sum()
        - prior(&state.tau2);
    accept(log_ratio, rng).then_some(Update::Sill { tau2, r_tau, zeta })
}

/// Conjugate draws `lambda_tau2_j ~ Gamma(1, rate s2_tau2 + tau2_j)`.
pub fn sill_scales<R: Rng + ?Sized>(state: &ChainState, rng: &mut R) -> Update {
    Update::SillScales(state.tau2.map(|t| sample_gamma(1.0, state.s2_tau2 + t, rng)))
}

/// Random walk on the pooled sill scale, uniform on `(0, a_s2)`.
pub fn pooled_scale<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &ScalarTuner,
    rng: &mut R,
) -> Option<Update> {
    let s2 = state.s2_tau2 + normal_step(tuner.scale(), rng);
    if !(s2 > 0.0 && s2 < model.priors().a_s2) {
        return None;
    }
    let target = |scale: f64| -> f64 {
        state
            .lambda_tau2
            .iter()
            .map(|l| log_density_gamma(*l, 0.5, scale))
            .sum()
    };
    accept(target(s2) - target(state.s2_tau2), rng).then_some(Update::PooledScale(s2))
}

/// Joint random walk on `logit((xi + 1)/2)` with `Beta(eta_b, eta_b)` priors on
/// `(xi + 1)/2`.
pub fn partials<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    tuner: &CovarianceTuner,
    rng: &mut R,
) -> Option<Update> {
    let unconstrained = state.xi_unconstrained() + tuner.step(rng);
    let xi = unconstrained.map(|u| 2.0 * expit(u) - 1.0);
    let lkj = build_correlation_from_partials(&xi, model.d()).ok()?;
    let r_tau = scale_factor(&lkj.r, &state.tau2);
    let zeta = latent_effect(&state.cross.z, &state.eta_star, &r_tau);

    let prior = |xi: &DVector<f64>| -> f64 {
        xi.iter()
            .zip(model.lkj_shapes().iter())
            .map(|(x, shape)| log_density_beta(0.5 * (x + 1.0), *shape, *shape))
            .sum()
    };
    let log_ratio = model.log_like(&state.mu, &zeta, state.sigma2)
        + lkj.log_jacobian
        + prior(&xi)
        - model.log_like(&state.mu, &state.zeta, state.sigma2)
        - state.lkj.log_jacobian
        - prior(&state.xi);
    accept(log_ratio, rng).then_some(Update::Partials {
        xi,
        lkj,
        r_tau,
        zeta,
    })
}

/// Random walk on missing covariate `m`, prior `N(0, s_X²)` on the centered value.
/// Only the matching rows of the cross correlation and of `zeta` are rebuilt.
pub fn covariate_metropolis<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    m: usize,
    tuner: &VectorTuner,
    rng: &mut R,
) -> Option<Update> {
    let row = model.n_obs() + m;
    let current = state.x_missing[m];
    let value = current + normal_step(tuner.scale(m), rng);
    let kernel_row = CovariateRow::new(
        value + model.x_center(),
        model.knots(),
        state.phi,
        model.kernel(),
        &state.knots.inv,
    );
    let zeta_row: RowDVector<f64> = &kernel_row.z * &state.eta_star * &state.r_tau;

    let sigma = state.sigma();
    let s_x = model.x_scale();
    let log_ratio = log_density_normal(value, 0.0, s_x)
        + model.row_log_like(row, &state.mu, &zeta_row, sigma)
        - log_density_normal(current, 0.0, s_x)
        - model.row_log_like(row, &state.mu, &state.zeta.row(row), sigma);
    accept(log_ratio, rng).then_some(Update::Covariate {
        missing: m,
        row,
        value,
        kernel_row,
        zeta_row,
    })
}
