/*!
Elliptical slice sampling for blocks with a zero-mean Gaussian prior.

A proposal lies on the ellipse `cos θ · current + sin θ · ν` through the current value
and a fresh prior draw `ν`. The angle bracket starts as the full ellipse and shrinks
toward the current value until a proposal clears the slice threshold. Every proposal is
accepted with positive probability near the current value, so the loop ends in theory;
in floating point it may not, which is why both the number of shrinks and the bracket
width are bounded and exhaustion is reported as [`EssOutcome::Degenerate`].
*/

use std::f64::consts::TAU;

use nalgebra::{DMatrix, DVector, RowDVector};
use rand::Rng;
use rand_distr::Normal;

pub use crate::config::EssSettings;
use crate::correlation::CovariateRow;
use crate::distributions::sample_mvn_chol;
use crate::model::Model;
use crate::state::{latent_effect, ChainState, Update};

/// Result of one elliptical slice update.
#[derive(Debug, Clone, PartialEq)]
pub enum EssOutcome<T> {
    /// A proposal on the slice, and the number of shrinks it took.
    Accepted { value: T, shrinks: usize },
    /// The bracket ran out; the caller keeps the current value.
    Degenerate { shrinks: usize },
}

impl<T> EssOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EssOutcome<U> {
        match self {
            EssOutcome::Accepted { value, shrinks } => EssOutcome::Accepted {
                value: f(value),
                shrinks,
            },
            EssOutcome::Degenerate { shrinks } => EssOutcome::Degenerate { shrinks },
        }
    }

    pub fn shrinks(&self) -> usize {
        match self {
            EssOutcome::Accepted { shrinks, .. } | EssOutcome::Degenerate { shrinks } => *shrinks,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bracket {
    lo: f64,
    hi: f64,
    theta: f64,
}

impl Bracket {
    fn width(&self) -> f64 {
        self.hi - self.lo
    }

    fn shrink(&mut self) {
        if self.theta < 0.0 {
            self.lo = self.theta;
        } else {
            self.hi = self.theta;
        }
    }
}

enum Stage {
    Init,
    Propose(Bracket),
    Shrink(Bracket),
}

/**
Runs one elliptical slice update.

`propose(θ)` builds the point at angle `θ` on the ellipse together with whatever depends
on it; `log_like` scores it. `current_ll` is the log-likelihood of the current value.

# Examples

```rust
use mvgp_mcmc::ess::{elliptical_slice, EssOutcome, EssSettings};
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut rng = SmallRng::seed_from_u64(42);
let (current, prior_draw) = (0.5_f64, -1.2_f64);
let log_like = |x: &f64| -0.5 * (x - 1.0) * (x - 1.0);
let outcome = elliptical_slice(
    &EssSettings::default(),
    log_like(&current),
    &mut rng,
    |theta| current * theta.cos() + prior_draw * theta.sin(),
    log_like,
);
assert!(matches!(outcome, EssOutcome::Accepted { .. }));
```
*/
pub fn elliptical_slice<T, R, P, L>(
    settings: &EssSettings,
    current_ll: f64,
    rng: &mut R,
    mut propose: P,
    mut log_like: L,
) -> EssOutcome<T>
where
    R: Rng + ?Sized,
    P: FnMut(f64) -> T,
    L: FnMut(&T) -> f64,
{
    let threshold = rng.gen::<f64>().ln() + current_ll;
    let mut shrinks = 0;
    let mut stage = Stage::Init;
    loop {
        stage = match stage {
            Stage::Init => {
                let theta = rng.gen::<f64>() * TAU;
                Stage::Propose(Bracket {
                    lo: theta - TAU,
                    hi: theta,
                    theta,
                })
            }
            Stage::Propose(bracket) => {
                let value = propose(bracket.theta);
                if log_like(&value) > threshold {
                    return EssOutcome::Accepted { value, shrinks };
                }
                Stage::Shrink(bracket)
            }
            Stage::Shrink(mut bracket) => {
                bracket.shrink();
                shrinks += 1;
                if shrinks >= settings.max_shrinks || bracket.width() < settings.min_bracket {
                    return EssOutcome::Degenerate { shrinks };
                }
                bracket.theta = bracket.lo + rng.gen::<f64>() * bracket.width();
                Stage::Propose(bracket)
            }
        };
    }
}

/// Slice update of column `j` of the knot coefficients, prior `N(0, C)`.
pub fn latent_column<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    j: usize,
    settings: &EssSettings,
    rng: &mut R,
) -> EssOutcome<Update> {
    let prior_draw = sample_mvn_chol(&DVector::zeros(model.n_knots()), &state.knots.chol, rng);
    let current = state.eta_star.column(j).into_owned();
    let current_ll = model.log_like(&state.mu, &state.zeta, state.sigma2);

    let propose = |theta: f64| {
        let mut eta_star = state.eta_star.clone();
        eta_star.set_column(j, &(&current * theta.cos() + &prior_draw * theta.sin()));
        let zeta = latent_effect(&state.cross.z, &eta_star, &state.r_tau);
        (eta_star, zeta)
    };
    let log_like =
        |(_, zeta): &(DMatrix<f64>, DMatrix<f64>)| model.log_like(&state.mu, zeta, state.sigma2);

    elliptical_slice(settings, current_ll, rng, propose, log_like)
        .map(|(eta_star, zeta)| Update::Latent { eta_star, zeta })
}

/// Slice update of missing covariate `m`, prior `N(0, s_X²)` on the centered value.
pub fn covariate<R: Rng + ?Sized>(
    model: &Model,
    state: &ChainState,
    m: usize,
    settings: &EssSettings,
    rng: &mut R,
) -> EssOutcome<Update> {
    let prior = Normal::new(0.0, model.x_scale()).expect("Expecting a positive covariate scale.");
    let prior_draw: f64 = rng.sample(prior);
    let row = model.n_obs() + m;
    let current = state.x_missing[m];
    let sigma = state.sigma();
    let current_ll = model.row_log_like(row, &state.mu, &state.zeta.row(row), sigma);

    let propose = |theta: f64| {
        let value = current * theta.cos() + prior_draw * theta.sin();
        let kernel_row = CovariateRow::new(
            value + model.x_center(),
            model.knots(),
            state.phi,
            model.kernel(),
            &state.knots.inv,
        );
        let zeta_row: RowDVector<f64> = &kernel_row.z * &state.eta_star * &state.r_tau;
        (value, kernel_row, zeta_row)
    };
    let log_like = |(_, _, zeta_row): &(f64, CovariateRow, RowDVector<f64>)| {
        model.row_log_like(row, &state.mu, zeta_row, sigma)
    };

    elliptical_slice(settings, current_ll, rng, propose, log_like).map(
        |(value, kernel_row, zeta_row)| Update::Covariate {
            missing: m,
            row,
            value,
            kernel_row,
            zeta_row,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::StandardNormal;

    fn nan_response_fixture(rng: &mut SmallRng) -> (Model, ChainState) {
        let config = crate::config::McmcConfig::default().with_seed(7);
        let n = 12;
        let x = DVector::from_fn(n, |i, _| i as f64 * 0.5);
        let mut y = DMatrix::from_fn(n, 2, |i, j| (x[i] * (j + 1) as f64).sin());
        y[(n - 1, 0)] = f64::NAN;
        let knots = DVector::from_vec(vec![0.0, 2.0, 4.0, 6.0]);
        let model = Model::new(y, x, n - 2, knots, &config).unwrap();
        let state = ChainState::initialize(&model, &config, rng).unwrap();
        (model, state)
    }

    #[test]
    fn specialisations_report_degenerate_slices() {
        let mut rng = SmallRng::seed_from_u64(42);
        let (model, state) = nan_response_fixture(&mut rng);
        let settings = EssSettings::default();

        for j in 0..model.d() {
            let outcome = latent_column(&model, &state, j, &settings, &mut rng);
            assert!(
                matches!(outcome, EssOutcome::Degenerate { .. }),
                "Expected a degenerate latent update, got {outcome:?}"
            );
        }
        // Only the last row has a missing response value.
        let outcome = covariate(&model, &state, 1, &settings, &mut rng);
        assert!(matches!(outcome, EssOutcome::Degenerate { .. }));
        let outcome = covariate(&model, &state, 0, &settings, &mut rng);
        assert!(matches!(outcome, EssOutcome::Accepted { .. }));
    }

    #[test]
    fn never_satisfied_likelihood_is_degenerate() {
        let mut rng = SmallRng::seed_from_u64(42);
        let settings = EssSettings::default();
        let outcome = elliptical_slice(
            &settings,
            0.0,
            &mut rng,
            |theta| theta,
            |_: &f64| f64::NEG_INFINITY,
        );
        match outcome {
            EssOutcome::Degenerate { shrinks } => assert!(shrinks <= settings.max_shrinks),
            other => panic!("Expected a degenerate outcome, got {other:?}"),
        }
    }

    #[test]
    fn nan_likelihood_is_degenerate() {
        let mut rng = SmallRng::seed_from_u64(3);
        let outcome = elliptical_slice(
            &EssSettings::default(),
            0.0,
            &mut rng,
            |theta| theta,
            |_: &f64| f64::NAN,
        );
        assert!(matches!(outcome, EssOutcome::Degenerate { .. }));
    }

    #[test]
    fn bracket_width_limit_stops_early() {
        let mut rng = SmallRng::seed_from_u64(7);
        let settings = EssSettings {
            max_shrinks: 1_000,
            min_bracket: 10.0,
        };
        let outcome = elliptical_slice(
            &settings,
            0.0,
            &mut rng,
            |theta| theta,
            |_: &f64| f64::NEG_INFINITY,
        );
        assert_eq!(outcome, EssOutcome::Degenerate { shrinks: 1 });
    }

    #[test]
    fn first_proposal_accepted_when_current_is_impossible() {
        let mut rng = SmallRng::seed_from_u64(11);
        let outcome = elliptical_slice(
            &EssSettings::default(),
            f64::NEG_INFINITY,
            &mut rng,
            |theta| theta,
            |_: &f64| 0.0,
        );
        assert!(matches!(outcome, EssOutcome::Accepted { shrinks: 0, .. }));
    }

    #[test]
    fn accepted_angles_stay_inside_shrinking_bracket() {
        // The likelihood only accepts angles close to zero, so the bracket must shrink
        // toward the current value before a proposal is accepted.
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..200 {
            let outcome = elliptical_slice(
                &EssSettings::default(),
                0.0,
                &mut rng,
                |theta| theta,
                |theta: &f64| if theta.abs() < 0.05 { 1.0 } else { f64::NEG_INFINITY },
            );
            match outcome {
                EssOutcome::Accepted { value, .. } => assert!(value.abs() < 0.05),
                other => panic!("Expected acceptance, got {other:?}"),
            }
        }
    }

    #[test]
    fn scalar_chain_targets_conjugate_posterior() {
        // Prior N(0, 1), one observation y = 1 with unit noise: posterior N(0.5, 0.5).
        let mut rng = SmallRng::seed_from_u64(42);
        let settings = EssSettings::default();
        let log_like = |x: &f64| -0.5 * (1.0 - x) * (1.0 - x);
        let mut x = 0.0_f64;
        let n = 40_000;
        let mut draws = Vec::with_capacity(n);
        for _ in 0..n {
            let nu: f64 = rng.sample(StandardNormal);
            let current = x;
            if let EssOutcome::Accepted { value, .. } = elliptical_slice(
                &settings,
                log_like(&current),
                &mut rng,
                |theta| current * theta.cos() + nu * theta.sin(),
                log_like,
            ) {
                x = value;
            }
            draws.push(x);
        }
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.05);
        assert_abs_diff_eq!(var, 0.5, epsilon = 0.05);
    }
}
