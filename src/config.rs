//! Run configuration: phase lengths, priors, per-block update rules, initial proposal
//! scales and optional initial values.
//!
//! The configuration is read once by [`Driver::new`](crate::driver::Driver::new). Every
//! field has the default the model was originally fitted with, so a run only needs to
//! override what differs:
//!
//! ```rust
//! use mvgp_mcmc::config::{LatentRule, McmcConfig};
//!
//! let mut config = McmcConfig::new(200, 1000, 2).with_kernel("gaussian").unwrap();
//! config.n_warmup = 200;
//! config.rules.covariate = LatentRule::Metropolis;
//! assert!(config.validate().is_ok());
//! ```

use nalgebra::{DMatrix, DVector};

use crate::core::Phase;
use crate::correlation::Kernel;
use crate::error::{McmcError, Result};

/// Hyper-parameters of the prior distributions.
#[derive(Debug, Clone, PartialEq)]
pub struct Priors {
    /// Normal prior mean of every `mu_j`.
    pub mu_mu: f64,
    /// Normal prior variance of every `mu_j`.
    pub s2_mu: f64,
    /// Lower bound of the uniform prior on the range `phi`.
    pub phi_l: f64,
    /// Upper bound of the uniform prior on the range `phi`.
    pub phi_u: f64,
    /// Half-Cauchy scale of the residual variance.
    pub s2_sigma2: f64,
    /// Upper bound of the uniform prior on the pooled sill scale.
    pub a_s2: f64,
    /// Half-Cauchy scale of the sills; the starting value when it is pooled.
    pub s2_tau2: f64,
    /// LKJ concentration of the cross-dimension correlation.
    pub lkj_eta: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            mu_mu: 0.0,
            s2_mu: 100.0,
            phi_l: 0.0001,
            phi_u: 1000.0,
            s2_sigma2: 5.0,
            a_s2: 25.0,
            s2_tau2: 1.0,
            lkj_eta: 1.0,
        }
    }
}

/// Update rule of the overall mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeanRule {
    Fixed,
    Gibbs,
    Metropolis,
}

/// Update rule of a block with a Gaussian prior (latent coefficients, missing covariates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentRule {
    Fixed,
    Metropolis,
    Elliptical,
}

/// Update rule of a block that is only ever sampled by a random walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRule {
    Fixed,
    Metropolis,
}

/// How each block of the state is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRules {
    pub mean: MeanRule,
    pub phi: StepRule,
    pub eta_star: LatentRule,
    pub sigma2: StepRule,
    pub tau2: StepRule,
    /// The pooled sill scale `s2_tau2`.
    pub pooled_scale: StepRule,
    pub xi: StepRule,
    pub covariate: LatentRule,
}

impl Default for UpdateRules {
    fn default() -> Self {
        Self {
            mean: MeanRule::Gibbs,
            phi: StepRule::Metropolis,
            eta_star: LatentRule::Elliptical,
            sigma2: StepRule::Metropolis,
            tau2: StepRule::Metropolis,
            pooled_scale: StepRule::Metropolis,
            xi: StepRule::Metropolis,
            covariate: LatentRule::Elliptical,
        }
    }
}

impl UpdateRules {
    /// Every block frozen; useful as a starting point when testing a single block.
    pub fn fixed() -> Self {
        Self {
            mean: MeanRule::Fixed,
            phi: StepRule::Fixed,
            eta_star: LatentRule::Fixed,
            sigma2: StepRule::Fixed,
            tau2: StepRule::Fixed,
            pooled_scale: StepRule::Fixed,
            xi: StepRule::Fixed,
            covariate: LatentRule::Fixed,
        }
    }

    /// The rules in effect during `phase`.
    ///
    /// Elliptical slice sampling stalls when started far from the posterior mass, so
    /// warmup moves the latent coefficients and the covariates by random walks.
    pub fn for_phase(&self, phase: Phase) -> Self {
        let demote = |rule: LatentRule| match (phase, rule) {
            (Phase::Warmup, LatentRule::Elliptical) => LatentRule::Metropolis,
            (_, rule) => rule,
        };
        Self {
            eta_star: demote(self.eta_star),
            covariate: demote(self.covariate),
            ..*self
        }
    }
}

/// Initial proposal scales.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialTuning {
    pub mu: f64,
    pub phi: f64,
    pub eta_star: f64,
    pub sigma2: f64,
    pub tau2: f64,
    pub s2_tau2: f64,
    pub xi: f64,
    pub x: f64,
}

impl Default for InitialTuning {
    fn default() -> Self {
        Self {
            mu: 1.0 / 3.0_f64.powf(0.8),
            phi: 0.25,
            eta_star: 0.25,
            sigma2: 0.25,
            tau2: 0.25,
            s2_tau2: 1.0,
            xi: 1.0 / 3.0_f64.powf(0.8),
            x: 2.5,
        }
    }
}

/// Optional starting values; anything left `None` is drawn from its prior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialValues {
    pub mu: Option<DVector<f64>>,
    pub phi: Option<f64>,
    pub sigma2: Option<f64>,
    pub tau2: Option<DVector<f64>>,
    /// K × d.
    pub eta_star: Option<DMatrix<f64>>,
    pub xi: Option<DVector<f64>>,
    /// Missing covariates in original units.
    pub x_missing: Option<DVector<f64>>,
}

/// Limits of the elliptical slice samplers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EssSettings {
    /// Bracket shrinks allowed before the update is declared degenerate.
    pub max_shrinks: usize,
    /// Bracket width below which the update is declared degenerate.
    pub min_bracket: f64,
}

impl Default for EssSettings {
    fn default() -> Self {
        Self {
            max_shrinks: 200,
            min_bracket: 1e-12,
        }
    }
}

/// Full configuration of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcConfig {
    pub n_warmup: usize,
    pub n_adapt: usize,
    pub n_mcmc: usize,
    pub n_thin: usize,
    /// Cadence of the progress lines written to the log sink.
    pub message_every: usize,
    /// Label used in log lines.
    pub chain_id: usize,
    /// `None` seeds from the thread RNG.
    pub seed: Option<u64>,
    pub kernel: Kernel,
    /// Sample the pooled sill scale; otherwise it stays at `priors.s2_tau2`.
    pub pool_s2_tau2: bool,
    pub priors: Priors,
    pub rules: UpdateRules,
    pub tuning: InitialTuning,
    pub init: InitialValues,
    pub ess: EssSettings,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            n_warmup: 500,
            n_adapt: 500,
            n_mcmc: 1000,
            n_thin: 1,
            message_every: 5000,
            chain_id: 1,
            seed: None,
            kernel: Kernel::Exponential,
            pool_s2_tau2: true,
            priors: Priors::default(),
            rules: UpdateRules::default(),
            tuning: InitialTuning::default(),
            init: InitialValues::default(),
            ess: EssSettings::default(),
        }
    }
}

impl McmcConfig {
    pub fn new(n_adapt: usize, n_mcmc: usize, n_thin: usize) -> Self {
        Self {
            n_adapt,
            n_mcmc,
            n_thin,
            ..Self::default()
        }
    }

    /// Selects the correlation function by name (`"exponential"` or `"gaussian"`).
    pub fn with_kernel(mut self, name: &str) -> Result<Self> {
        self.kernel = name.parse()?;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The pooled-scale rule actually applied, taking `pool_s2_tau2` into account.
    pub fn pooled_scale_rule(&self) -> StepRule {
        if self.pool_s2_tau2 {
            self.rules.pooled_scale
        } else {
            StepRule::Fixed
        }
    }

    /// Iterations run in `phase`.
    pub fn phase_len(&self, phase: Phase) -> usize {
        match phase {
            Phase::Warmup => self.n_warmup,
            Phase::Adapt => self.n_adapt,
            Phase::Sample => self.n_mcmc,
        }
    }

    /// Number of draws a complete run writes to the result sink.
    pub fn n_save(&self) -> usize {
        self.n_mcmc / self.n_thin.max(1)
    }

    /// Checks everything that does not depend on the data.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(McmcError::InvalidConfig(msg));
        if self.n_thin == 0 {
            return invalid("n_thin must be at least 1".into());
        }
        if self.message_every == 0 {
            return invalid("message_every must be at least 1".into());
        }

        let p = &self.priors;
        if !(p.phi_l >= 0.0 && p.phi_l < p.phi_u) {
            return invalid(format!(
                "phi bounds must satisfy 0 <= phi_l < phi_u, got ({}, {})",
                p.phi_l, p.phi_u
            ));
        }
        for (name, value) in [
            ("s2_mu", p.s2_mu),
            ("s2_sigma2", p.s2_sigma2),
            ("a_s2", p.a_s2),
            ("s2_tau2", p.s2_tau2),
            ("lkj_eta", p.lkj_eta),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return invalid(format!("{name} must be positive and finite, got {value}"));
            }
        }
        if self.pool_s2_tau2 && p.s2_tau2 >= p.a_s2 {
            return invalid(format!(
                "s2_tau2 must lie below a_s2 when pooled, got {} >= {}",
                p.s2_tau2, p.a_s2
            ));
        }

        let t = &self.tuning;
        for (name, value) in [
            ("mu", t.mu),
            ("phi", t.phi),
            ("eta_star", t.eta_star),
            ("sigma2", t.sigma2),
            ("tau2", t.tau2),
            ("s2_tau2", t.s2_tau2),
            ("xi", t.xi),
            ("x", t.x),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return invalid(format!(
                    "initial tuning for {name} must be non-negative, got {value}"
                ));
            }
        }

        if self.ess.max_shrinks == 0 {
            return invalid("ess.max_shrinks must be at least 1".into());
        }
        if let Some(phi) = self.init.phi {
            if !(phi > p.phi_l && phi < p.phi_u) {
                return invalid(format!(
                    "initial phi {phi} outside ({}, {})",
                    p.phi_l, p.phi_u
                ));
            }
        }
        if let Some(sigma2) = self.init.sigma2 {
            if !(sigma2 > 0.0) {
                return invalid(format!("initial sigma2 must be positive, got {sigma2}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(McmcConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_kernel_is_rejected() {
        let err = McmcConfig::default().with_kernel("spherical").unwrap_err();
        assert!(matches!(err, McmcError::UnsupportedKernel(_)));
    }

    #[test]
    fn warmup_demotes_elliptical_rules() {
        let rules = UpdateRules::default();
        let warm = rules.for_phase(Phase::Warmup);
        assert_eq!(warm.eta_star, LatentRule::Metropolis);
        assert_eq!(warm.covariate, LatentRule::Metropolis);
        assert_eq!(warm.mean, MeanRule::Gibbs);
        assert_eq!(rules.for_phase(Phase::Adapt), rules);
        assert_eq!(rules.for_phase(Phase::Sample), rules);
    }

    #[test]
    fn warmup_keeps_fixed_blocks_fixed() {
        let rules = UpdateRules::fixed();
        assert_eq!(rules.for_phase(Phase::Warmup), rules);
    }

    #[test]
    fn pooling_switch_overrides_rule() {
        let mut config = McmcConfig::default();
        assert_eq!(config.pooled_scale_rule(), StepRule::Metropolis);
        config.pool_s2_tau2 = false;
        assert_eq!(config.pooled_scale_rule(), StepRule::Fixed);
    }

    #[test]
    fn invalid_settings_are_reported() {
        let mut config = McmcConfig::new(10, 10, 0);
        assert!(matches!(config.validate(), Err(McmcError::InvalidConfig(_))));

        config.n_thin = 1;
        config.priors.phi_u = config.priors.phi_l;
        assert!(config.validate().is_err());

        config.priors = Priors::default();
        config.init.phi = Some(5000.0);
        assert!(config.validate().is_err());

        config.init.phi = None;
        config.priors.s2_tau2 = 30.0;
        assert!(config.validate().is_err());
        config.pool_s2_tau2 = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn n_save_rounds_down() {
        assert_eq!(McmcConfig::new(0, 1000, 2).n_save(), 500);
        assert_eq!(McmcConfig::new(0, 1001, 3).n_save(), 333);
    }
}
