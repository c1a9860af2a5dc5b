/*!
The three-phase chain: warmup, adaptation and production.

Every iteration visits the blocks in a fixed order:

mean → `phi` → `eta_star` → `sigma2` → `lambda_sigma2` → `tau2` → `lambda_tau2` →
`s2_tau2` → `xi` → missing covariates.

Random-walk proposal scales are adapted at the end of every batch of
[`BATCH_SIZE`](crate::tuning::BATCH_SIZE) iterations during warmup and adaptation and are
frozen during production. In production, every `n_thin`-th iteration is written to the
result sink.

# Examples

```rust
use mvgp_mcmc::config::McmcConfig;
use mvgp_mcmc::driver::Driver;
use mvgp_mcmc::model::Model;
use mvgp_mcmc::sink::{DrawStore, MemorySink};
use nalgebra::{DMatrix, DVector};

let n = 20;
let x = DVector::from_fn(n, |i, _| i as f64 / n as f64);
let y = DMatrix::from_fn(n, 2, |i, j| (3.0 * x[i]).sin() + j as f64);
let knots = DVector::from_vec(vec![0.0, 0.5, 1.0]);

let mut config = McmcConfig::new(50, 100, 2).with_seed(42);
config.n_warmup = 50;
let model = Model::new(y, x, 16, knots, &config).unwrap();

let mut driver = Driver::new(model, config).unwrap();
let mut draws = DrawStore::new();
let mut log = MemorySink::new();
let summary = driver.run(&mut draws, &mut log, &()).unwrap();
assert_eq!(summary.records, 50);
assert_eq!(draws.len(), 50);
```
*/

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::config::{LatentRule, McmcConfig, MeanRule, StepRule, UpdateRules};
use crate::core::{phase_progress, Interrupt, Phase};
use crate::ess::{self, EssOutcome};
use crate::error::{McmcError, Result};
use crate::model::Model;
use crate::sink::{Draw, LogSink, ResultSink};
use crate::state::{ChainState, Update};
use crate::tuning::{AcceptanceCount, CovarianceTuner, ScalarTuner, VectorTuner, BATCH_SIZE};
use crate::updates;

/// Update rules in effect for one phase, resolved once when the phase starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    pub phase: Phase,
    pub rules: UpdateRules,
}

impl PhasePlan {
    pub fn new(config: &McmcConfig, phase: Phase) -> Self {
        let mut rules = config.rules.for_phase(phase);
        rules.pooled_scale = config.pooled_scale_rule();
        Self { phase, rules }
    }
}

/// One proposal controller per random-walk block.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuners {
    pub mean: CovarianceTuner,
    pub phi: ScalarTuner,
    /// One per column of the knot coefficients.
    pub eta_star: Vec<CovarianceTuner>,
    pub sigma2: ScalarTuner,
    /// Acts on `log tau2`.
    pub tau2: CovarianceTuner,
    pub s2_tau2: ScalarTuner,
    /// Acts on `logit((xi + 1)/2)`.
    pub xi: CovarianceTuner,
    /// One per missing covariate.
    pub x: VectorTuner,
}

impl Tuners {
    pub fn new(model: &Model, config: &McmcConfig) -> Self {
        let t = &config.tuning;
        let d = model.d();
        Self {
            mean: CovarianceTuner::new(d, t.mu),
            phi: ScalarTuner::new(t.phi),
            eta_star: vec![CovarianceTuner::new(model.n_knots(), t.eta_star); d],
            sigma2: ScalarTuner::new(t.sigma2),
            tau2: CovarianceTuner::new(d, t.tau2),
            s2_tau2: ScalarTuner::new(t.s2_tau2),
            xi: CovarianceTuner::new(model.n_partials(), t.xi),
            x: VectorTuner::new(model.n_missing(), t.x),
        }
    }

    fn reset_batches(&mut self) {
        self.mean.reset_batch();
        self.phi.reset_batch();
        self.eta_star.iter_mut().for_each(CovarianceTuner::reset_batch);
        self.sigma2.reset_batch();
        self.tau2.reset_batch();
        self.s2_tau2.reset_batch();
        self.xi.reset_batch();
        self.x.reset_batch();
    }

    fn reset_counts(&mut self) {
        self.mean.reset_count();
        self.phi.reset_count();
        self.eta_star.iter_mut().for_each(CovarianceTuner::reset_count);
        self.sigma2.reset_count();
        self.tau2.reset_count();
        self.s2_tau2.reset_count();
        self.xi.reset_count();
        self.x.reset_count();
    }
}

/// Production acceptance rate of one random-walk block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockAcceptance {
    pub block: &'static str,
    pub rate: f64,
}

/// What a call to [`Driver::run`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub warmup_iterations: usize,
    pub adapt_iterations: usize,
    pub sample_iterations: usize,
    /// The phase in which the run was cancelled, if it was.
    pub interrupted: Option<Phase>,
    /// Draws written to the result sink.
    pub records: usize,
    pub acceptance: Vec<BlockAcceptance>,
    /// Elliptical slice updates that ran out of bracket and kept the current value.
    pub ess_degenerate: usize,
}

impl RunSummary {
    pub fn iterations(&self, phase: Phase) -> usize {
        match phase {
            Phase::Warmup => self.warmup_iterations,
            Phase::Adapt => self.adapt_iterations,
            Phase::Sample => self.sample_iterations,
        }
    }

    fn count_iteration(&mut self, phase: Phase) {
        match phase {
            Phase::Warmup => self.warmup_iterations += 1,
            Phase::Adapt => self.adapt_iterations += 1,
            Phase::Sample => self.sample_iterations += 1,
        }
    }

    pub fn acceptance_rate(&self, block: &str) -> Option<f64> {
        self.acceptance
            .iter()
            .find(|a| a.block == block)
            .map(|a| a.rate)
    }
}

/// Owns the model, the configuration, the chain state and its random number generator.
#[derive(Debug, Clone)]
pub struct Driver {
    model: Model,
    config: McmcConfig,
    state: ChainState,
    tuners: Tuners,
    seed: u64,
    rng: SmallRng,
    ess_degenerate: usize,
}

impl Driver {
    /**
    Validates the configuration and draws the initial state.

    Without a configured seed the chain is seeded from the thread RNG; [`Driver::seed`]
    reports the seed either way so a run can be repeated.

    # Errors

    Any configuration error, a model built from a different configuration, or a failed
    initialisation (see [`ChainState::initialize`]).
    */
    pub fn new(model: Model, config: McmcConfig) -> Result<Self> {
        config.validate()?;
        if model.kernel() != config.kernel || model.priors() != &config.priors {
            return Err(McmcError::InvalidConfig(
                "model was built from a different kernel or prior configuration".into(),
            ));
        }
        let seed = config.seed.unwrap_or_else(|| thread_rng().gen::<u64>());
        let mut rng = SmallRng::seed_from_u64(seed);
        let state = ChainState::initialize(&model, &config, &mut rng)?;
        let tuners = Tuners::new(&model, &config);
        Ok(Self {
            model,
            config,
            state,
            tuners,
            seed,
            rng,
            ess_degenerate: 0,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &McmcConfig {
        &self.config
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn tuners(&self) -> &Tuners {
        &self.tuners
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn ess_degenerate(&self) -> usize {
        self.ess_degenerate
    }

    fn apply(&mut self, update: Option<Update>) -> bool {
        match update {
            Some(update) => {
                self.state.commit(update);
                true
            }
            None => false,
        }
    }

    fn settle_ess<L: LogSink + ?Sized>(
        &mut self,
        outcome: EssOutcome<Update>,
        block: &str,
        log: &mut L,
    ) -> Result<()> {
        match outcome {
            EssOutcome::Accepted { value, .. } => self.state.commit(value),
            EssOutcome::Degenerate { shrinks } => {
                self.ess_degenerate += 1;
                log.append(&format!(
                    "Elliptical slice sampler for {block} found no point on the slice after {shrinks} shrinks on chain {}; keeping the current value",
                    self.config.chain_id
                ))?;
            }
        }
        Ok(())
    }

    /// Runs iteration `k` of `plan.phase`, without recording anything.
    pub fn iterate<L: LogSink + ?Sized>(
        &mut self,
        plan: &PhasePlan,
        k: usize,
        log: &mut L,
    ) -> Result<()> {
        let rules = &plan.rules;
        let adapt = plan.phase.adapts() && (k + 1) % BATCH_SIZE == 0;

        match rules.mean {
            MeanRule::Fixed => {}
            MeanRule::Gibbs => {
                let update = updates::mean_gibbs(&self.model, &self.state, &mut self.rng);
                self.apply(update);
            }
            MeanRule::Metropolis => {
                let update = updates::mean_metropolis(
                    &self.model,
                    &self.state,
                    &self.tuners.mean,
                    &mut self.rng,
                );
                let accepted = self.apply(update);
                self.tuners.mean.record(k, accepted, &self.state.mu);
                if adapt {
                    self.tuners.mean.adapt(k);
                }
            }
        }

        if rules.phi == StepRule::Metropolis {
            let update = updates::range(&self.model, &self.state, &self.tuners.phi, &mut self.rng);
            let accepted = self.apply(update);
            self.tuners.phi.record(accepted);
            if adapt {
                self.tuners.phi.adapt(k);
            }
        }

        match rules.eta_star {
            LatentRule::Fixed => {}
            LatentRule::Metropolis => {
                for j in 0..self.model.d() {
                    let update = updates::latent_metropolis(
                        &self.model,
                        &self.state,
                        j,
                        &self.tuners.eta_star[j],
                        &mut self.rng,
                    );
                    let accepted = self.apply(update);
                    let column = self.state.eta_star.column(j).into_owned();
                    self.tuners.eta_star[j].record(k, accepted, &column);
                    if adapt {
                        self.tuners.eta_star[j].adapt(k);
                    }
                }
            }
            LatentRule::Elliptical => {
                for j in 0..self.model.d() {
                    let outcome = ess::latent_column(
                        &self.model,
                        &self.state,
                        j,
                        &self.config.ess,
                        &mut self.rng,
                    );
                    self.settle_ess(outcome, "eta_star", log)?;
                }
            }
        }

        if rules.sigma2 == StepRule::Metropolis {
            let update = updates::residual_variance(
                &self.model,
                &self.state,
                &self.tuners.sigma2,
                &mut self.rng,
            );
            let accepted = self.apply(update);
            self.tuners.sigma2.record(accepted);
            if adapt {
                self.tuners.sigma2.adapt(k);
            }
            let update = updates::residual_scale(&self.model, &self.state, &mut self.rng);
            self.state.commit(update);
        }

        if rules.tau2 == StepRule::Metropolis {
            let update = updates::sill(&self.model, &self.state, &self.tuners.tau2, &mut self.rng);
            let accepted = self.apply(update);
            let log_tau2 = self.state.tau2.map(f64::ln);
            self.tuners.tau2.record(k, accepted, &log_tau2);
            if adapt {
                self.tuners.tau2.adapt(k);
            }
        }
        if rules.tau2 == StepRule::Metropolis || rules.pooled_scale == StepRule::Metropolis {
            let update = updates::sill_scales(&self.state, &mut self.rng);
            self.state.commit(update);
        }

        if rules.pooled_scale == StepRule::Metropolis {
            let update = updates::pooled_scale(
                &self.model,
                &self.state,
                &self.tuners.s2_tau2,
                &mut self.rng,
            );
            let accepted = self.apply(update);
            self.tuners.s2_tau2.record(accepted);
            if adapt {
                self.tuners.s2_tau2.adapt(k);
            }
        }

        if rules.xi == StepRule::Metropolis && self.model.n_partials() > 0 {
            let update =
                updates::partials(&self.model, &self.state, &self.tuners.xi, &mut self.rng);
            let accepted = self.apply(update);
            let unconstrained = self.state.xi_unconstrained();
            self.tuners.xi.record(k, accepted, &unconstrained);
            if adapt {
                self.tuners.xi.adapt(k);
            }
        }

        match rules.covariate {
            LatentRule::Fixed => {}
            LatentRule::Metropolis => {
                for m in 0..self.model.n_missing() {
                    let update = updates::covariate_metropolis(
                        &self.model,
                        &self.state,
                        m,
                        &self.tuners.x,
                        &mut self.rng,
                    );
                    let accepted = self.apply(update);
                    self.tuners.x.record(m, accepted);
                }
                if adapt {
                    self.tuners.x.adapt(k);
                }
            }
            LatentRule::Elliptical => {
                for m in 0..self.model.n_missing() {
                    let outcome = ess::covariate(
                        &self.model,
                        &self.state,
                        m,
                        &self.config.ess,
                        &mut self.rng,
                    );
                    self.settle_ess(outcome, "X", log)?;
                }
            }
        }
        Ok(())
    }

    /// Production acceptance rates of the random-walk blocks in `plan`.
    fn acceptance(&self, plan: &PhasePlan) -> Vec<BlockAcceptance> {
        let rules = &plan.rules;
        let mut counts: Vec<(&'static str, AcceptanceCount)> = Vec::new();
        if rules.mean == MeanRule::Metropolis {
            counts.push(("mu", self.tuners.mean.count()));
        }
        if rules.phi == StepRule::Metropolis {
            counts.push(("phi", self.tuners.phi.count()));
        }
        if rules.eta_star == LatentRule::Metropolis {
            let pooled = self
                .tuners
                .eta_star
                .iter()
                .fold(AcceptanceCount::default(), |acc, t| AcceptanceCount {
                    accepted: acc.accepted + t.count().accepted,
                    proposed: acc.proposed + t.count().proposed,
                });
            counts.push(("eta_star", pooled));
        }
        if rules.sigma2 == StepRule::Metropolis {
            counts.push(("sigma2", self.tuners.sigma2.count()));
        }
        if rules.tau2 == StepRule::Metropolis {
            counts.push(("tau2", self.tuners.tau2.count()));
        }
        if rules.pooled_scale == StepRule::Metropolis {
            counts.push(("s2_tau2", self.tuners.s2_tau2.count()));
        }
        if rules.xi == StepRule::Metropolis && self.model.n_partials() > 0 {
            counts.push(("xi", self.tuners.xi.count()));
        }
        if rules.covariate == LatentRule::Metropolis && self.model.n_missing() > 0 {
            counts.push(("X", self.tuners.x.count()));
        }
        counts
            .into_iter()
            .filter_map(|(block, count)| count.rate().map(|rate| BlockAcceptance { block, rate }))
            .collect()
    }

    fn finish<L: LogSink + ?Sized>(&self, summary: &mut RunSummary, log: &mut L) -> Result<()> {
        summary.acceptance = self.acceptance(&PhasePlan::new(&self.config, Phase::Sample));
        summary.ess_degenerate = self.ess_degenerate;
        for a in &summary.acceptance {
            log.append(&format!(
                "Average acceptance rate for {}  = {} for chain {}",
                a.block, a.rate, self.config.chain_id
            ))?;
        }
        Ok(())
    }

    fn run_phases<S, L, I>(
        &mut self,
        results: &mut S,
        log: &mut L,
        interrupt: &I,
        progress: bool,
    ) -> Result<RunSummary>
    where
        S: ResultSink + ?Sized,
        L: LogSink + ?Sized,
        I: Interrupt + ?Sized,
    {
        let chain_id = self.config.chain_id;
        let message_every = self.config.message_every;
        let n_thin = self.config.n_thin;
        let mut summary = RunSummary::default();

        for phase in Phase::ALL {
            let n = self.config.phase_len(phase);
            let plan = PhasePlan::new(&self.config, phase);
            log.append(&format!(
                "Starting MCMC {phase} for chain {chain_id}, running for {n} iterations"
            ))?;
            self.tuners.reset_batches();
            if phase == Phase::Sample {
                self.tuners.reset_counts();
            }
            let pb = progress.then(|| phase_progress(chain_id, phase, n));

            for k in 0..n {
                if interrupt.is_interrupted() {
                    summary.interrupted = Some(phase);
                    if let Some(pb) = &pb {
                        pb.abandon_with_message("Interrupted");
                    }
                    log.append(&format!(
                        "MCMC {phase} interrupted for chain {chain_id} after {k} iterations"
                    ))?;
                    self.finish(&mut summary, log)?;
                    return Ok(summary);
                }
                if (k + 1) % message_every == 0 {
                    log.append(&format!(
                        "MCMC {} Iteration {} for chain {chain_id}",
                        phase.iteration_label(),
                        k + 1
                    ))?;
                }

                self.iterate(&plan, k, log)?;
                summary.count_iteration(phase);

                if phase == Phase::Sample && (k + 1) % n_thin == 0 {
                    results.record(Draw::from_state(&self.model, &self.state));
                    summary.records += 1;
                }
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
            }
            if let Some(pb) = pb {
                pb.finish_with_message("Done!");
            }
        }

        self.finish(&mut summary, log)?;
        Ok(summary)
    }

    /**
    Runs warmup, adaptation and production, writing `floor(n_mcmc / n_thin)` draws to
    `results`.

    `interrupt` is polled at the start of every iteration; once it fires the run returns
    immediately with [`RunSummary::interrupted`] set. The interrupted iteration neither
    changes the state nor writes a draw.

    # Errors

    Only failures of the log sink.
    */
    pub fn run<S, L, I>(&mut self, results: &mut S, log: &mut L, interrupt: &I) -> Result<RunSummary>
    where
        S: ResultSink + ?Sized,
        L: LogSink + ?Sized,
        I: Interrupt + ?Sized,
    {
        self.run_phases(results, log, interrupt, false)
    }

    /// Same as [`Driver::run`], with an `indicatif` progress bar per phase.
    pub fn run_progress<S, L, I>(
        &mut self,
        results: &mut S,
        log: &mut L,
        interrupt: &I,
    ) -> Result<RunSummary>
    where
        S: ResultSink + ?Sized,
        L: LogSink + ?Sized,
        I: Interrupt + ?Sized,
    {
        self.run_phases(results, log, interrupt, true)
    }
}
