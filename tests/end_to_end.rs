//! Full runs of the three-phase driver on a simulated bivariate data set.

use std::sync::atomic::{AtomicBool, Ordering};

use mvgp_mcmc::config::{LatentRule, MeanRule, StepRule, UpdateRules};
use mvgp_mcmc::core::Phase;
use mvgp_mcmc::sink::{DrawStore, FileSink, MemorySink};
use mvgp_mcmc::{Driver, McmcConfig, Model};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const N: usize = 50;
const N_OBS: usize = 40;
const SEED: u64 = 42;

fn simulated_model(config: &McmcConfig) -> Model {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let x: DVector<f64> = DVector::from_fn(N, |_, _| rng.gen_range(0.0_f64..10.0));
    let y = DMatrix::from_fn(N, 2, |i, j| {
        let signal = if j == 0 { (x[i] / 2.0).sin() } else { 0.5 * (x[i] / 3.0).cos() + 1.0 };
        signal + 0.2 * rng.sample::<f64, _>(StandardNormal)
    });
    let knots = DVector::from_vec(vec![0.0, 2.5, 5.0, 7.5, 10.0]);
    Model::new(y, x, N_OBS, knots, config).unwrap()
}

fn full_config() -> McmcConfig {
    let mut config = McmcConfig::new(200, 1_000, 2).with_seed(SEED);
    config.n_warmup = 200;
    config.message_every = 100;
    config
}

#[test]
fn test_full_run_respects_supports() {
    let config = full_config();
    let model = simulated_model(&config);
    let (phi_l, phi_u) = (config.priors.phi_l, config.priors.phi_u);
    let mut driver = Driver::new(model, config).unwrap();

    let mut draws = DrawStore::new();
    let mut log = MemorySink::new();
    let summary = driver.run(&mut draws, &mut log, &()).unwrap();

    assert_eq!(summary.records, 500);
    assert_eq!(draws.len(), 500);
    assert_eq!(summary.interrupted, None);
    assert_eq!(summary.iterations(Phase::Sample), 1_000);

    for draw in draws.draws() {
        assert!(draw.phi >= phi_l && draw.phi <= phi_u, "phi = {}", draw.phi);
        assert!(draw.sigma2 > 0.0);
        assert!(draw.tau2.iter().all(|t| *t > 0.0));
        assert!(draw.xi.iter().all(|x| x.abs() < 1.0), "xi = {}", draw.xi);
        for j in 0..2 {
            assert!((draw.omega[(j, j)] - 1.0).abs() < 1e-10);
        }
        assert!(draw.x.iter().all(|x| x.is_finite()));
    }
    assert!(driver.state().zeta_drift() < 1e-8);

    let arrays = draws.arrays();
    assert_eq!(arrays.zeta.shape(), &[500, N, 2]);
    assert_eq!(arrays.x.shape(), &[500, N - N_OBS]);
    assert_eq!(arrays.omega.shape(), &[500, 2, 2]);

    assert!(log.contains("Starting MCMC warmup for chain 1, running for 200 iterations"));
    assert!(log.contains("Starting MCMC adaptation for chain 1, running for 200 iterations"));
    assert!(log.contains("Starting MCMC fit for chain 1, running for 1000 iterations"));
    assert!(log.contains("MCMC Fitting Iteration 1000 for chain 1"));
    for block in ["phi", "sigma2", "tau2", "s2_tau2", "xi"] {
        let rate = summary
            .acceptance_rate(block)
            .unwrap_or_else(|| panic!("Expected an acceptance rate for {block}"));
        assert!((0.0..=1.0).contains(&rate));
        assert!(log.contains(&format!("Average acceptance rate for {block}  =")));
    }
    // Elliptical blocks have no acceptance rate.
    assert_eq!(summary.acceptance_rate("eta_star"), None);
    assert_eq!(summary.acceptance_rate("X"), None);
}

#[test]
fn test_metropolis_everywhere() {
    let mut config = full_config();
    config.n_warmup = 100;
    config.n_adapt = 100;
    config.n_mcmc = 200;
    config.rules.eta_star = LatentRule::Metropolis;
    config.rules.covariate = LatentRule::Metropolis;
    config.rules.mean = MeanRule::Metropolis;
    config = config.with_kernel("gaussian").unwrap();
    let model = simulated_model(&config);
    let mut driver = Driver::new(model, config).unwrap();

    let summary = driver.run(&mut (), &mut (), &()).unwrap();
    assert_eq!(summary.records, 100);
    assert_eq!(summary.ess_degenerate, 0);
    for block in ["mu", "eta_star", "X"] {
        assert!(summary.acceptance_rate(block).is_some(), "Missing rate for {block}");
    }
    assert!(driver.state().zeta_drift() < 1e-8);
}

#[test]
fn test_forced_rejection_is_bit_identical() {
    let mut config = full_config();
    config.n_warmup = 0;
    config.n_adapt = 0;
    config.n_mcmc = 300;
    config.rules = UpdateRules::fixed();
    config.rules.xi = StepRule::Metropolis;
    config.pool_s2_tau2 = false;
    config.tuning.xi = 1e6;
    let model = simulated_model(&config);
    let mut driver = Driver::new(model, config).unwrap();

    let before = driver.state().clone();
    let mut draws = Vec::new();
    let summary = driver.run(&mut draws, &mut (), &()).unwrap();

    assert_eq!(driver.state(), &before);
    assert_eq!(summary.acceptance_rate("xi"), Some(0.0));
    assert!(draws.iter().all(|d| d.xi == before.xi));
}

#[test]
fn test_interrupt_flag_stops_run() {
    let config = full_config();
    let model = simulated_model(&config);
    let mut driver = Driver::new(model, config).unwrap();

    let stop = AtomicBool::new(true);
    let mut draws = DrawStore::new();
    let summary = driver.run(&mut draws, &mut (), &stop).unwrap();
    assert_eq!(summary.interrupted, Some(Phase::Warmup));
    assert_eq!(summary.iterations(Phase::Warmup), 0);
    assert!(draws.is_empty());

    stop.store(false, Ordering::Relaxed);
    let mut short = full_config();
    short.n_warmup = 10;
    short.n_adapt = 10;
    short.n_mcmc = 10;
    let mut driver = Driver::new(simulated_model(&short), short).unwrap();
    let summary = driver.run(&mut draws, &mut (), &stop).unwrap();
    assert_eq!(summary.interrupted, None);
    assert_eq!(draws.len(), 5);
}

#[test]
fn test_log_file_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chains.log");
    let mut short = full_config();
    short.n_warmup = 5;
    short.n_adapt = 5;
    short.n_mcmc = 10;

    for chain_id in 1..=2 {
        let mut config = short.clone();
        config.chain_id = chain_id;
        let mut driver = Driver::new(simulated_model(&config), config).unwrap();
        let mut log = FileSink::new(&path).unwrap();
        driver.run(&mut (), &mut log, &()).unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("Starting MCMC warmup for chain 1, running for 5 iterations"));
    assert!(content.contains("Starting MCMC fit for chain 2, running for 10 iterations"));
}

#[test]
fn test_unseeded_run_reports_its_seed() {
    let mut config = full_config();
    config.seed = None;
    config.n_warmup = 5;
    config.n_adapt = 5;
    config.n_mcmc = 10;
    let model = simulated_model(&config);

    let mut first = Driver::new(model.clone(), config.clone()).unwrap();
    let mut replay = Driver::new(model, config.with_seed(first.seed())).unwrap();
    let (mut a, mut b) = (Vec::new(), Vec::new());
    first.run(&mut a, &mut (), &()).unwrap();
    replay.run(&mut b, &mut (), &()).unwrap();
    assert_eq!(a, b);
}
