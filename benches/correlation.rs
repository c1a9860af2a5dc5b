use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use mvgp_mcmc::config::McmcConfig;
use mvgp_mcmc::correlation::{distance_matrix, CovariateRow, CrossCorrelation, Kernel, KnotCorrelation};
use mvgp_mcmc::model::Model;
use mvgp_mcmc::state::ChainState;
use mvgp_mcmc::tuning::ScalarTuner;
use mvgp_mcmc::updates;

fn bench_correlation(c: &mut Criterion) {
    let knots = DVector::from_fn(25, |i, _| i as f64 * 0.4);
    let positions = DVector::from_fn(500, |i, _| i as f64 * 0.02);
    let knot_dist = distance_matrix(&knots, &knots, Kernel::Exponential);

    c.bench_function("knot_correlation_k25", |b| {
        b.iter(|| KnotCorrelation::new(black_box(&knot_dist), black_box(2.0)))
    });

    let knot_corr = KnotCorrelation::new(&knot_dist, 2.0).expect("Expecting a valid knot matrix");
    c.bench_function("cross_correlation_n500_k25", |b| {
        b.iter(|| {
            CrossCorrelation::new(
                black_box(&positions),
                &knots,
                2.0,
                Kernel::Exponential,
                &knot_corr.inv,
            )
        })
    });

    c.bench_function("covariate_row_k25", |b| {
        b.iter(|| CovariateRow::new(black_box(4.321), &knots, 2.0, Kernel::Exponential, &knot_corr.inv))
    });
}

fn bench_range_update(c: &mut Criterion) {
    let n = 200;
    let x = DVector::from_fn(n, |i, _| i as f64 / 20.0);
    let y = DMatrix::from_fn(n, 3, |i, j| (x[i] * (j + 1) as f64).sin());
    let knots = DVector::from_fn(15, |i, _| i as f64 * 10.0 / 14.0);
    let config = McmcConfig::default().with_seed(1);
    let model = Model::new(y, x, 180, knots, &config).expect("Expecting a valid model");
    let mut rng = SmallRng::seed_from_u64(1);
    let state = ChainState::initialize(&model, &config, &mut rng).expect("Expecting a valid state");
    let tuner = ScalarTuner::new(config.tuning.phi);

    c.bench_function("range_update_n200_k15_d3", |b| {
        b.iter(|| updates::range(&model, black_box(&state), &tuner, &mut rng))
    });
}

criterion_group!(benches, bench_correlation, bench_range_update);
criterion_main!(benches);
