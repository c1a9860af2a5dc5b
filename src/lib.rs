/*!
# mvgp-mcmc

Adaptive MCMC for a multivariate Gaussian process observed through a single,
partially missing covariate.

The model is a predictive-process GP over `K` knots with a cross-dimension correlation
built from LKJ partial correlations:

```text
Y = 1 muᵗ + Z eta_star R_tau + eps,   eps ~ N(0, sigma2 I)
```

where `Z = c C⁻¹` maps knot values to the covariate positions. The first `n_obs`
covariates are observed; the rest are sampled with everything else.

A run is driven by [`Driver`]: warmup, adaptation, then production. Each block uses Gibbs
draws, adaptive Metropolis–Hastings random walks or elliptical slice sampling, as
selected in [`McmcConfig::rules`](config::McmcConfig::rules).

```rust
use mvgp_mcmc::{Driver, McmcConfig, Model};
use mvgp_mcmc::sink::{DrawStore, MemorySink};
use nalgebra::{DMatrix, DVector};

let n = 30;
let x = DVector::from_fn(n, |i, _| i as f64 / 10.0);
let y = DMatrix::from_fn(n, 2, |i, j| x[i].sin() * (j + 1) as f64);
let knots = DVector::from_vec(vec![0.0, 1.0, 2.0, 3.0]);

let mut config = McmcConfig::new(100, 200, 2).with_seed(7);
config.n_warmup = 100;
let model = Model::new(y, x, 25, knots, &config).unwrap();

let mut draws = DrawStore::new();
let summary = Driver::new(model, config)
    .unwrap()
    .run(&mut draws, &mut MemorySink::new(), &())
    .unwrap();
assert_eq!(draws.len(), summary.records);
let arrays = draws.arrays();
assert_eq!(arrays.x.shape(), &[100, 5]);
```
*/

pub mod config;
pub mod core;
pub mod correlation;
pub mod distributions;
pub mod driver;
pub mod error;
pub mod ess;
#[cfg(feature = "csv")]
pub mod io;
pub mod lkj;
pub mod model;
pub mod sink;
pub mod state;
pub mod tuning;
pub mod updates;

pub use config::McmcConfig;
pub use driver::{Driver, RunSummary};
pub use error::{McmcError, Result};
pub use model::Model;
