/*!
Where a run sends its output.

- [`LogSink`] receives human-readable progress lines: phase starts, iteration counters,
  slice sampler warnings and the final acceptance summary.
- [`ResultSink`] receives one [`Draw`] per thinned production iteration.

[`DrawStore`] keeps draws in memory and stacks them into `ndarray` arrays with the draw
index as the leading axis.
*/

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Array3};

use crate::error::Result;
use crate::model::Model;
use crate::state::ChainState;

/// Line-oriented log output.
pub trait LogSink {
    fn append(&mut self, line: &str) -> std::io::Result<()>;
}

/// Discards every line.
impl LogSink for () {
    fn append(&mut self, _line: &str) -> std::io::Result<()> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for &mut S {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        (**self).append(line)
    }
}

/// Keeps lines in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySink {
    lines: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        self.lines.push(line.to_string());
        Ok(())
    }
}

/// Appends lines to a file, creating it if needed. Existing content is kept, so several
/// chains may share one log file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.file, "{line}")?;
        self.file.flush()
    }
}

/// The values recorded for one production iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub mu: DVector<f64>,
    /// K × d.
    pub eta_star: DMatrix<f64>,
    /// N × d.
    pub zeta: DMatrix<f64>,
    /// d × d correlation matrix `RᵗR`.
    pub omega: DMatrix<f64>,
    pub phi: f64,
    pub sigma2: f64,
    pub tau2: DVector<f64>,
    /// Missing covariate values in original units.
    pub x: DVector<f64>,
    pub r: DMatrix<f64>,
    pub r_tau: DMatrix<f64>,
    pub xi: DVector<f64>,
}

impl Draw {
    pub fn from_state(model: &Model, state: &ChainState) -> Self {
        Self {
            mu: state.mu.clone(),
            eta_star: state.eta_star.clone(),
            zeta: state.zeta.clone(),
            omega: state.lkj.omega(),
            phi: state.phi,
            sigma2: state.sigma2,
            tau2: state.tau2.clone(),
            x: state.x_missing.add_scalar(model.x_center()),
            r: state.lkj.r.clone(),
            r_tau: state.r_tau.clone(),
            xi: state.xi.clone(),
        }
    }
}

/// Destination of thinned production draws.
pub trait ResultSink {
    fn record(&mut self, draw: Draw);
}

/// Drops every draw.
impl ResultSink for () {
    fn record(&mut self, _draw: Draw) {}
}

impl ResultSink for Vec<Draw> {
    fn record(&mut self, draw: Draw) {
        self.push(draw);
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn record(&mut self, draw: Draw) {
        (**self).record(draw)
    }
}

/// In-memory collection of draws.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawStore {
    draws: Vec<Draw>,
}

impl DrawStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            draws: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[Draw] {
        &self.draws
    }

    pub fn into_draws(self) -> Vec<Draw> {
        self.draws
    }

    /// Stacks every recorded draw; the first axis of each array indexes draws.
    pub fn arrays(&self) -> PosteriorArrays {
        PosteriorArrays::from_draws(&self.draws)
    }
}

impl ResultSink for DrawStore {
    fn record(&mut self, draw: Draw) {
        self.draws.push(draw);
    }
}

/// Posterior draws stacked along a leading draw axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorArrays {
    pub mu: Array2<f64>,
    pub eta_star: Array3<f64>,
    pub zeta: Array3<f64>,
    pub omega: Array3<f64>,
    pub phi: Array1<f64>,
    pub sigma2: Array1<f64>,
    pub tau2: Array2<f64>,
    pub x: Array2<f64>,
    pub r: Array3<f64>,
    pub r_tau: Array3<f64>,
    pub xi: Array2<f64>,
}

fn stack_vectors(draws: &[Draw], field: impl Fn(&Draw) -> &DVector<f64>) -> Array2<f64> {
    let len = draws.first().map_or(0, |d| field(d).len());
    Array2::from_shape_fn((draws.len(), len), |(i, j)| field(&draws[i])[j])
}

fn stack_matrices(draws: &[Draw], field: impl Fn(&Draw) -> &DMatrix<f64>) -> Array3<f64> {
    let (rows, cols) = draws.first().map_or((0, 0), |d| field(d).shape());
    Array3::from_shape_fn((draws.len(), rows, cols), |(i, r, c)| field(&draws[i])[(r, c)])
}

impl PosteriorArrays {
    pub fn from_draws(draws: &[Draw]) -> Self {
        Self {
            mu: stack_vectors(draws, |d| &d.mu),
            eta_star: stack_matrices(draws, |d| &d.eta_star),
            zeta: stack_matrices(draws, |d| &d.zeta),
            omega: stack_matrices(draws, |d| &d.omega),
            phi: draws.iter().map(|d| d.phi).collect(),
            sigma2: draws.iter().map(|d| d.sigma2).collect(),
            tau2: stack_vectors(draws, |d| &d.tau2),
            x: stack_vectors(draws, |d| &d.x),
            r: stack_matrices(draws, |d| &d.r),
            r_tau: stack_matrices(draws, |d| &d.r_tau),
            xi: stack_vectors(draws, |d| &d.xi),
        }
    }

    pub fn n_draws(&self) -> usize {
        self.phi.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn draw(seed: f64) -> Draw {
        Draw {
            mu: DVector::from_vec(vec![seed, -seed]),
            eta_star: DMatrix::from_fn(3, 2, |i, j| seed + (i * 2 + j) as f64),
            zeta: DMatrix::from_element(4, 2, seed),
            omega: DMatrix::identity(2, 2),
            phi: seed,
            sigma2: seed * seed,
            tau2: DVector::from_vec(vec![1.0, 2.0]),
            x: DVector::from_vec(vec![seed]),
            r: DMatrix::identity(2, 2),
            r_tau: DMatrix::identity(2, 2),
            xi: DVector::from_vec(vec![0.0]),
        }
    }

    #[test]
    fn arrays_put_draws_first() {
        let mut store = DrawStore::new();
        for s in [1.0, 2.0, 3.0] {
            store.record(draw(s));
        }
        let arrays = store.arrays();
        assert_eq!(arrays.n_draws(), 3);
        assert_eq!(arrays.mu.shape(), &[3, 2]);
        assert_eq!(arrays.eta_star.shape(), &[3, 3, 2]);
        assert_eq!(arrays.zeta.shape(), &[3, 4, 2]);
        assert_eq!(arrays.mu[[1, 1]], -2.0);
        assert_eq!(arrays.eta_star[[2, 1, 0]], 3.0 + 2.0);
        assert_eq!(arrays.sigma2[2], 9.0);
    }

    #[test]
    fn empty_store_stacks_to_empty_arrays() {
        let arrays = DrawStore::new().arrays();
        assert_eq!(arrays.n_draws(), 0);
        assert_eq!(arrays.omega.shape(), &[0, 0, 0]);
    }

    #[test]
    fn memory_sink_keeps_lines() {
        let mut sink = MemorySink::new();
        sink.append("first").unwrap();
        (&mut sink).append("second").unwrap();
        assert_eq!(sink.lines(), &["first".to_string(), "second".to_string()]);
        assert!(sink.contains("sec"));
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.log");
        {
            let mut sink = FileSink::new(&path).unwrap();
            sink.append("Starting MCMC warmup").unwrap();
        }
        {
            let mut sink = FileSink::new(&path).unwrap();
            assert_eq!(sink.path(), path.as_path());
            sink.append("Starting MCMC fit").unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Starting MCMC warmup\nStarting MCMC fit\n");
    }

    #[test]
    fn file_sink_reports_bad_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_dir").join("chain.log");
        assert!(FileSink::new(missing).is_err());
    }
}
