//! Chain phases, cooperative cancellation and the shared progress bar style.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

/// The three consecutive phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Burn-in with adaptive random walks for every block.
    Warmup,
    /// Burn-in with the configured samplers, still adapting step sizes.
    Adapt,
    /// Production: fixed kernels, thinned draws are recorded.
    Sample,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Warmup, Phase::Adapt, Phase::Sample];

    /// Whether proposal scales are tuned during this phase.
    pub fn adapts(self) -> bool {
        !matches!(self, Phase::Sample)
    }

    /// Name used in log lines ("Starting MCMC warmup ...").
    pub fn label(self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Adapt => "adaptation",
            Phase::Sample => "fit",
        }
    }

    /// Name used in per-iteration log lines ("MCMC Adaptive Iteration ...").
    pub fn iteration_label(self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Adapt => "Adaptive",
            Phase::Sample => "Fitting",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cooperative cancellation, polled once at the start of every iteration.
pub trait Interrupt {
    fn is_interrupted(&self) -> bool;
}

/// Never interrupts.
impl Interrupt for () {
    fn is_interrupted(&self) -> bool {
        false
    }
}

impl<F: Fn() -> bool> Interrupt for F {
    fn is_interrupted(&self) -> bool {
        self()
    }
}

impl Interrupt for AtomicBool {
    fn is_interrupted(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// A progress bar for one phase of one chain.
pub fn phase_progress(chain_id: usize, phase: Phase, len: usize) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .expect("Expecting a valid progress bar template.")
        .progress_chars("##-");
    let pb = ProgressBar::new(len as u64);
    pb.set_style(style);
    pb.set_prefix(format!("Chain {chain_id} {phase}"));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn only_sampling_is_frozen() {
        assert!(Phase::Warmup.adapts());
        assert!(Phase::Adapt.adapts());
        assert!(!Phase::Sample.adapts());
    }

    #[test]
    fn interrupt_sources() {
        assert!(!().is_interrupted());

        let flag = AtomicBool::new(false);
        assert!(!flag.is_interrupted());
        flag.store(true, Ordering::Relaxed);
        assert!(flag.is_interrupted());

        let calls = Cell::new(0);
        let after_two = || {
            calls.set(calls.get() + 1);
            calls.get() > 2
        };
        assert!(!after_two.is_interrupted());
        assert!(!after_two.is_interrupted());
        assert!(after_two.is_interrupted());
    }

    #[test]
    fn progress_bar_has_phase_length() {
        let pb = phase_progress(3, Phase::Adapt, 250);
        assert_eq!(pb.length(), Some(250));
        assert_eq!(pb.prefix(), "Chain 3 adaptation");
    }
}
