//! Credential selection among the currently available candidates
//!
//! Selection is uniform at random by default so that many concurrent
//! low-latency callers do not pile onto the same credential. The source of
//! randomness sits behind `Selector` so tests can force a deterministic pick.

use rand::RngExt;

/// Picks one index out of `candidates` available credentials.
///
/// Implementations must return a value in `0..candidates`. The pool never
/// calls `pick` with zero candidates.
pub trait Selector: Send + Sync {
    fn pick(&self, candidates: usize) -> usize;
}

/// Uniform random selection using the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn pick(&self, candidates: usize) -> usize {
        rand::rng().random_range(0..candidates)
    }
}

/// Always picks the first available credential in configuration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstSelector;

impl Selector for FirstSelector {
    fn pick(&self, _candidates: usize) -> usize {
        0
    }
}
