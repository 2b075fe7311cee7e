//! Monte Carlo random walks through a transition index.
//!
//! A walk starts at `(start)`, draws a fresh uniform variate per step, samples
//! the next state and stops on `(conversion)` or `(null)`. A walk that is
//! still running after `max_step` transitions is counted as truncated, which
//! the estimator treats like `(null)`.
//!
//! # Parallelization
//!
//! The requested walks are split into chunks of [`CHUNK_SIZE`]. Every chunk
//! owns a [`Pcg64`] stream seeded from the run seed, and chunks are spread
//! over worker threads round-robin. Each worker keeps its own [`WalkTally`];
//! the tallies are merged by addition after all workers have joined.
//! Because randomness is tied to chunks rather than threads, a fixed seed
//! gives the same counts for any number of threads.

use std::{panic, thread};

use rand::{Rng, SeedableRng as _};
use rand_pcg::Pcg64;
use tracing::warn;

use crate::{
    SimulationError, removal::TransitionRule, sampler, state::StateId,
    transition::TransitionIndex,
};

/// Number of walks sharing one random stream.
pub const CHUNK_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::IsVariant)]
pub enum WalkOutcome {
    Conversion,
    Null,
    /// The step limit was reached before an absorbing state.
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkParams {
    pub nsim: u64,
    pub max_step: usize,
    pub threads: usize,
    pub seed: u64,
}

/// Outcome counts of a batch of walks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkTally {
    pub conversions: u64,
    pub nulls: u64,
    pub truncated: u64,
    pub failed: u64,
    /// First error seen by the lowest-numbered worker that failed; set
    /// whenever `failed` is non-zero.
    pub first_failure: Option<SimulationError>,
}

impl WalkTally {
    fn record(&mut self, outcome: Result<WalkOutcome, SimulationError>) {
        match outcome {
            Ok(WalkOutcome::Conversion) => self.conversions += 1,
            Ok(WalkOutcome::Null) => self.nulls += 1,
            Ok(WalkOutcome::Truncated) => self.truncated += 1,
            Err(e) => {
                self.failed += 1;
                self.first_failure.get_or_insert(e);
            }
        }
    }

    #[must_use]
    pub fn merged(mut self, other: Self) -> Self {
        self.conversions += other.conversions;
        self.nulls += other.nulls;
        self.truncated += other.truncated;
        self.failed += other.failed;
        if self.first_failure.is_none() {
            self.first_failure = other.first_failure;
        }
        self
    }

    /// Walks that reached an outcome (truncated walks included).
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.conversions + self.nulls + self.truncated
    }

    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.completed() + self.failed
    }

    /// Share of completed walks that converted.
    ///
    /// Failed walks are left out of the denominator as long as their share of
    /// all attempted walks stays within `max_failure_ratio`; beyond that, or
    /// when no walk completed, the whole batch is rejected.
    #[expect(clippy::cast_precision_loss)]
    pub fn conversion_rate(&self, max_failure_ratio: f64) -> Result<f64, SimulationError> {
        let attempted = self.attempted();
        let completed = self.completed();
        if let Some(first) = &self.first_failure {
            warn!(
                failed = self.failed,
                attempted,
                %first,
                "dropped simulated walks that could not be sampled"
            );
            let ratio = self.failed as f64 / attempted as f64;
            if completed == 0 || ratio > max_failure_ratio {
                return Err(SimulationError::PervasiveFailure {
                    failed: self.failed,
                    attempted,
                    first: Box::new(first.clone()),
                });
            }
        }
        if completed == 0 {
            return Ok(0.0);
        }
        Ok(self.conversions as f64 / completed as f64)
    }
}

/// Runs a single walk from `(start)`.
pub fn walk<T, R>(
    index: &TransitionIndex,
    rule: &T,
    max_step: usize,
    rng: &mut R,
) -> Result<WalkOutcome, SimulationError>
where
    T: TransitionRule + ?Sized,
    R: Rng + ?Sized,
{
    let mut state = StateId::START;
    for _ in 0..max_step {
        let row = index
            .row(state)
            .ok_or(SimulationError::NoTransition { origin: state })?;
        let u: f64 = rng.random();
        state = rule.redirect(sampler::next(row, u)?);
        match state {
            StateId::CONVERSION => return Ok(WalkOutcome::Conversion),
            StateId::NULL => return Ok(WalkOutcome::Null),
            _ => {}
        }
    }
    Ok(WalkOutcome::Truncated)
}

/// Splits `nsim` walks into chunks, each with its own stream seed.
fn chunk_plan(nsim: u64, seed: u64) -> Vec<(u64, u64)> {
    let mut seeder = Pcg64::seed_from_u64(seed);
    let mut remaining = nsim;
    let mut chunks = vec![];
    while remaining > 0 {
        let len = remaining.min(CHUNK_SIZE);
        chunks.push((seeder.random(), len));
        remaining -= len;
    }
    chunks
}

/// Runs `params.nsim` independent walks in parallel and tallies the outcomes.
pub fn simulate<T>(index: &TransitionIndex, rule: &T, params: &WalkParams) -> WalkTally
where
    T: TransitionRule + ?Sized,
{
    let chunks = chunk_plan(params.nsim, params.seed);
    let threads = params.threads.clamp(1, chunks.len().max(1));
    let max_step = params.max_step;

    thread::scope(|s| {
        let workers = (0..threads)
            .map(|worker| {
                let chunks = &chunks;
                s.spawn(move || {
                    let mut tally = WalkTally::default();
                    for &(seed, len) in chunks.iter().skip(worker).step_by(threads) {
                        let mut rng = Pcg64::seed_from_u64(seed);
                        for _ in 0..len {
                            tally.record(walk(index, rule, max_step, &mut rng));
                        }
                    }
                    tally
                })
            })
            .collect::<Vec<_>>();

        workers
            .into_iter()
            .map(|w| w.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .fold(WalkTally::default(), WalkTally::merged)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        path::PathRecord,
        removal::{Baseline, RemovalScenario},
        state::StateCatalog,
        transition::{self, TransitionIndexBuilder},
    };

    fn example_paths() -> Vec<PathRecord> {
        vec![
            PathRecord::converted(["A", "B"], 2),
            PathRecord::lost(["A", "C"], 1),
        ]
    }

    fn params(nsim: u64, threads: usize, seed: u64) -> WalkParams {
        WalkParams {
            nsim,
            max_step: 100,
            threads,
            seed,
        }
    }

    #[test]
    fn test_walk_reaches_absorbing_state() {
        let (_, index) = transition::build(&example_paths(), 1).unwrap();
        let mut rng = Pcg64::seed_from_u64(1);
        for _ in 0..100 {
            let outcome = walk(&index, &Baseline, 100, &mut rng).unwrap();
            assert!(!outcome.is_truncated());
        }
    }

    #[test]
    fn test_single_step_limit_truncates() {
        let (_, index) = transition::build(&example_paths(), 1).unwrap();
        let tally = simulate(&index, &Baseline, &WalkParams {
            max_step: 1,
            ..params(1000, 2, 3)
        });
        assert_eq!(tally.conversions, 0);
        assert_eq!(tally.truncated, 1000);
        assert_eq!(tally.conversion_rate(0.0), Ok(0.0));
    }

    #[test]
    fn test_baseline_rate() {
        let (_, index) = transition::build(&example_paths(), 1).unwrap();
        let tally = simulate(&index, &Baseline, &params(100_000, 4, 11));
        assert_eq!(tally.attempted(), 100_000);
        let rate = tally.conversion_rate(0.0).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 0.01, "rate = {rate}");
    }

    #[test]
    fn test_thread_count_does_not_change_counts() {
        let (_, index) = transition::build(&example_paths(), 1).unwrap();
        let single = simulate(&index, &Baseline, &params(20_000, 1, 5));
        let many = simulate(&index, &Baseline, &params(20_000, 7, 5));
        assert_eq!(single, many);
    }

    #[test]
    fn test_scenarios_leave_baseline_untouched() {
        let (catalog, index) = transition::build(&example_paths(), 1).unwrap();
        let before = simulate(&index, &Baseline, &params(10_000, 3, 42));
        for channel in catalog.channels() {
            let scenario = RemovalScenario::new(&catalog, channel);
            let _ = simulate(&index, &scenario, &params(10_000, 3, 43));
        }
        let after = simulate(&index, &Baseline, &params(10_000, 3, 42));
        assert_eq!(before, after);
    }

    #[test]
    fn test_removed_channel_blocks_conversions() {
        let (catalog, index) = transition::build(&example_paths(), 1).unwrap();
        let b = catalog.channel_id("B").unwrap();
        let tally = simulate(&index, &RemovalScenario::new(&catalog, b), &params(5000, 2, 9));
        assert_eq!(tally.conversions, 0);
        assert_eq!(tally.nulls, 5000);
    }

    #[test]
    fn test_failed_walks_are_counted() {
        let mut catalog = StateCatalog::new(1).unwrap();
        let a = catalog.resolve("A", 0, 0).unwrap();
        let s_a = catalog.compose(&[a]);
        let mut builder = TransitionIndexBuilder::new(catalog);
        // A has no outgoing transitions
        builder.add(StateId::START, s_a, 1).unwrap();
        let (_, index) = builder.finalize().unwrap();

        let tally = simulate(&index, &Baseline, &params(100, 2, 0));
        assert_eq!(tally.failed, 100);
        assert_eq!(
            tally.first_failure,
            Some(SimulationError::NoTransition { origin: s_a })
        );
        let err = tally.conversion_rate(0.5).unwrap_err();
        assert_eq!(
            err,
            SimulationError::PervasiveFailure {
                failed: 100,
                attempted: 100,
                first: Box::new(SimulationError::NoTransition { origin: s_a }),
            }
        );
        assert!(err.to_string().contains(&s_a.to_string()), "{err}");
    }

    #[test]
    fn test_tolerated_failures() {
        let tally = WalkTally {
            conversions: 60,
            nulls: 39,
            truncated: 0,
            failed: 1,
            first_failure: Some(SimulationError::NoTransition {
                origin: StateId::START,
            }),
        };
        let rate = tally.conversion_rate(0.05).unwrap();
        assert!((rate - 60.0 / 99.0).abs() < 1e-12);
        assert!(tally.conversion_rate(0.001).is_err());
    }

    #[test]
    fn test_chunk_plan_covers_all_walks() {
        let plan = chunk_plan(CHUNK_SIZE * 2 + 5, 1);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.iter().map(|(_, len)| len).sum::<u64>(), CHUNK_SIZE * 2 + 5);
        assert_eq!(plan, chunk_plan(CHUNK_SIZE * 2 + 5, 1));
        assert!(chunk_plan(0, 1).is_empty());
    }
}
