//! Data-driven channel attribution with a Markov-chain removal-effect model.
//!
//! Customer journeys ("paths") are turned into a state-transition model. Each
//! channel's contribution is estimated by simulating random walks through the
//! model and measuring how much the conversion rate drops when walks entering
//! that channel are sent to the null state instead. The drops ("removal
//! effects") are then normalized into per-channel shares of the observed
//! conversions.
//!
//! # Architecture
//!
//! ```text
//! PathRecord[]
//!     ↓ add_path
//! TransitionIndexBuilder  (uses StateCatalog)
//!     ↓ finalize
//! TransitionIndex         (cumulative counts per origin row)
//!     ↓ sampled by
//! simulation              (parallel Monte Carlo walks)
//!     ↓ baseline vs. RemovalScenario
//! MarkovModel::fit        → MarkovAttribution
//! ```
//!
//! # Modules
//!
//! - [`path`]: input path records, aggregation and channel exclusion
//! - [`state`]: channel/state identifiers and higher-order history states
//! - [`transition`]: sparse transition rows and their builder
//! - [`sampler`]: inverse-CDF sampling over a transition row
//! - [`simulation`]: chunked, independently seeded random walks
//! - [`removal`]: baseline and channel-removal views over the index
//! - [`model`]: parameters, the removal-effect estimator and its result
//!
//! # Example
//!
//! ```
//! use chattr_markov::{MarkovModel, MarkovParams, PathRecord};
//!
//! let paths = vec![
//!     PathRecord::converted(["A", "B"], 2),
//!     PathRecord::lost(["A", "C"], 1),
//! ];
//! let params = MarkovParams {
//!     nsim: 20_000,
//!     seed: Some(7),
//!     ..MarkovParams::default()
//! };
//! let result = MarkovModel::new(params).fit(&paths).unwrap();
//!
//! // A and B are both required for a conversion, C never leads to one
//! let total: f64 = result.channels.iter().map(|c| c.total_conversions).sum();
//! assert!((total - 2.0).abs() < 1e-9);
//! assert!(result.channel("C").unwrap().total_conversions < 0.1);
//! ```

pub use self::{
    model::{ChannelAttribution, MarkovAttribution, MarkovModel, MarkovParams},
    path::PathRecord,
    state::{ChannelId, ControlState, StateCatalog, StateId},
    transition::{TransitionIndex, TransitionIndexBuilder, TransitionProbability, TransitionRow},
};

pub mod model;
pub mod path;
pub mod removal;
pub mod sampler;
pub mod simulation;
pub mod state;
pub mod transition;

/// Malformed input or parameters, detected before any simulation runs.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum ValidationError {
    #[display("path #{path_index} has an empty channel token at position {position}")]
    EmptyChannel { path_index: usize, position: usize },
    #[display("path #{path_index} has a negative or non-finite conversion value")]
    InvalidValue { path_index: usize },
    #[display("chain order must be at least 1 (got {order})")]
    InvalidOrder { order: usize },
    #[display("number of simulations must be at least 1")]
    InvalidSimulationCount,
    #[display("maximum walk length must be at least 1")]
    InvalidMaxStep,
    #[display("worker thread count must be at least 1")]
    InvalidThreadCount,
    #[display("tolerated failure ratio must lie in [0, 1] (got {ratio})")]
    InvalidFailureRatio { ratio: f64 },
}

/// A transition count no longer fits the counter width.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("transition count overflow for {origin} -> {destination}{}", path_suffix(*path_index))]
pub struct OverflowError {
    pub path_index: Option<usize>,
    pub origin: StateId,
    pub destination: StateId,
}

fn path_suffix(path_index: Option<usize>) -> String {
    path_index
        .map(|i| format!(" (path #{i})"))
        .unwrap_or_default()
}

/// Walks that could not be sampled.
///
/// These indicate a corrupted or incompletely built index, never ordinary
/// termination: reaching Conversion or Null is not an error.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error, derive_more::IsVariant)]
pub enum SimulationError {
    #[display("state {origin} has no outgoing transition to sample")]
    NoTransition { origin: StateId },
    #[display("random variate {u} for state {origin} is outside [0, 1]")]
    InvalidVariate { origin: StateId, u: f64 },
    #[display("{failed} of {attempted} simulated walks failed (first: {first})")]
    PervasiveFailure {
        failed: u64,
        attempted: u64,
        first: Box<SimulationError>,
    },
}

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum AttributionError {
    #[display("invalid input: {_0}")]
    Validation(ValidationError),
    #[display("{_0}")]
    Overflow(OverflowError),
    #[display("simulation failed: {_0}")]
    Simulation(SimulationError),
}
