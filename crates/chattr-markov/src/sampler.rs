//! Inverse-CDF sampling over a transition row.
//!
//! Given a uniform variate `u`, the target rank is `floor(u * total) + 1` and
//! the sampled destination is the first one, in insertion order, whose
//! cumulative count reaches that rank. Destinations are therefore drawn in
//! proportion to their raw counts, and at an exact cumulative boundary the
//! destination inserted first wins.
//!
//! The rank formula is kept exactly as is: moving the boundary (e.g. to
//! `ceil(u * total)`) would change which destination wins a tie and with it
//! the attribution results.

use crate::{SimulationError, state::StateId, transition::TransitionRow};

/// Samples the next state from `row` using the variate `u`.
///
/// `u` is expected in `[0, 1)`. A variate of exactly `1.0` yields rank
/// `total + 1`, which no destination reaches, and is reported like any other
/// row without a valid transition.
pub fn next(row: &TransitionRow, u: f64) -> Result<StateId, SimulationError> {
    let origin = row.origin();
    if !(0.0..=1.0).contains(&u) {
        return Err(SimulationError::InvalidVariate { origin, u });
    }
    if row.total() == 0 {
        return Err(SimulationError::NoTransition { origin });
    }

    let rank = rank(u, row.total());
    let cumulative = row.cumulative();
    // cumulative counts are strictly increasing, so the first entry reaching
    // the rank is found by bisection
    let pos = cumulative.partition_point(|&(_, cum)| cum < rank);
    cumulative
        .get(pos)
        .map(|&(dest, _)| dest)
        .ok_or(SimulationError::NoTransition { origin })
}

#[expect(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn rank(u: f64, total: u64) -> u64 {
    (u * total as f64).floor() as u64 + 1
}
