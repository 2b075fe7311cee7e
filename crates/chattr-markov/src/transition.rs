//! Sparse transition counts between chain states.
//!
//! [`TransitionIndexBuilder`] decomposes every path into consecutive state
//! pairs and accumulates their weights. [`TransitionIndexBuilder::finalize`]
//! then turns each origin's raw counts into a [`TransitionRow`] of cumulative
//! counts, which is the shape the [`sampler`](crate::sampler) needs for
//! inverse-CDF sampling.
//!
//! # Path Decomposition
//!
//! For a path `A > B > C` that converted, with order 2:
//!
//! ```text
//! (start) → [A,B] → [B,C] → (conversion)
//! ```
//!
//! Every state is a full window of `order` consecutive channels. A path
//! shorter than `order` becomes a single state holding the whole path, so
//! `A` alone maps to `(start) → [A] → …`.
//!
//! Inner transitions carry the record's full weight (`conversions + nulls`);
//! the last state moves to `(conversion)` with weight `conversions` and to
//! `(null)` with weight `nulls`.
//!
//! # Row Invariants
//!
//! After finalization, for every row:
//!
//! - destinations appear at most once, in order of first insertion
//! - cumulative counts are strictly increasing
//! - the last cumulative count equals the row total

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    AttributionError, OverflowError,
    path::PathRecord,
    state::{ChannelId, StateCatalog, StateId},
};

/// Outgoing transitions of one origin state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRow {
    origin: StateId,
    cumulative: Vec<(StateId, u64)>,
    total: u64,
}

impl TransitionRow {
    fn empty(origin: StateId) -> Self {
        Self {
            origin,
            cumulative: vec![],
            total: 0,
        }
    }

    #[must_use]
    pub fn origin(&self) -> StateId {
        self.origin
    }

    /// Sum of all raw counts in this row.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    /// `(destination, cumulative count)` pairs in insertion order.
    #[must_use]
    pub fn cumulative(&self) -> &[(StateId, u64)] {
        &self.cumulative
    }

    /// `(destination, raw count)` pairs in insertion order.
    pub fn counts(&self) -> impl Iterator<Item = (StateId, u64)> + '_ {
        let mut prev = 0;
        self.cumulative.iter().map(move |&(dest, cum)| {
            let count = cum - prev;
            prev = cum;
            (dest, count)
        })
    }

    #[must_use]
    pub fn count(&self, destination: StateId) -> u64 {
        self.counts()
            .find_map(|(dest, count)| (dest == destination).then_some(count))
            .unwrap_or(0)
    }
}

/// Finalized transition counts for every state of a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionIndex {
    rows: Vec<TransitionRow>,
}

/// One entry of the transition-probability table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionProbability {
    pub from: String,
    pub to: String,
    pub probability: f64,
}

impl TransitionIndex {
    /// Returns the row of `origin`, or `None` if the state is unknown.
    #[must_use]
    pub fn row(&self, origin: StateId) -> Option<&TransitionRow> {
        self.rows.get(origin.index())
    }

    /// Rows with at least one outgoing transition, in origin id order.
    pub fn rows(&self) -> impl Iterator<Item = &TransitionRow> + '_ {
        self.rows.iter().filter(|row| !row.is_empty())
    }

    /// Number of distinct `(origin, destination)` pairs.
    #[must_use]
    pub fn transition_count(&self) -> usize {
        self.rows.iter().map(TransitionRow::len).sum()
    }

    #[must_use]
    pub fn count(&self, origin: StateId, destination: StateId) -> u64 {
        self.row(origin).map_or(0, |row| row.count(destination))
    }

    /// Total weight of transitions entering any state that involves `channel`.
    #[must_use]
    pub fn incoming_weight(&self, catalog: &StateCatalog, channel: ChannelId) -> u64 {
        self.rows
            .iter()
            .flat_map(TransitionRow::counts)
            .filter(|&(dest, _)| catalog.involves(dest, channel))
            .fold(0, |acc, (_, count)| acc.saturating_add(count))
    }

    /// Projects the raw counts to transition probabilities.
    ///
    /// Rows appear in origin id order, destinations in insertion order.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn probabilities(&self, catalog: &StateCatalog) -> Vec<TransitionProbability> {
        self.rows()
            .flat_map(|row| {
                let total = row.total() as f64;
                let from = catalog.label(row.origin());
                row.counts()
                    .map(move |(dest, count)| TransitionProbability {
                        from: from.clone(),
                        to: catalog.label(dest),
                        probability: count as f64 / total,
                    })
            })
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
struct RawRow {
    counts: Vec<(StateId, u64)>,
    positions: HashMap<StateId, usize>,
}

/// Accumulates transition counts from path records.
#[derive(Debug, Clone)]
pub struct TransitionIndexBuilder {
    catalog: StateCatalog,
    rows: Vec<RawRow>,
}

impl TransitionIndexBuilder {
    #[must_use]
    pub fn new(catalog: StateCatalog) -> Self {
        Self {
            catalog,
            rows: vec![],
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &StateCatalog {
        &self.catalog
    }

    /// Adds `weight` to the `origin → destination` count.
    ///
    /// Repeated calls accumulate. A zero weight is ignored so that it never
    /// produces a row entry.
    pub fn add(
        &mut self,
        origin: StateId,
        destination: StateId,
        weight: u64,
    ) -> Result<(), OverflowError> {
        if weight == 0 {
            return Ok(());
        }
        if self.rows.len() <= origin.index() {
            self.rows.resize_with(origin.index() + 1, RawRow::default);
        }
        let row = &mut self.rows[origin.index()];
        if let Some(&pos) = row.positions.get(&destination) {
            let count = &mut row.counts[pos].1;
            *count = count.checked_add(weight).ok_or(OverflowError {
                path_index: None,
                origin,
                destination,
            })?;
        } else {
            row.positions.insert(destination, row.counts.len());
            row.counts.push((destination, weight));
        }
        Ok(())
    }

    /// Decomposes a path into state transitions and accumulates them.
    ///
    /// The channels of a record whose total weight is zero are still
    /// registered in the catalog, but contribute no transitions.
    pub fn add_path(&mut self, path_index: usize, path: &PathRecord) -> Result<(), AttributionError> {
        path.validate(path_index)?;

        let channels = path
            .channels
            .iter()
            .enumerate()
            .map(|(position, token)| self.catalog.resolve(token, path_index, position))
            .collect::<Result<Vec<_>, _>>()?;
        let order = self.catalog.order();
        let states = if channels.is_empty() {
            vec![]
        } else if channels.len() <= order {
            vec![self.catalog.compose(&channels)]
        } else {
            channels
                .windows(order)
                .map(|window| self.catalog.compose(window))
                .collect()
        };

        let at_path = |mut e: OverflowError| {
            e.path_index = Some(path_index);
            e
        };
        let weight = path.weight().ok_or_else(|| OverflowError {
            path_index: Some(path_index),
            origin: StateId::START,
            destination: states.first().copied().unwrap_or(StateId::CONVERSION),
        })?;

        let mut origin = StateId::START;
        for &state in &states {
            self.add(origin, state, weight).map_err(at_path)?;
            origin = state;
        }
        self.add(origin, StateId::CONVERSION, path.conversions)
            .map_err(at_path)?;
        self.add(origin, StateId::NULL, path.nulls)
            .map_err(at_path)?;
        Ok(())
    }

    /// Computes cumulative counts for every row.
    ///
    /// Consumes the builder, so the cumulative step runs exactly once.
    pub fn finalize(self) -> Result<(StateCatalog, TransitionIndex), OverflowError> {
        let Self { catalog, rows } = self;
        let mut finalized = (0..catalog.state_count())
            .map(|i| TransitionRow::empty(StateId(i)))
            .collect::<Vec<_>>();

        for (raw, row) in rows.into_iter().zip(&mut finalized) {
            let mut total: u64 = 0;
            row.cumulative = raw
                .counts
                .into_iter()
                .map(|(dest, count)| {
                    total = total.checked_add(count).ok_or(OverflowError {
                        path_index: None,
                        origin: row.origin,
                        destination: dest,
                    })?;
                    Ok((dest, total))
                })
                .collect::<Result<_, OverflowError>>()?;
            row.total = total;
        }

        Ok((catalog, TransitionIndex { rows: finalized }))
    }
}

/// Builds a catalog and transition index from a full path set.
pub fn build(
    paths: &[PathRecord],
    order: usize,
) -> Result<(StateCatalog, TransitionIndex), AttributionError> {
    let mut builder = TransitionIndexBuilder::new(StateCatalog::new(order)?);
    for (i, path) in paths.iter().enumerate() {
        builder.add_path(i, path)?;
    }
    Ok(builder.finalize()?)
}
