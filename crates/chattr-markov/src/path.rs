//! Customer journey records fed into the model.
//!
//! A [`PathRecord`] is one row of a path table: the ordered channel tokens a
//! group of customers touched, how many of them converted, how many did not,
//! and optionally the conversion value they produced. Records are read-only
//! input to the transition builder.
//!
//! Two preprocessing helpers live here as well:
//!
//! - [`aggregate`] merges records with identical channel sequences
//! - [`PathRecord::without_channel`] drops a channel (e.g. a "direct" channel)
//!   from a record before fitting

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Channel tokens in the order they were touched.
    pub channels: Vec<String>,
    /// Number of customers following this path that converted.
    pub conversions: u64,
    /// Number of customers following this path that did not convert.
    #[serde(default)]
    pub nulls: u64,
    /// Total conversion value produced by this path, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl PathRecord {
    #[must_use]
    pub fn new<I, S>(channels: I, conversions: u64, nulls: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            conversions,
            nulls,
            value: None,
        }
    }

    /// A path followed by `weight` customers that all converted.
    #[must_use]
    pub fn converted<I, S>(channels: I, weight: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(channels, weight, 0)
    }

    /// A path followed by `weight` customers that all ended without converting.
    #[must_use]
    pub fn lost<I, S>(channels: I, weight: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(channels, 0, weight)
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Number of customers represented by this record.
    ///
    /// Returns `None` if the sum does not fit in `u64`.
    #[must_use]
    pub fn weight(&self) -> Option<u64> {
        self.conversions.checked_add(self.nulls)
    }

    /// Checks the record for tokens that are empty after trimming and for
    /// unusable conversion values.
    pub fn validate(&self, path_index: usize) -> Result<(), ValidationError> {
        if let Some(position) = self.channels.iter().position(|c| c.trim().is_empty()) {
            return Err(ValidationError::EmptyChannel {
                path_index,
                position,
            });
        }
        if self.value.is_some_and(|v| !(v.is_finite() && v >= 0.0)) {
            return Err(ValidationError::InvalidValue { path_index });
        }
        Ok(())
    }

    /// Returns a copy of this record with every occurrence of `channel` removed.
    ///
    /// The record may become empty, in which case customers move from the
    /// start state directly to their outcome.
    #[must_use]
    pub fn without_channel(&self, channel: &str) -> Self {
        Self {
            channels: self
                .channels
                .iter()
                .filter(|c| c.trim() != channel)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

/// Merges records with identical (trimmed) channel sequences.
///
/// Counts and values are summed; the first occurrence decides the output
/// order. A merged value is present if any merged record carried one.
/// Counts saturate at `u64::MAX`; the transition builder reports the
/// overflow when it accumulates them.
#[must_use]
pub fn aggregate(records: &[PathRecord]) -> Vec<PathRecord> {
    let mut merged: Vec<PathRecord> = vec![];
    let mut index_of: HashMap<Vec<&str>, usize> = HashMap::new();

    for record in records {
        let key = record.channels.iter().map(|c| c.trim()).collect::<Vec<_>>();
        if let Some(&i) = index_of.get(&key) {
            let target = &mut merged[i];
            target.conversions = target.conversions.saturating_add(record.conversions);
            target.nulls = target.nulls.saturating_add(record.nulls);
            target.value = match (target.value, record.value) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            };
        } else {
            index_of.insert(key, merged.len());
            merged.push(PathRecord {
                channels: record.channels.iter().map(|c| c.trim().to_owned()).collect(),
                ..record.clone()
            });
        }
    }

    merged
}
