use chattr_markov::{MarkovAttribution, MarkovParams, TransitionProbability};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How the path table was prepared before fitting.
#[derive(Debug, Clone, Serialize)]
pub struct InputSummary {
    pub rows: usize,
    pub paths: usize,
    pub excluded_channels: Vec<String>,
    pub aggregated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributionReport {
    pub fitted_at: DateTime<Utc>,
    pub params: MarkovParams,
    pub input: InputSummary,
    #[serde(flatten)]
    pub result: MarkovAttribution,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub built_at: DateTime<Utc>,
    pub order: usize,
    pub input: InputSummary,
    pub transitions: Vec<TransitionProbability>,
}
