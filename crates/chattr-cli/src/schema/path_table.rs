use chattr_markov::PathRecord;
use serde::{Deserialize, Serialize};

/// Path table as read from JSON: an array of rows.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PathTable {
    pub rows: Vec<PathRow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathRow {
    /// Channel tokens joined by the separator, e.g. `"search > email"`.
    pub path: String,
    pub conversions: u64,
    #[serde(default)]
    pub nulls: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl PathRow {
    /// Splits the path string into trimmed channel tokens.
    ///
    /// A blank path is a row that went straight from start to its outcome.
    /// Other empty tokens are kept so that the model can reject them with the
    /// row and token position.
    pub fn to_record(&self, separator: &str) -> PathRecord {
        let channels = if self.path.trim().is_empty() {
            vec![]
        } else {
            self.path
                .split(separator)
                .map(|token| token.trim().to_owned())
                .collect()
        };
        PathRecord {
            channels,
            conversions: self.conversions,
            nulls: self.nulls,
            value: self.value,
        }
    }
}

impl PathTable {
    pub fn to_records(&self, separator: &str) -> Vec<PathRecord> {
        self.rows.iter().map(|row| row.to_record(separator)).collect()
    }
}
