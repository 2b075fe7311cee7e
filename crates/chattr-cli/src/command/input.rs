use std::path::PathBuf;

use chattr_markov::{PathRecord, path};

use crate::{schema::attribution::InputSummary, util};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct InputArg {
    /// Path table JSON file
    #[arg(long)]
    input: PathBuf,
    /// Separator between channel tokens in a path
    #[arg(long, default_value = ">")]
    separator: String,
    /// Channel to drop from every path before fitting (e.g. a direct channel)
    #[arg(long = "exclude-channel", value_name = "CHANNEL")]
    exclude_channels: Vec<String>,
    /// Merge rows with identical paths
    #[arg(long)]
    aggregate: bool,
}

impl InputArg {
    pub(crate) fn load(&self) -> anyhow::Result<(Vec<PathRecord>, InputSummary)> {
        anyhow::ensure!(!self.separator.is_empty(), "Separator must not be empty");

        eprintln!("Loading path table from {}...", self.input.display());
        let table = util::read_path_table_file(&self.input)?;
        let rows = table.rows.len();

        let mut records = table.to_records(&self.separator);
        for channel in &self.exclude_channels {
            records = records
                .iter()
                .map(|record| record.without_channel(channel))
                .collect();
        }
        if self.aggregate {
            records = path::aggregate(&records);
        }
        eprintln!("Loaded {rows} rows ({} paths)", records.len());

        let summary = InputSummary {
            rows,
            paths: records.len(),
            excluded_channels: self.exclude_channels.clone(),
            aggregated: self.aggregate,
        };
        Ok((records, summary))
    }
}
