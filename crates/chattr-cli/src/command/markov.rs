use std::path::PathBuf;

use anyhow::Context;
use chattr_markov::{MarkovModel, MarkovParams};
use chrono::Utc;

use crate::{command::input::InputArg, schema::attribution::AttributionReport, util::Output};

const NSIM: u64 = 10_000;
const MAX_FAILURE_RATIO: f64 = 0.01;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct MarkovArg {
    #[clap(flatten)]
    input: InputArg,
    /// Number of most recent channels forming a chain state
    #[arg(long, default_value_t = 1)]
    order: usize,
    /// Simulated walks per scenario
    #[arg(long, default_value_t = NSIM)]
    nsim: u64,
    /// Maximum transitions per walk [default: 10 per chain state]
    #[arg(long)]
    max_step: Option<usize>,
    /// Include transition probabilities and removal effects
    #[arg(long)]
    out_more: bool,
    /// Seed for reproducible results
    #[arg(long)]
    seed: Option<u64>,
    /// Worker threads [default: available parallelism]
    #[arg(long)]
    threads: Option<usize>,
    /// Share of failed walks tolerated per scenario
    #[arg(long, default_value_t = MAX_FAILURE_RATIO)]
    max_failure_ratio: f64,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

impl MarkovArg {
    fn params(&self) -> MarkovParams {
        MarkovParams {
            order: self.order,
            nsim: self.nsim,
            max_step: self.max_step,
            out_more: self.out_more,
            seed: self.seed,
            threads: self.threads,
            max_failure_ratio: self.max_failure_ratio,
        }
    }
}

pub(crate) fn run(arg: &MarkovArg) -> anyhow::Result<()> {
    let (paths, input) = arg.input.load()?;
    let params = arg.params();

    eprintln!(
        "Fitting order-{} Markov model ({} walks per scenario)...",
        params.order, params.nsim
    );
    let result = MarkovModel::new(params.clone())
        .fit(&paths)
        .context("Failed to fit Markov model")?;

    eprintln!("Baseline conversion rate: {:.4}", result.baseline_conversion_rate);
    eprintln!("Attribution:");
    for channel in &result.channels {
        match channel.total_conversion_value {
            Some(value) => eprintln!(
                "  {:<24} {:>12.3} conv {:>14.2} value",
                channel.channel_name, channel.total_conversions, value
            ),
            None => eprintln!(
                "  {:<24} {:>12.3} conv",
                channel.channel_name, channel.total_conversions
            ),
        }
    }
    if result.degenerate {
        eprintln!("  (no channel has a positive removal effect; nothing attributed)");
    }

    let report = AttributionReport {
        fitted_at: Utc::now(),
        params,
        input,
        result,
    };
    Output::new(arg.output.clone()).save_json(&report)?;

    if let Some(path) = &arg.output {
        eprintln!("Attribution saved to {}", path.display());
    }
    Ok(())
}
