use std::path::PathBuf;

use anyhow::Context;
use chattr_markov::transition;
use chrono::Utc;

use crate::{command::input::InputArg, schema::attribution::TransitionReport, util::Output};

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct TransitionsArg {
    #[clap(flatten)]
    input: InputArg,
    /// Number of most recent channels forming a chain state
    #[arg(long, default_value_t = 1)]
    order: usize,
    /// Output file path
    #[arg(long)]
    output: Option<PathBuf>,
}

pub(crate) fn run(arg: &TransitionsArg) -> anyhow::Result<()> {
    let (paths, input) = arg.input.load()?;

    let (catalog, index) =
        transition::build(&paths, arg.order).context("Failed to build transition index")?;
    eprintln!(
        "Built {} transitions between {} states",
        index.transition_count(),
        catalog.state_count()
    );

    let report = TransitionReport {
        built_at: Utc::now(),
        order: arg.order,
        input,
        transitions: index.probabilities(&catalog),
    };
    Output::new(arg.output.clone()).save_json(&report)
}
