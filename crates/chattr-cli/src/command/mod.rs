use std::io;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use self::{markov::MarkovArg, transitions::TransitionsArg};

mod input;
mod markov;
mod transitions;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Print debug logs (overridden by `RUST_LOG`)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// What to compute
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Attribute conversions to channels with the Markov removal-effect model
    Markov(#[clap(flatten)] MarkovArg),
    /// Print the transition probabilities of the fitted chain
    Transitions(#[clap(flatten)] TransitionsArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    init_logging(args.verbose);
    match args.mode {
        Mode::Markov(arg) => markov::run(&arg)?,
        Mode::Transitions(arg) => transitions::run(&arg)?,
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    // stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
