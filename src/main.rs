use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commgame::manager::Manager;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run all configured jobs.
    Run {
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Write a report for every saved state.
    Analyze {
        #[arg(long, default_value_t = 10_000)]
        trials: usize,
    },

    /// Remove job outputs.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Run { threads } => mgr.run_jobs(threads)?,
        Command::Analyze { trials } => mgr.analyze(trials)?,
        Command::Clean => mgr.clean()?,
    }

    Ok(())
}
