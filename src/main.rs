use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use palmsim::io::ini::Config;
use palmsim::io::output::RunWriter;
use palmsim::sim::driver::Simulation;
use palmsim::sim::weather::stats;

/// Oil palm stand growth and yield simulator.
#[derive(Parser)]
#[command(name = "palmsim")]
#[command(about = "Simulate oil palm growth and yield from weather and soil inputs")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the model: daily with `-n`, a 24-hour hourly run without it
    Run {
        /// Model initialization file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        /// Results file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Number of simulation days; omit for an hourly run
        #[arg(short = 'n', long = "days")]
        days: Option<u32>,
    },
    /// Compute and write weather statistics over the full weather record
    Met {
        /// Model initialization file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        /// Statistics file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Append to an existing statistics file
        #[arg(short = 'a', long = "append")]
        append: bool,
    },
}

enum Failure {
    /// Bad or missing inputs: exit code 2.
    Input(anyhow::Error),
    /// The run itself failed: exit code 1.
    Runtime(anyhow::Error),
}

fn build(input: &Path) -> Result<(Config, Simulation)> {
    let cfg = Config::load(input)?;
    let sim = Simulation::new(&cfg)?;
    Ok((cfg, sim))
}

fn run(cli: Cli) -> Result<(), Failure> {
    match cli.mode {
        Mode::Run {
            input,
            output,
            days,
        } => {
            let (cfg, mut sim) = build(&input).map_err(Failure::Input)?;
            let aux = cfg
                .auxfile
                .as_ref()
                .map(|name| (cfg.resolve(name), cfg.auxvars.clone()));
            let mut writer =
                RunWriter::create(&output, cfg.effective_seed, aux).map_err(Failure::Input)?;
            let result = match days {
                Some(n) => sim.run_daily(n, &mut writer),
                None => sim.run_hourly(&mut writer),
            };
            result.map_err(Failure::Runtime)?;
            writer.finish().map_err(Failure::Runtime)
        }
        Mode::Met {
            input,
            output,
            append,
        } => {
            let (_cfg, mut sim) = build(&input).map_err(Failure::Input)?;
            stats::output_stats(&mut sim.meteo, &output, append).map_err(Failure::Runtime)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Runtime(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
        Err(Failure::Input(e)) => {
            eprintln!("input error: {e:#}");
            ExitCode::from(2)
        }
    }
}
