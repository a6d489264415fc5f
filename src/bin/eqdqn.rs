//! eqdqn command line
//!
//! Trains the equivalence-augmented DQN on the wheelchair environment,
//! fans hyperparameter sweeps out over a worker pool and summarizes saved
//! reward curves.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tch::Device;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eqdqn::algorithms::rl::config::{AgentConfig, Config, ExperimentConfig};
use eqdqn::algorithms::rl::environment::{WheelchairEnv, WheelchairParams};
use eqdqn::algorithms::rl::results::RunSummary;
use eqdqn::algorithms::rl::training::{plan_sweep, run_all, run_experiment, EquivalenceDqnAgent};

#[derive(Parser)]
#[command(name = "eqdqn")]
#[command(about = "Equivalence-augmented DQN for a wheelchair-like robot", long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(long, short, global = true, env = "EQDQN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Overrides {
    /// Number of independent runs
    #[arg(long)]
    runs: Option<usize>,

    /// Episodes per run
    #[arg(long)]
    episodes: Option<usize>,

    /// Added to the result index to form each run's seed
    #[arg(long)]
    seed_offset: Option<u64>,

    /// Results directory
    #[arg(long)]
    results_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Train one configuration and append its runs to the results directory
    Train {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Train every sweep variant in parallel, one subdirectory each
    Sweep {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print summary statistics for result directories
    Compare {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

impl Overrides {
    fn apply(&self, experiment: &mut ExperimentConfig) {
        if let Some(runs) = self.runs {
            experiment.runs = runs;
        }
        if let Some(episodes) = self.episodes {
            experiment.episodes = episodes;
        }
        if let Some(seed_offset) = self.seed_offset {
            experiment.seed_offset = seed_offset;
        }
        if let Some(dir) = &self.results_dir {
            experiment.results_dir = dir.clone();
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eqdqn=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(path: Option<&Path>, overrides: Option<&Overrides>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(overrides) = overrides {
        overrides.apply(&mut config.experiment);
    }
    config.validate()?;
    Ok(config)
}

fn train(agent: &AgentConfig, experiment: &ExperimentConfig, dir: &Path) -> eqdqn::Result<()> {
    let device = Device::cuda_if_available();
    let params = WheelchairParams {
        t_interval: experiment.t_interval,
        ..WheelchairParams::default()
    };
    let runs = run_experiment(
        experiment,
        dir,
        |seed| EquivalenceDqnAgent::new(agent, seed, device),
        |seed| WheelchairEnv::new(params, agent.action_space, seed),
    )?;
    let summary = RunSummary::from_runs(dir.display().to_string(), &runs);
    info!(
        dir = %dir.display(),
        mean = summary.mean_reward,
        last = summary.final_reward,
        "training finished"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match &cli.command {
        Command::Train { overrides } => {
            let config = load_config(cli.config.as_deref(), Some(overrides))?;
            let dir = config
                .experiment
                .results_dir
                .join(config.agent.result_label());
            train(&config.agent, &config.experiment, &dir)?;
        }
        Command::Sweep { overrides } => {
            let config = load_config(cli.config.as_deref(), Some(overrides))?;
            let tasks = plan_sweep(&config.agent, &config.sweep, &config.experiment.results_dir);
            let experiment = config.experiment.clone();
            let results = run_all(tasks, |task| {
                info!(variant = %task.output_dir.display(), "variant started");
                train(&task.agent, &experiment, &task.output_dir)
            });
            let failed = results.iter().filter(|r| r.is_err()).count();
            for err in results.iter().filter_map(|r| r.as_ref().err()) {
                error!(%err, "variant failed");
            }
            if failed > 0 {
                bail!("{failed} sweep variant(s) failed");
            }
        }
        Command::Compare { dirs } => {
            for dir in dirs {
                let summary = RunSummary::from_dir(dir.display().to_string(), dir)
                    .with_context(|| format!("reading results from {}", dir.display()))?;
                println!("{summary}\n");
            }
        }
    }
    Ok(())
}
