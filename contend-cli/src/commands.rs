//! CLI command implementations

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use contend_core::invariants::{
    AllJoinedInvariant, FairnessInvariant, Invariant, MutualExclusionInvariant, NoLeakInvariant,
};
use contend_core::{ContendConfig, RunReport, SimulationController, StrategyKind};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one strategy and report what happened
    Run {
        /// Strategy name or alias (see `contend list`)
        #[arg(short, long)]
        strategy: StrategyKind,
        /// Run length in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Number of actors (defaults to the strategy's usual topology)
        #[arg(short, long)]
        actors: Option<usize>,
        /// Number of resources (defaults to the strategy's usual topology)
        #[arg(short, long)]
        resources: Option<usize>,
        /// Seed for randomized backoff
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report as JSON instead of a summary
        #[arg(long)]
        json: bool,
        /// Exit with status 1 when actors hung or nobody completed a cycle
        #[arg(long)]
        fail_on_anomaly: bool,
    },
    /// List available strategies
    List,
}

/// Handle the CLI command
///
/// # Errors
/// - `ContendError::Configuration` - Invalid topology or parameters
/// - `serde_json::Error` - Report could not be serialized
pub async fn handle_command(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            strategy,
            duration,
            actors,
            resources,
            seed,
            json,
            fail_on_anomaly,
        } => {
            let (default_actors, default_resources) = strategy.default_topology();
            let options = RunOptions {
                strategy,
                duration: Duration::from_secs(duration),
                actors: actors.unwrap_or(default_actors),
                resources: resources.unwrap_or(default_resources),
                seed,
            };
            let report = run_strategy(options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }

            if fail_on_anomaly && report.has_liveness_anomaly() {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            list_strategies();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Parameters of one `contend run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub strategy: StrategyKind,
    pub duration: Duration,
    pub actors: usize,
    pub resources: usize,
    pub seed: Option<u64>,
}

/// Runs one strategy with environment overrides applied.
///
/// # Errors
/// - `ContendError::Configuration` - Invalid topology or parameters
pub async fn run_strategy(options: RunOptions) -> anyhow::Result<RunReport> {
    let mut config = ContendConfig::from_env();
    if let Some(seed) = options.seed {
        config.strategy.seed = seed;
    }

    let mut controller =
        SimulationController::configure(options.actors, options.resources, options.strategy)?
            .with_config(config)
            .context("invalid configuration")?;

    tracing::debug!(
        "Running {} on {} for {:?}",
        options.strategy,
        controller.topology(),
        options.duration
    );

    Ok(controller.run_for(options.duration).await?)
}

/// Invariants every run is checked against before printing.
fn standard_invariants(strategy: StrategyKind) -> Vec<Box<dyn Invariant>> {
    let mut invariants: Vec<Box<dyn Invariant>> = vec![
        Box::new(MutualExclusionInvariant),
        Box::new(NoLeakInvariant),
        Box::new(AllJoinedInvariant),
    ];
    if strategy == StrategyKind::FairQueue {
        invariants.push(Box::new(FairnessInvariant::new(1)));
    }
    invariants
}

fn print_summary(report: &RunReport) {
    print!("{}", report.summary());

    let violations = report.check(&standard_invariants(report.strategy));
    if violations.is_empty() {
        println!("\nAll invariants held.");
    } else {
        println!("\nInvariant violations:");
        for violation in violations {
            println!("  - {violation}");
        }
    }
}

fn list_strategies() {
    println!("Strategies");
    println!("{:-<78}", "");

    for kind in StrategyKind::ALL {
        let (actors, resources) = kind.default_topology();
        println!(
            "{:<16} {}x{}  {}",
            kind.name(),
            actors,
            resources,
            kind.description()
        );
        println!("{:<16} alias: {}", "", kind.alias());
    }

    println!("\nUse 'contend run --strategy <name>' to run one.");
}
