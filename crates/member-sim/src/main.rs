use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use member_sim::{ScheduledFault, ScheduledPartition, Simulation, SimulationConfig};

/// Tick-driven simulator for membermesh groups
#[derive(Parser)]
#[command(name = "member-sim")]
#[command(about = "Simulate SWIM-style membership over a lossy network")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation scenario
    Run {
        /// Scenario YAML file; defaults and MEMBERSIM_* variables apply without one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Milliseconds of wall-clock time per tick; runs as fast as possible when unset
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Generate an example scenario
    Generate {
        /// Scenario to generate (join, single-failure, multi-failure, lossy, partition)
        #[arg(short, long, default_value = "single-failure")]
        scenario: String,

        /// Output file path
        #[arg(short, long, default_value = "scenario.yaml")]
        output: PathBuf,
    },

    /// Validate a scenario file
    Validate {
        /// Path to the scenario YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.verbose)?;

    match cli.command {
        Commands::Run {
            config,
            output,
            tick_ms,
        } => run_simulation(config.as_deref(), &output, tick_ms),
        Commands::Generate { scenario, output } => generate_example(&scenario, &output),
        Commands::Validate { config } => validate_config(&config),
    }
}

fn init_tracing(log_level: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        match log_level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("member_sim={level},member_gossip={level},member_core={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn run_simulation(config_path: Option<&Path>, output_dir: &Path, tick_ms: Option<u64>) -> Result<()> {
    match config_path {
        Some(path) => info!("Loading configuration from {:?}", path),
        None => info!("Using default configuration"),
    }
    let config = SimulationConfig::load(config_path)?;

    info!("Validating configuration");
    config.validate()?;

    let mut simulation = Simulation::new(config.clone())?;

    match tick_ms {
        Some(ms) => {
            info!("Running {} ticks at {} ms per tick", config.total_ticks, ms);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(simulation.run_paced(Duration::from_millis(ms)))?;
        }
        None => {
            simulation.run();
        }
    }

    std::fs::create_dir_all(output_dir)?;
    config.to_yaml_file(&output_dir.join("config.yaml"))?;
    simulation.log().write_to(&output_dir.join("dbg.log"))?;

    let summary = simulation.summary();
    std::fs::write(output_dir.join("summary.json"), summary.to_json()?)?;

    info!(
        "Ran {} ticks: {} joins, {} removals, {} false positives, {} datagrams dropped",
        summary.ticks,
        summary.joins,
        summary.removals,
        summary.false_positives,
        summary.network.dropped
    );
    for fault in &summary.faults {
        if fault.fully_detected() {
            info!(
                "{:?} of {} at tick {} detected by all {} survivors within {} ticks",
                fault.kind,
                fault.node,
                fault.at_tick,
                fault.survivors,
                fault.detection_latency().unwrap_or_default()
            );
        } else {
            warn!(
                "{:?} of {} at tick {} detected by {} of {} survivors",
                fault.kind, fault.node, fault.at_tick, fault.detected_by, fault.survivors
            );
        }
    }

    info!("Results saved to {:?}", output_dir);
    Ok(())
}

fn generate_example(scenario: &str, output_path: &Path) -> Result<()> {
    info!("Generating {} scenario", scenario);

    let config = match scenario {
        "join" => create_join_example(),
        "single-failure" => create_single_failure_example(),
        "multi-failure" => create_multi_failure_example(),
        "lossy" => create_lossy_example(),
        "partition" => create_partition_example(),
        _ => bail!(
            "Unknown scenario: {}. Use 'join', 'single-failure', 'multi-failure', 'lossy' or 'partition'",
            scenario
        ),
    };

    config.to_yaml_file(output_path)?;
    info!("Scenario saved to {:?}", output_path);
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_path);

    let config = SimulationConfig::from_yaml_file(config_path)?;
    config.validate()?;

    info!("Configuration is valid!");
    info!("  - Nodes: {}", config.node_count);
    info!("  - Ticks: {}", config.total_ticks);
    info!("  - Drop rate: {}", config.drop_rate);
    info!("  - Crashes: {}", config.crashes.len());
    info!("  - Isolations: {}", config.isolations.len());
    info!("  - Partitions: {}", config.partitions.len());
    info!(
        "  - Probe period / indirect window: {} / {}",
        config.gossip.probe_period, config.gossip.indirect_window
    );

    Ok(())
}

fn create_join_example() -> SimulationConfig {
    SimulationConfig::default()
}

fn create_single_failure_example() -> SimulationConfig {
    SimulationConfig {
        crashes: vec![ScheduledFault::new(5, 100)],
        ..SimulationConfig::default()
    }
}

fn create_multi_failure_example() -> SimulationConfig {
    SimulationConfig {
        crashes: vec![
            ScheduledFault::new(3, 100),
            ScheduledFault::new(5, 100),
            ScheduledFault::new(7, 100),
            ScheduledFault::new(9, 100),
        ],
        ..SimulationConfig::default()
    }
}

fn create_lossy_example() -> SimulationConfig {
    SimulationConfig {
        drop_rate: 0.1,
        crashes: vec![ScheduledFault::new(5, 100)],
        ..SimulationConfig::default()
    }
}

fn create_partition_example() -> SimulationConfig {
    SimulationConfig {
        partitions: vec![
            ScheduledPartition::one_way(4, 0, 150),
            ScheduledPartition::both_ways(2, 6, 200).healed_at(400),
        ],
        isolations: vec![ScheduledFault::new(8, 300)],
        ..SimulationConfig::default()
    }
}
