//! Pathway Sim - Entry Point
//!
//! Loads a module library, simulates a population against it and writes
//! the per-person outcomes as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pathway_sim::core::config::SimulationConfig;
use pathway_sim::core::error::Result;
use pathway_sim::module::ModuleRegistry;
use pathway_sim::simulation::simulate;

/// Population runner for declarative clinical modules
#[derive(Parser, Debug)]
#[command(name = "pathway_sim")]
#[command(about = "Generate synthetic patient histories from a module library")]
struct Args {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Module library directory, overrides the config file
    #[arg(long)]
    modules: Option<PathBuf>,

    /// Master seed, overrides the config file
    #[arg(long)]
    seed: Option<u64>,

    /// Number of persons, overrides the config file
    #[arg(long, short = 'p')]
    population: Option<usize>,

    /// Log each module's state history when it finishes
    #[arg(long)]
    log_history: bool,

    /// Where to write the JSON output
    #[arg(long, default_value = "simulation_output.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("pathway_sim=info")
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(dir) = args.modules {
        config.modules_dir = dir;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(population) = args.population {
        config.population = population;
    }
    config.log_history |= args.log_history;
    config.validate()?;

    let mut registry = ModuleRegistry::new();
    registry.load_directory(&config.modules_dir)?;
    if registry.top_level().is_empty() {
        tracing::warn!(dir = %config.modules_dir.display(), "No top-level modules found");
    }

    println!("Simulating {} persons, {} to {}", config.population, config.start_year, config.end_year);
    println!("Modules: {}", registry.len());
    println!();

    let output = simulate(&config, Arc::new(registry))?;

    println!("{}", output.summary());
    std::fs::write(&args.output, output.to_json()?)?;
    println!("\nFull output written to {}", args.output.display());

    Ok(())
}
