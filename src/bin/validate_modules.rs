//! Module library validator
//!
//! Loads every module under a directory and prints validation messages.
//! Exits with status 1 when any are reported.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pathway_sim::core::error::Result;
use pathway_sim::module::ModuleRegistry;

#[derive(Parser, Debug)]
#[command(name = "validate_modules")]
#[command(about = "Check a module library for missing fields and unreachable states")]
struct Args {
    /// Module library directory
    #[arg(default_value = "modules")]
    dir: PathBuf,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter("pathway_sim=warn")
        .init();

    let args = Args::parse();
    let mut registry = ModuleRegistry::new();
    let count = registry.load_directory(&args.dir)?;

    let messages = registry.validate_all();
    for message in &messages {
        println!("{}", message);
    }

    println!("{} modules checked, {} problems", count, messages.len());
    Ok(if messages.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
