//! ortrun - run ONNX models and model-zoo test directories.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod runner;

use commands::{InspectCommand, RunCommand, ZooCommand};

/// ortrun - run ONNX models and model-zoo test directories.
///
/// Models are loaded through ONNX Runtime when built with the
/// `onnxruntime` feature, or through the reference engine otherwise.
#[derive(Parser)]
#[command(name = "ortrun")]
#[command(about = "ONNX model runner")]
#[command(version)]
pub struct Cli {
    /// Session options file (YAML or JSON)
    #[arg(long, global = true)]
    pub options: Option<String>,

    /// Use the reference engine even when ONNX Runtime is available
    #[arg(long, global = true)]
    pub reference: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one model on tensor records
    Run(RunCommand),
    /// Run every model under a model-zoo directory
    Zoo(ZooCommand),
    /// Print model metadata
    Inspect(InspectCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Run(cmd) => cmd.run(&cli),
        Commands::Zoo(cmd) => cmd.run(&cli),
        Commands::Inspect(cmd) => cmd.run(&cli),
    }
}
