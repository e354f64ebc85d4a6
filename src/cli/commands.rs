// src/cli/commands.rs
use crate::types::AlgorithmType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hashforge CLI - CPU proof-of-work miner
#[derive(Parser, Debug)]
#[command(name = "hashforge")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Start mining with the given configuration
    Start(StartOptions),

    /// Generate a configuration file template
    Config(ConfigOptions),
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Worker thread count override (replaces any explicit thread list)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Mining algorithm override
    #[arg(short, long)]
    pub algorithm: Option<AlgorithmType>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}
