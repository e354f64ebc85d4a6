// src/main.rs
use clap::Parser;
use hashforge::config::ThreadEntry;
use hashforge::utils::logging::{init_logging, init_verbose_logging};
use hashforge::{self as hf, MinerError, cli};
use std::time::Duration;

/// Main entry point: parse the command line and dispatch.
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Loads the configuration, applies CLI overrides and runs the miner
/// until interrupted.
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    if opts.verbose {
        init_verbose_logging();
    } else {
        init_logging();
    }

    let mut config = hf::config::load(&opts.config)?;
    if let Some(algo) = opts.algorithm {
        config.algorithm = algo.to_string();
    }
    if let Some(threads) = opts.threads {
        // an explicit count replaces whatever thread list the file carried
        let algorithm = config.initial_algorithm()?;
        config
            .cpu
            .threads
            .insert(algorithm.config_key().into(), vec![ThreadEntry::default(); threads]);
    }

    let handle = hf::Miner::start(config)?;

    let reporter = hf::StatsReporter::new(handle.stats(), Duration::from_secs(60));
    reporter.start_reporting();

    wait_for_interrupt()?;
    log::info!("Interrupt received, stopping");
    handle.stop();
    Ok(())
}

/// Blocks until Ctrl+C.
fn wait_for_interrupt() -> Result<(), MinerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .map_err(MinerError::IoError)
}

/// Writes a configuration template to disk.
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    std::fs::write(&opts.output, hf::config::generate_template())?;
    println!("Wrote configuration template to {}", opts.output.display());
    Ok(())
}
