//! nandprog - raw NAND flash programmer
//!
//! Host-side command line for a programmer running the nandprog device
//! session, reached over a serial port or TCP.
//!
//! # Architecture
//!
//! - `nandprog-core` is the device engine (bus strategies, operation
//!   sequencer, checkpoints, wire protocol)
//! - `nandprog-serial` drives that engine from the host
//! - `nandprog-dummy` emulates a NAND die; `nandprog emulate` serves it over
//!   TCP so every command can be tried without hardware

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ConnArgs};
use nandprog_core::chip::ChipRegistry;
use nandprog_serial::{HostConfig, Programmer, Transport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let registry = match commands::load_registry(cli.chip_db.as_deref()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to load chip database: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("{} chip definitions known", registry.len());

    match cli.command {
        Commands::ListChips { vendor } => {
            commands::list_chips(&registry, vendor.as_deref());
            Ok(())
        }
        Commands::Emulate {
            listen,
            chip,
            checkpoint,
            millivolts,
            once,
        } => commands::run_emulate(
            &registry,
            &listen,
            chip.as_deref(),
            checkpoint.as_deref(),
            millivolts,
            once,
        ),
        Commands::Status { conn } => {
            let (mut programmer, _) = open(cli.config.as_deref(), &conn, registry)?;
            let result = commands::run_status(&mut programmer);
            finish(&mut programmer, result)
        }
        Commands::Read { conn, range, output } => {
            let (mut programmer, config) = open(cli.config.as_deref(), &conn, registry)?;
            let result = commands::ensure_chip(&mut programmer, config.chip.as_deref())
                .and_then(|profile| commands::run_read(&mut programmer, &profile, &range, &output));
            finish(&mut programmer, result)
        }
        Commands::Write { conn, range, input } => {
            let (mut programmer, config) = open(cli.config.as_deref(), &conn, registry)?;
            let result = commands::ensure_chip(&mut programmer, config.chip.as_deref())
                .and_then(|profile| commands::run_write(&mut programmer, &profile, &range, &input));
            finish(&mut programmer, result)
        }
        Commands::Erase { conn, range } => {
            let (mut programmer, config) = open(cli.config.as_deref(), &conn, registry)?;
            let result = commands::ensure_chip(&mut programmer, config.chip.as_deref())
                .and_then(|profile| commands::run_erase(&mut programmer, &profile, &range));
            finish(&mut programmer, result)
        }
    }
}

/// Resolve the host configuration and connect
fn open(
    config_path: Option<&std::path::Path>,
    conn: &ConnArgs,
    registry: ChipRegistry,
) -> Result<(Programmer<Box<dyn Transport>>, HostConfig), Box<dyn std::error::Error>> {
    let mut config = commands::host_config(config_path)?;
    conn.apply(&mut config);
    let programmer = commands::connect(&config, registry)?;
    Ok((programmer, config))
}

/// End the device session whatever the command's outcome
fn finish<T: Transport>(
    programmer: &mut Programmer<T>,
    result: Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = programmer.exit() {
        log::debug!("Could not end the session: {}", e);
    }
    result
}
