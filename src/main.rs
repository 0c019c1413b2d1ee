// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the register broker and module controllers

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use tokio::signal;

use rust_handshake::config::{self, Config};
use rust_handshake::daemon::{Daemon, LaunchError};

/// Modbus-TCP register broker and module handshake controllers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Start the broker without any device adaptor
    #[arg(long)]
    dry_run: bool,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Modbus broker bind address
    #[arg(long)]
    modbus_host: Option<String>,

    /// Modbus broker port
    #[arg(long)]
    modbus_port: Option<u16>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 1 config error, 2 bind failure, 3 strict adaptor initialisation failure.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LaunchError>()
        .map(LaunchError::exit_code)
        .unwrap_or(1)
}

async fn run(args: Args) -> Result<()> {
    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            anyhow::bail!(
                "Configuration file does not exist: {}",
                validate_path.display()
            );
        }
        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {:#}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = Config::from_file(&args.config).map_err(LaunchError::Config)?;
    config.apply_args(args.modbus_host.clone(), args.modbus_port);

    let daemon = Daemon::launch(&config, args.dry_run).await?;
    if let Some(addr) = daemon.modbus_addr() {
        info!("Serving registers on {}", addr);
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, terminating daemon"),
        Err(err) => error!("Error waiting for shutdown signal: {}", err),
    }
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let bind = anyhow::Error::from(LaunchError::Bind {
            addr: "0.0.0.0:502".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        });
        assert_eq!(exit_code(&bind), 2);
        let config = anyhow::Error::from(LaunchError::Config(anyhow::anyhow!("bad")));
        assert_eq!(exit_code(&config), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["rust_handshake", "--config", "cell.yaml", "--dry-run"]);
        assert_eq!(args.config, PathBuf::from("cell.yaml"));
        assert!(args.dry_run);
    }
}
