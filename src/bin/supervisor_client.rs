// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command-line supervisor
//!
//! Runs one command through the handshake of a module block over Modbus TCP,
//! or prints the decoded status of the block and the broker meta block.
//!
//! ```bash
//! supervisor_client --base 400 --command 8 --param 1234 --param 0
//! supervisor_client --base 400 --status
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_modbus::prelude::*;

use rust_handshake::handshake::{
    CommandResult, ModuleSnapshot, RegisterAccess, SupervisorClient, SupervisorError,
    CMD_CLEAR_ALARM,
};
use rust_handshake::modbus::broker::META_CELLS;
use rust_handshake::register::codec;

/// Modbus supervisor for module handshake blocks
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Broker address
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Broker port
    #[arg(long, default_value_t = 502)]
    port: u16,

    /// Modbus unit id
    #[arg(long, default_value_t = 1)]
    unit: u8,

    /// Base address of the module block
    #[arg(long)]
    base: u16,

    /// Command word to execute (8 primary, 16 home, 32 reinitialise, 48 clear alarm)
    #[arg(long)]
    command: Option<u16>,

    /// Parameter word, repeat for consecutive cells starting at offset 21
    #[arg(long = "param")]
    params: Vec<u16>,

    /// Deadline for each wait of the handshake
    #[arg(long, default_value_t = 35_000)]
    timeout_ms: u64,

    /// Status poll period
    #[arg(long, default_value_t = 20)]
    poll_ms: u64,

    /// Print the block and broker status and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid broker address {}:{}", args.address, args.port))?;
    println!("Connecting to Modbus broker at {}", socket_addr);
    let ctx = tcp::connect_slave(socket_addr, Slave(args.unit))
        .await
        .with_context(|| format!("Failed to connect to {}", socket_addr))?;

    let mut supervisor = SupervisorClient::new(ctx, args.base)
        .with_poll(Duration::from_millis(args.poll_ms))
        .with_timeout(Duration::from_millis(args.timeout_ms));

    if args.status || args.command.is_none() {
        let snapshot = supervisor.snapshot().await?;
        print_snapshot(args.base, &snapshot);
        let mut ctx = supervisor.into_inner();
        let meta = ctx.read(0, META_CELLS as u16).await?;
        print_meta(&meta);
        return Ok(());
    }

    let command = args.command.unwrap_or_default();
    if command == CMD_CLEAR_ALARM {
        let status = supervisor.clear_alarm().await?;
        println!("Alarm cleared, status {}", status);
        return Ok(());
    }

    match supervisor.execute(command, &args.params).await {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(SupervisorError::Alarm { code }) => {
            println!("Command {} raised alarm: {} ({})", command, code, code.word());
            println!("Clear it with --command {}", CMD_CLEAR_ALARM);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn print_result(result: &CommandResult) {
    println!("Status: {} ({:#06b})", result.status, result.status.word());
    println!("Error: {}", result.error);
    print_telemetry(&result.telemetry);
}

fn print_snapshot(base: u16, snapshot: &ModuleSnapshot) {
    println!("Block {}:", base);
    println!("  Status: {} ({:#06b})", snapshot.status, snapshot.status.word());
    println!("  Connected: {}", snapshot.connected);
    println!("  Device state: {}", snapshot.device_state);
    println!("  Error: {}", snapshot.error);
    println!("  Operations: {}", snapshot.operations);
    println!("  Reconnects: {}", snapshot.reconnects);
    print_telemetry(&snapshot.telemetry);
}

fn print_telemetry(telemetry: &[u16]) {
    println!("Telemetry:");
    for (i, value) in telemetry.iter().enumerate() {
        let next = telemetry.get(i + 1).copied().unwrap_or(0);
        println!(
            "  offset {:2}: {:5}  (as i32 with next: {}, as f32: {})",
            i + 4,
            value,
            codec::decode_i32(*value, next),
            codec::decode_f32(*value, next)
        );
    }
}

fn print_meta(meta: &[u16]) {
    let word = |i: usize| meta.get(i).copied().unwrap_or(0);
    let uptime = chrono::Duration::seconds(i64::from(codec::decode_u32(word(0), word(1))));
    println!("Broker:");
    println!(
        "  Uptime: {}h {:02}m {:02}s",
        uptime.num_hours(),
        uptime.num_minutes() % 60,
        uptime.num_seconds() % 60
    );
    println!("  Clients: {}", word(2));
    println!("  Version: {}.{}", word(3) >> 8, word(3) & 0xFF);
    println!("  Requests: {}", codec::decode_u32(word(4), word(5)));
    println!("  Exceptions: {}", word(6));
    println!("  Modules: {}", word(7));
    println!("  Read at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
}
