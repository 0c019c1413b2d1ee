// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon launch, shutdown and the full supervisor round trip over Modbus TCP

use std::time::Duration;

use tempfile::tempdir;
use tokio::time::{self, Instant};
use tokio_modbus::prelude::*;

use rust_handshake::config::{Config, ModuleConfig};
use rust_handshake::daemon::{Daemon, LaunchError};
use rust_handshake::handshake::{StatusBits, SupervisorClient, CMD_PRIMARY};

fn local_config(modules: Vec<ModuleConfig>) -> Config {
    let mut config = Config::default();
    config.modbus.host = "127.0.0.1".to_string();
    config.modbus.port = 0;
    config.modules = modules;
    config
}

fn module(name: &str, base: u16, adaptor: &str) -> ModuleConfig {
    let mut module = ModuleConfig::new(name, base, adaptor);
    module.poll_ms = 10;
    module.abort_timeout_ms = 200;
    module
}

async fn wait_ready(daemon: &Daemon, base: u16) {
    let store = daemon.store();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !StatusBits::from_word(store.read_one(base).unwrap()).contains(StatusBits::READY) {
        assert!(Instant::now() < deadline, "module at {base} never became ready");
        time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_supervisor_round_trip_over_tcp() -> anyhow::Result<()> {
    let config = local_config(vec![
        module("axis", 200, "sim://axis?latency_ms=20"),
        module("gripper", 400, "mock://?latency_ms=20"),
    ]);
    let daemon = Daemon::launch(&config, false).await?;
    let addr = daemon.modbus_addr().expect("broker address");
    wait_ready(&daemon, 200).await;
    wait_ready(&daemon, 400).await;

    let ctx = tcp::connect(addr).await?;
    let mut supervisor = SupervisorClient::new(ctx, 400)
        .with_poll(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(5));
    let result = supervisor.execute(CMD_PRIMARY, &[1234, 0]).await?;
    assert_eq!(result.telemetry[0], 1234);
    assert_eq!(result.telemetry[1], 0);
    assert!(result.status.contains(StatusBits::READY));

    // Axis move to -5 (i32, low word first)
    let mut ctx = supervisor.into_inner();
    ctx.disconnect().await?;
    let ctx = tcp::connect(addr).await?;
    let mut axis = SupervisorClient::new(ctx, 200)
        .with_poll(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(5));
    let result = axis.execute(CMD_PRIMARY, &[0xFFFB, 0xFFFF]).await?;
    assert_eq!(&result.telemetry[..2], &[0xFFFB, 0xFFFF]);

    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_dry_run_starts_broker_only() -> anyhow::Result<()> {
    let config = local_config(vec![module("axis", 200, "sim://axis")]);
    let daemon = Daemon::launch(&config, true).await?;
    let addr = daemon.modbus_addr().expect("broker address");

    time::sleep(Duration::from_millis(100)).await;
    let mut ctx = tcp::connect(addr).await?;
    assert_eq!(ctx.read_holding_registers(200, 1).await??, vec![0]);
    ctx.disconnect().await?;

    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_bind_failure() -> anyhow::Result<()> {
    let taken = std::net::TcpListener::bind("127.0.0.1:0")?;
    let mut config = local_config(Vec::new());
    config.modbus.port = taken.local_addr()?.port();

    match Daemon::launch(&config, false).await {
        Err(err @ LaunchError::Bind { .. }) => assert_eq!(err.exit_code(), 2),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("bound a port that is already taken"),
    }
    Ok(())
}

#[tokio::test]
async fn test_strict_module_init_failure() -> anyhow::Result<()> {
    let mut strict = module("gripper", 400, "mock://?init_fail=1");
    strict.strict = true;
    let config = local_config(vec![strict]);

    match Daemon::launch(&config, false).await {
        Err(err @ LaunchError::AdaptorInit { .. }) => assert_eq!(err.exit_code(), 3),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("strict module started without its device"),
    }

    // The same module without strict starts and reports the alarm
    let config = local_config(vec![module("gripper", 400, "mock://?init_fail=1")]);
    let daemon = Daemon::launch(&config, false).await?;
    let store = daemon.store();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !StatusBits::from_word(store.read_one(400)?).contains(StatusBits::ALARM) {
        assert!(Instant::now() < deadline);
        time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.read_one(403)?, 6);
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_a_config_error() {
    let config = local_config(vec![
        module("a", 200, "sim://axis"),
        module("a", 300, "sim://axis"),
    ]);
    match Daemon::launch(&config, false).await {
        Err(err @ LaunchError::Config(_)) => assert_eq!(err.exit_code(), 1),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("duplicate names accepted"),
    }
}

#[tokio::test]
async fn test_snapshot_survives_restart() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let mut config = local_config(Vec::new());
    config.modbus.enabled = false;
    config.snapshot.path = Some(temp_dir.path().join("registers.bin"));

    let daemon = Daemon::launch(&config, false).await?;
    daemon.store().write_many(700, &[11, 22, 33])?;
    daemon.shutdown();
    daemon.join().await?;
    assert!(temp_dir.path().join("registers.bin").exists());

    let daemon = Daemon::launch(&config, false).await?;
    assert_eq!(daemon.store().read(700, 3)?, vec![11, 22, 33]);
    daemon.shutdown();
    daemon.join().await?;
    Ok(())
}
