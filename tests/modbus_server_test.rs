// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the Modbus broker
//!
//! These tests start a broker on an ephemeral port and talk to it with a
//! tokio-modbus TCP client: plain reads and writes, exception codes, the meta
//! block and the atomicity of multi-register writes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_modbus::prelude::*;

use rust_handshake::config::ModbusConfig;
use rust_handshake::modbus::ModbusBroker;
use rust_handshake::register::{RegisterStore, SharedRegisterStore};

/// Test utility function to start a broker in the background
async fn start_test_server(
    unit_offsets: &[(u8, u16)],
) -> Result<(SocketAddr, SharedRegisterStore, Arc<AtomicBool>), Box<dyn std::error::Error>> {
    let config = ModbusConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        unit_offsets: unit_offsets.iter().copied().collect(),
        ..ModbusConfig::default()
    };
    let store = RegisterStore::shared(config.max_address);
    let broker = ModbusBroker::bind(&config, Arc::clone(&store), 2).await?;
    let socket_addr = broker.local_addr()?;
    println!("Test server started on: {}", socket_addr);

    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(broker.run(Arc::clone(&running)));

    // Give the server a moment to start
    time::sleep(Duration::from_millis(100)).await;

    Ok((socket_addr, store, running))
}

#[tokio::test]
async fn test_read_holding_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, running) = start_test_server(&[]).await?;
    store.write_many(400, &[0b1001, 1, 1, 0, 1234, 0])?;

    let mut ctx = tcp::connect(socket_addr).await?;
    let data = ctx.read_holding_registers(400, 6).await??;
    assert_eq!(data, vec![0b1001, 1, 1, 0, 1234, 0]);

    // Input registers alias the same table
    let data = ctx.read_input_registers(404, 1).await??;
    assert_eq!(data, vec![1234]);

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_write_single_register() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, running) = start_test_server(&[]).await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    ctx.write_single_register(420, 8).await??;
    assert_eq!(store.read_one(420)?, 8);

    let data = ctx.read_holding_registers(420, 1).await??;
    assert_eq!(data, vec![8]);

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_write_multiple_registers() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, running) = start_test_server(&[]).await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    ctx.write_multiple_registers(421, &[1234, 0, 7]).await??;
    assert_eq!(store.read(421, 3)?, vec![1234, 0, 7]);

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_exception_codes() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, running) = start_test_server(&[]).await?;

    let mut ctx = tcp::connect(socket_addr).await?;

    // Last valid cell is writable, the next one is not
    ctx.write_single_register(999, 1).await??;
    assert_eq!(
        ctx.write_single_register(1000, 1).await?,
        Err(ExceptionCode::IllegalDataAddress)
    );

    // A multi-write straddling the end changes nothing
    assert_eq!(
        ctx.write_multiple_registers(998, &[5, 5]).await?,
        Err(ExceptionCode::IllegalDataAddress)
    );
    assert_eq!(store.read(998, 2)?, vec![0, 1]);

    // Reads past the end and oversized reads
    assert_eq!(
        ctx.read_holding_registers(990, 20).await?,
        Err(ExceptionCode::IllegalDataAddress)
    );
    assert_eq!(
        ctx.read_holding_registers(0, 126).await?,
        Err(ExceptionCode::IllegalDataValue)
    );

    // The meta block belongs to the broker
    assert_eq!(
        ctx.write_single_register(2, 99).await?,
        Err(ExceptionCode::IllegalDataAddress)
    );

    // Unsupported function code
    assert_eq!(
        ctx.read_coils(0, 1).await?,
        Err(ExceptionCode::IllegalFunction)
    );

    // The connection survives exceptions
    let data = ctx.read_holding_registers(999, 1).await??;
    assert_eq!(data, vec![1]);

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_meta_block() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _store, running) = start_test_server(&[]).await?;

    let mut ctx = tcp::connect(socket_addr).await?;
    // The first refresh happens when the broker starts, the next one a
    // second later sees this client
    time::sleep(Duration::from_millis(1200)).await;
    let meta = ctx.read_holding_registers(0, 8).await??;
    assert_eq!(meta[2], 1, "connected clients");
    assert_eq!(meta[3], rust_handshake::modbus::broker::version_word());
    assert_eq!(meta[7], 2, "configured modules");

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_unit_offsets() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, store, running) = start_test_server(&[(5, 300)]).await?;

    let mut ctx = tcp::connect_slave(socket_addr, Slave(5)).await?;
    ctx.write_single_register(120, 48).await??;
    assert_eq!(store.read_one(420)?, 48);

    ctx.disconnect().await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_multi_write_is_atomic() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _store, running) = start_test_server(&[]).await?;

    let mut writer = tcp::connect(socket_addr).await?;
    let mut reader = tcp::connect(socket_addr).await?;

    let writes = tokio::spawn(async move {
        for round in 0..200u16 {
            let value = round % 2 + 1;
            writer
                .write_multiple_registers(500, &[value; 4])
                .await
                .unwrap()
                .unwrap();
        }
    });

    for _ in 0..200 {
        let data = reader.read_holding_registers(500, 4).await??;
        assert!(
            data.iter().all(|v| *v == data[0]),
            "partial multi-write observed: {data:?}"
        );
    }

    writes.await?;
    running.store(false, Ordering::SeqCst);
    Ok(())
}
