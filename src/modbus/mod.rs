// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module exposes the register store over Modbus TCP so that external
//! supervisors can drive the module handshakes.
//!
//! ## Key Components
//!
//! - [`HandshakeModbusServer`]: the per-connection service mapping Modbus
//!   requests onto the register store.
//! - [`ModbusBroker`]: the listener task, client accounting and meta block.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::{atomic::AtomicBool, Arc};
//! use rust_handshake::config::ModbusConfig;
//! use rust_handshake::modbus::ModbusBroker;
//! use rust_handshake::register::RegisterStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = RegisterStore::shared(999);
//! let broker = ModbusBroker::bind(&ModbusConfig::default(), store, 0).await?;
//! broker.run(Arc::new(AtomicBool::new(true))).await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod modbus_server;

pub use broker::ModbusBroker;
pub use modbus_server::{BrokerStats, HandshakeModbusServer};
