// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP broker configuration
//!
//! This module defines the structures for configuring the Modbus TCP broker
//! that exposes the register file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::register::DEFAULT_MAX_ADDRESS;

/// Configuration for the Modbus TCP broker.
///
/// # Fields
///
/// * `enabled` - Flag to enable or disable the broker
/// * `host` - Network address the broker binds to (default: 0.0.0.0)
/// * `port` - TCP port number for the broker (default: 502)
/// * `max_address` - Highest valid register address (default: 999)
/// * `unit_offsets` - Address offset applied per Modbus unit id
///
/// # Example
///
/// ```
/// use rust_handshake::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     port: 1502,
///     host: "127.0.0.1".to_string(),
///     ..ModbusConfig::default()
/// };
/// assert_eq!(modbus_config.max_address, 999);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Flag to enable or disable the broker.
    ///
    /// When disabled the register store still exists and the controllers run,
    /// but nothing is reachable from the network.
    pub enabled: bool,

    /// The network address the broker will bind to.
    ///
    /// Can be an IPv4/IPv6 address or a hostname. Use "0.0.0.0" to bind to all
    /// IPv4 interfaces.
    pub host: String,

    /// The TCP port the broker will listen on. 0 picks an ephemeral port.
    pub port: u16,

    /// Highest valid register address, inclusive.
    pub max_address: u16,

    /// Unit id to address offset. Unit ids absent from the map share the
    /// plain address space.
    pub unit_offsets: HashMap<u8, u16>,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 502,
            max_address: DEFAULT_MAX_ADDRESS,
            unit_offsets: HashMap::new(),
        }
    }
}
