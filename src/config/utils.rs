// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::HashSet;

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, CONFIG_SCHEMA};
use crate::handshake::layout::{BLOCK_LEN, META_BLOCK_LEN};
use crate::handshake::RegisterBlock;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_handshake --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Address space**: `max_address` leaves room for the meta block
/// - **Blocks**: every module block lies within `[100, max_address]` and no two
///   enabled blocks overlap
/// - **Names**: module names are non-empty and unique
/// - **Timing**: `poll_ms` in 1..=10000, timeouts at least 1 ms
/// - **Adaptors**: every connection string parses
/// - **Unit offsets**: an offset keeps at least one address in range
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let max_address = config.modbus.max_address;
    if max_address < META_BLOCK_LEN - 1 {
        anyhow::bail!(
            "modbus.max_address {} leaves no room for the meta block 0..{}",
            max_address,
            META_BLOCK_LEN
        );
    }

    if !is_valid_ip_address(&config.modbus.host) {
        // Host names are resolved at bind time
        warn!("Potentially invalid address format: {}", config.modbus.host);
    }

    for (unit, offset) in &config.modbus.unit_offsets {
        if *offset > max_address {
            anyhow::bail!(
                "Unit {} offset {} is beyond max_address {}",
                unit,
                offset,
                max_address
            );
        }
    }

    let mut names = HashSet::new();
    let mut blocks: Vec<(&str, RegisterBlock)> = Vec::new();
    for module in config.enabled_modules() {
        if module.name.trim().is_empty() {
            anyhow::bail!("Module at base {} has an empty name", module.base);
        }
        if !names.insert(module.name.as_str()) {
            anyhow::bail!("Duplicate module name: {}", module.name);
        }

        let block = RegisterBlock::new(module.base);
        if module.base < META_BLOCK_LEN || block.end() > u32::from(max_address) + 1 {
            anyhow::bail!(
                "Module {} block {}..{} must lie within {}..={}",
                module.name,
                module.base,
                u32::from(module.base) + u32::from(BLOCK_LEN),
                META_BLOCK_LEN,
                max_address
            );
        }
        if let Some((other, _)) = blocks.iter().find(|(_, b)| b.overlaps(&block)) {
            anyhow::bail!("Module {} block overlaps module {}", module.name, other);
        }
        blocks.push((module.name.as_str(), block));

        if !(1..=10_000).contains(&module.poll_ms) {
            anyhow::bail!(
                "Module {} poll_ms {} must be within 1..=10000",
                module.name,
                module.poll_ms
            );
        }
        if module.command_timeout_ms == 0 || module.abort_timeout_ms == 0 {
            anyhow::bail!("Module {} timeouts must be at least 1 ms", module.name);
        }

        module
            .adaptor_spec()
            .with_context(|| format!("Module {} has an invalid adaptor", module.name))?;
    }

    Ok(())
}
