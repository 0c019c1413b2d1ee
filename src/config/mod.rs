// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the handshake daemon
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before it is deserialized.
//!
//! ## Configuration Structure
//!
//! - `modbus`: Settings for the Modbus TCP broker
//! - `modules`: One entry per module block and its device adaptor
//! - `snapshot`: Optional periodic dump of the register store
//!
//! ## Usage
//!
//! ```no_run
//! use rust_handshake::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(Some("127.0.0.1".to_string()), Some(1502));
//!
//! println!("Broker port: {}", config.modbus.port);
//! ```

pub mod modbus;
pub mod modules;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use modbus::ModbusConfig;
pub use modules::{ModuleConfig, SnapshotConfig};
pub use utils::{is_valid_ip_address, output_config_schema, validate_specific_rules};

/// JSON schema the YAML file is validated against.
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure.
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, so an empty file is a valid broker-only setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Settings for the Modbus TCP broker.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Module blocks and their adaptors.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,

    /// Register store snapshot settings.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::sample()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// A configuration with one module of each simulated kind.
    pub fn sample() -> Self {
        Self {
            modules: vec![
                ModuleConfig::new("axis", 200, "sim://axis?latency_ms=50"),
                ModuleConfig::new("gripper", 400, "sim://gripper?latency_ms=20"),
                ModuleConfig::new("feeder", 500, "sim://feeder"),
                ModuleConfig::new("light", 600, "sim://light"),
                ModuleConfig::new("camera", 700, "camera://sim?objects=320,240,15"),
            ],
            ..Self::default()
        }
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails validation leaves a `*.sample.yaml` next to it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        match Self::from_yaml_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                error!("Configuration error in {}: {:#}", path.display(), err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                Err(err.context(format!("Invalid configuration file {}", path.display())))
            }
        }
    }

    /// Parse, validate and check a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty document is the default configuration
        let yaml_value: serde_yml::Value = match serde_yml::from_str(contents)
            .context("Failed to parse YAML configuration")?
        {
            serde_yml::Value::Null => serde_yml::Value::Mapping(Default::default()),
            value => value,
        };

        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating configuration against schema");
        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = serde_yml::from_value(yaml_value)
            .context("Failed to deserialize configuration")?;

        validate_specific_rules(&config)?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only explicitly provided values override the loaded configuration.
    pub fn apply_args(&mut self, modbus_host: Option<String>, modbus_port: Option<u16>) {
        if let Some(host) = modbus_host {
            debug!("Overriding Modbus host from command line: {}", host);
            self.modbus.host = host;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
    }

    /// Modules whose `enabled` flag is set.
    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.modules.iter().filter(|module| module.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.modbus.max_address, 999);
    }

    #[test]
    fn test_sample_is_valid() {
        let yaml = serde_yml::to_string(&Config::sample()).unwrap();
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.modules.len(), 5);
    }

    #[test]
    fn test_schema_rejects_unknown_keys() {
        assert!(Config::from_yaml_str("modbus:\n  prot: 502\n").is_err());
        assert!(Config::from_yaml_str("modules:\n  - name: a\n").is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(None, Some(1502));
        assert_eq!(config.modbus.port, 1502);
        assert_eq!(config.modbus.host, "0.0.0.0");
    }
}
