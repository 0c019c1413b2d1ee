// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Module and snapshot configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adaptor::{AdaptorError, AdaptorSpec, SharedAdaptor};
use crate::handshake::ControllerSettings;

/// One module: a register block plus the adaptor driving its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Unique module name, used in logs
    pub name: String,

    /// First address of the 100-register block
    pub base: u16,

    /// Scan period in milliseconds
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,

    /// Adaptor connection string, e.g. `sim://axis?latency_ms=50`
    pub adaptor: String,

    /// Slave id of a serial-bridged module, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave_id: Option<u8>,

    /// When set, a failure to connect and initialise at launch is fatal
    #[serde(default)]
    pub strict: bool,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Calibration file of camera modules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PathBuf>,
}

fn default_poll_ms() -> u64 {
    100
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_abort_timeout_ms() -> u64 {
    2_000
}

fn default_enabled() -> bool {
    true
}

impl ModuleConfig {
    pub fn new(name: &str, base: u16, adaptor: &str) -> Self {
        Self {
            name: name.to_string(),
            base,
            poll_ms: default_poll_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            abort_timeout_ms: default_abort_timeout_ms(),
            adaptor: adaptor.to_string(),
            slave_id: None,
            strict: false,
            enabled: true,
            calibration: None,
        }
    }

    pub fn settings(&self) -> ControllerSettings {
        let mut settings = ControllerSettings::new(&self.name, self.base)
            .with_poll(Duration::from_millis(self.poll_ms))
            .with_timeouts(
                Duration::from_millis(self.command_timeout_ms),
                Duration::from_millis(self.abort_timeout_ms),
            );
        settings.identity.slave_id = self.slave_id;
        settings
    }

    pub fn adaptor_spec(&self) -> Result<AdaptorSpec, AdaptorError> {
        self.adaptor.parse()
    }

    pub fn build_adaptor(&self) -> Result<SharedAdaptor, AdaptorError> {
        self.adaptor_spec()?.build(self.calibration.as_deref())
    }
}

/// Periodic dump of the register store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshot file; no snapshot is taken when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    pub interval_ms: u64,

    /// Restore the file content at startup
    pub restore: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_ms: 5_000,
            restore: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_defaults() {
        let module: ModuleConfig =
            serde_yml::from_str("name: axis\nbase: 400\nadaptor: sim://axis\n").unwrap();
        assert_eq!(module.poll_ms, 100);
        assert_eq!(module.command_timeout_ms, 30_000);
        assert_eq!(module.abort_timeout_ms, 2_000);
        assert!(module.enabled);
        assert!(!module.strict);

        let settings = module.settings();
        assert_eq!(settings.identity.base, 400);
        assert_eq!(settings.identity.poll, Duration::from_millis(100));
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_build_adaptor() {
        let module = ModuleConfig::new("gripper", 500, "sim://gripper?latency_ms=5");
        assert!(module.build_adaptor().is_ok());
        let module = ModuleConfig::new("bogus", 500, "ftp://nowhere");
        assert!(module.build_adaptor().is_err());
    }
}
