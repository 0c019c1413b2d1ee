// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use anyhow::Result;
use tempfile::tempdir;

use rust_handshake::config::{Config, ModuleConfig};

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

#[test]
fn test_config_load_and_save() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let mut config = Config::default();
    config.modbus.port = 1502;
    config.modbus.unit_offsets.insert(3, 200);
    let mut camera = ModuleConfig::new("camera", 600, "camera://sim?objects=10,20,0");
    camera.calibration = Some(PathBuf::from("calib.yaml"));
    camera.strict = true;
    config.modules = vec![ModuleConfig::new("axis", 400, "sim://axis"), camera];
    config.snapshot.path = Some(temp_dir.path().join("registers.bin"));

    config.save_to_file(&config_path)?;
    let loaded = Config::from_file(&config_path)?;
    assert_eq!(loaded, config);

    // A missing file is created with the defaults
    let missing = temp_dir.path().join("missing.yaml");
    let default_config = Config::from_file(&missing)?;
    assert!(missing.exists());
    assert_eq!(default_config, Config::default());

    Ok(())
}

#[test]
fn test_hand_written_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("cell.yaml");
    fs::write(
        &config_path,
        r#"
modbus:
  host: 127.0.0.1
  port: 1502
modules:
  - name: axis
    base: 200
    poll_ms: 20
    adaptor: sim://axis?latency_ms=50
  - name: gripper
    base: 400
    adaptor: sim://gripper
    slave_id: 3
    enabled: false
snapshot:
  path: /tmp/registers.bin
"#,
    )?;

    let config = Config::from_file(&config_path)?;
    assert_eq!(config.modbus.max_address, 999);
    assert_eq!(config.modules.len(), 2);
    assert_eq!(config.modules[0].poll_ms, 20);
    assert_eq!(config.modules[1].slave_id, Some(3));
    assert_eq!(config.enabled_modules().count(), 1);
    assert_eq!(config.snapshot.interval_ms, 5000);
    Ok(())
}

#[test]
fn test_invalid_config_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Valid YAML, wrong types
    fs::write(
        &config_path,
        r#"
modbus:
  port: "not-a-port"
"#,
    )?;
    assert!(Config::from_file(&config_path).is_err());
    let sample_path = temp_dir.path().join("config.sample.yaml");
    assert!(sample_path.exists(), "sample file should be created");

    // The sample itself loads
    let sample = Config::from_file(&sample_path)?;
    assert!(!sample.modules.is_empty());
    Ok(())
}

#[test]
fn test_rule_violations_are_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let cases = [
        // overlapping blocks
        "modules:\n  - {name: a, base: 200, adaptor: 'sim://axis'}\n  - {name: b, base: 260, adaptor: 'sim://light'}\n",
        // block past max_address
        "modbus: {max_address: 499}\nmodules:\n  - {name: a, base: 450, adaptor: 'sim://axis'}\n",
        // unknown adaptor scheme
        "modules:\n  - {name: a, base: 200, adaptor: 'ftp://axis'}\n",
        // unknown simulated device
        "modules:\n  - {name: a, base: 200, adaptor: 'sim://robot'}\n",
        // schema: base inside the meta block
        "modules:\n  - {name: a, base: 0, adaptor: 'sim://axis'}\n",
    ];
    for case in cases {
        fs::write(&config_path, case)?;
        assert!(
            Config::from_file(&config_path).is_err(),
            "accepted invalid configuration:\n{case}"
        );
    }
    Ok(())
}
