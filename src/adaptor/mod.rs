// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device adaptors
//!
//! A [`DeviceAdaptor`] is the narrow interface a module controller needs from
//! its physical device: connect, initialise, a cached status query, and
//! asynchronous execution with best-effort abort. Real device SDKs live
//! outside this crate and plug in by implementing the trait; the crate ships
//! simulated devices, a camera built on the vision module and a scriptable mock.
//!
//! ## Connection strings
//!
//! Modules select their adaptor with a URL-like string:
//!
//! | String | Adaptor |
//! |--------|---------|
//! | `sim://axis?latency_ms=50` | simulated positioning axis |
//! | `sim://gripper` | simulated electric gripper |
//! | `sim://feeder` | simulated vibration feeder |
//! | `sim://light` | simulated 4-channel LED controller |
//! | `camera://sim?objects=u,v,angle;u,v,angle` | simulated camera with a fixed scene |
//! | `mock://?latency_ms=10&fail_code=0x201` | scriptable mock |
//!
//! Every adaptor also accepts `connect_fail=N` (the first `N` connection
//! attempts fail) and `disconnected=1` (the device never connects).

pub mod handle;
pub mod link;
pub mod mock;
pub mod simulated;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::handshake::layout::{OFFSET_TELEMETRY, PARAM_LEN, TELEMETRY_LEN};
use crate::handshake::ActionKind;
use crate::register::codec;
use crate::vision::{CameraAdaptor, CameraCalibration, SceneObject};

pub use handle::{CancelToken, Completion, ExecutionHandle, ExecutionResult};
pub use link::{DeviceLink, LinkOptions};
pub use mock::{MockAdaptor, MockOptions, PanicMode};
pub use simulated::{SimKind, SimulatedAdaptor};

/// Errors reported by device adaptors
#[derive(Debug, Error)]
pub enum AdaptorError {
    #[error("device is not connected")]
    NotConnected,

    /// Device-specific failure. Codes `>= 0x100` are published verbatim.
    #[error("device failure {code:#06x}: {message}")]
    Device { code: u16, message: String },

    #[error("invalid command parameters: {0}")]
    InvalidParams(String),

    #[error("action aborted")]
    Aborted,

    #[error("calibration error: {0}")]
    Calibration(String),

    #[error("command {0} is not supported by this device")]
    Unsupported(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid adaptor connection string: {0}")]
    InvalidSpec(String),
}

/// Coarse device state published at offset 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum DeviceState {
    #[default]
    Offline = 0,
    Idle = 1,
    Busy = 2,
    Fault = 3,
}

impl DeviceState {
    pub fn word(&self) -> u16 {
        *self as u16
    }
}

/// Last-known device status, as returned by [`DeviceAdaptor::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub connected: bool,
    pub state: DeviceState,
    pub last_error: u16,
}

/// Parameter cells (offsets 21..=29) captured when a command is latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandParams([u16; PARAM_LEN]);

impl CommandParams {
    pub fn new(words: [u16; PARAM_LEN]) -> Self {
        Self(words)
    }

    /// Build from up to nine cells; missing cells are zero.
    pub fn from_words(words: &[u16]) -> Self {
        let mut params = [0u16; PARAM_LEN];
        for (slot, word) in params.iter_mut().zip(words) {
            *slot = *word;
        }
        Self(params)
    }

    pub fn words(&self) -> &[u16; PARAM_LEN] {
        &self.0
    }

    /// Raw cell `index` (0 = offset 21).
    pub fn word(&self, index: usize) -> u16 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// 32-bit parameter `n` (param0 at offsets 21..=22, param1 at 23..=24, ...).
    pub fn param_u32(&self, n: usize) -> u32 {
        codec::u32_at(&self.0, n * 2).unwrap_or(0)
    }

    pub fn param_i32(&self, n: usize) -> i32 {
        self.param_u32(n) as i32
    }

    pub fn param_f32(&self, n: usize) -> f32 {
        f32::from_bits(self.param_u32(n))
    }
}

/// Telemetry cells (offsets 4..=13) produced by a completed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry([u16; TELEMETRY_LEN]);

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn words(&self) -> &[u16; TELEMETRY_LEN] {
        &self.0
    }

    /// Set the cell at block `offset` (4..=13). Offsets outside the
    /// telemetry area are ignored.
    pub fn set(&mut self, offset: u16, value: u16) -> &mut Self {
        if let Some(slot) = offset
            .checked_sub(OFFSET_TELEMETRY)
            .and_then(|index| self.0.get_mut(index as usize))
        {
            *slot = value;
        }
        self
    }

    pub fn set_u32(&mut self, offset: u16, value: u32) -> &mut Self {
        let [low, high] = codec::encode_u32(value);
        self.set(offset, low).set(offset + 1, high)
    }

    pub fn set_i32(&mut self, offset: u16, value: i32) -> &mut Self {
        self.set_u32(offset, value as u32)
    }

    pub fn set_f32(&mut self, offset: u16, value: f32) -> &mut Self {
        self.set_u32(offset, value.to_bits())
    }

    pub fn get(&self, offset: u16) -> u16 {
        offset
            .checked_sub(OFFSET_TELEMETRY)
            .and_then(|index| self.0.get(index as usize))
            .copied()
            .unwrap_or(0)
    }
}

/// Interface between a module controller and its device.
///
/// `query`, `execute` and `abort` must not block: `execute` returns a handle
/// immediately and the result arrives through it. `abort` must make the
/// handle resolve within the module's abort timeout.
#[async_trait]
pub trait DeviceAdaptor: Send + Sync {
    async fn connect(&self) -> Result<(), AdaptorError>;

    /// Idempotent once the device is initialised.
    async fn initialize(&self) -> Result<(), AdaptorError>;

    /// Release the device. Called once when the controller stops.
    async fn disconnect(&self) -> Result<(), AdaptorError> {
        Ok(())
    }

    /// Last-known status; never waits on the device.
    fn query(&self) -> DeviceStatus;

    fn execute(&self, kind: ActionKind, params: CommandParams) -> ExecutionHandle;

    /// Best-effort cancellation of `handle`.
    fn abort(&self, handle: &ExecutionHandle) {
        handle.cancel();
    }

    /// Additional command words accepted by this device.
    fn extended_commands(&self) -> Vec<u16> {
        Vec::new()
    }
}

/// Shared, dynamically dispatched adaptor.
pub type SharedAdaptor = Arc<dyn DeviceAdaptor>;

/// Parsed adaptor connection string.
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptorSpec {
    Simulated { kind: SimKind, link: LinkOptions },
    Camera {
        scene: Vec<SceneObject>,
        link: LinkOptions,
    },
    Mock(MockOptions),
}

impl FromStr for AdaptorSpec {
    type Err = AdaptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| AdaptorError::InvalidSpec(format!("{s}: {e}")))?;
        let link = LinkOptions::from_url(&url)?;
        match url.scheme() {
            "sim" => {
                let kind = url.host_str().unwrap_or_default().parse::<SimKind>()?;
                Ok(AdaptorSpec::Simulated { kind, link })
            }
            "camera" => {
                if url.host_str() != Some("sim") {
                    return Err(AdaptorError::InvalidSpec(format!(
                        "{s}: only the simulated camera source is built in"
                    )));
                }
                let scene = match url.query_pairs().find(|(key, _)| key == "objects") {
                    Some((_, objects)) => SceneObject::parse_list(&objects)?,
                    None => Vec::new(),
                };
                Ok(AdaptorSpec::Camera { scene, link })
            }
            "mock" => Ok(AdaptorSpec::Mock(MockOptions::from_url(&url, link)?)),
            other => Err(AdaptorError::InvalidSpec(format!(
                "{s}: unknown adaptor scheme '{other}'"
            ))),
        }
    }
}

impl AdaptorSpec {
    /// Instantiate the adaptor. `calibration` is only used by camera
    /// adaptors; it is loaded when the adaptor is created and reloaded by the
    /// reload-calibration command.
    pub fn build(&self, calibration: Option<&Path>) -> Result<SharedAdaptor, AdaptorError> {
        Ok(match self {
            AdaptorSpec::Simulated { kind, link } => {
                Arc::new(SimulatedAdaptor::new(*kind, link.clone()))
            }
            AdaptorSpec::Camera { scene, link } => {
                let loaded = match calibration {
                    Some(path) => CameraCalibration::from_file(path)?,
                    None => CameraCalibration::default(),
                };
                Arc::new(CameraAdaptor::simulated(
                    scene.clone(),
                    loaded,
                    calibration.map(Path::to_path_buf),
                    link.clone(),
                ))
            }
            AdaptorSpec::Mock(options) => Arc::new(MockAdaptor::new(options.clone())),
        })
    }
}

/// Parse `spec` and build the adaptor in one step.
pub fn create_adaptor(spec: &str, calibration: Option<&Path>) -> Result<SharedAdaptor, AdaptorError> {
    spec.parse::<AdaptorSpec>()?.build(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_params_decoding() {
        let params = CommandParams::from_words(&[1234, 0, 0xFFFF, 0xFFFF, 0, 0x3FC0]);
        assert_eq!(params.param_u32(0), 1234);
        assert_eq!(params.param_i32(1), -1);
        assert_eq!(params.param_f32(2), 1.5);
        assert_eq!(params.param_u32(4), 0);
        assert_eq!(params.word(8), 0);
    }

    #[test]
    fn test_telemetry_offsets() {
        let mut telemetry = Telemetry::new();
        telemetry.set(4, 1).set_u32(5, 0x0002_0003).set(14, 99).set(3, 99);
        assert_eq!(telemetry.words(), &[1, 3, 2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(telemetry.get(6), 2);
        assert_eq!(telemetry.get(20), 0);
    }

    #[test]
    fn test_parse_connection_strings() {
        assert_eq!(
            "sim://axis?latency_ms=20".parse::<AdaptorSpec>().unwrap(),
            AdaptorSpec::Simulated {
                kind: SimKind::Axis,
                link: LinkOptions {
                    latency: Duration::from_millis(20),
                    ..LinkOptions::default()
                }
            }
        );
        assert!(matches!(
            "camera://sim?objects=10,20,0;30,40,90".parse::<AdaptorSpec>(),
            Ok(AdaptorSpec::Camera { ref scene, .. }) if scene.len() == 2
        ));
        assert!(matches!(
            "mock://?connect_fail=2".parse::<AdaptorSpec>(),
            Ok(AdaptorSpec::Mock(MockOptions { ref link, .. })) if link.connect_failures == 2
        ));
    }

    #[test]
    fn test_reject_bad_connection_strings() {
        assert!("not a url".parse::<AdaptorSpec>().is_err());
        assert!("sim://robot".parse::<AdaptorSpec>().is_err());
        assert!("serial:///dev/ttyUSB0".parse::<AdaptorSpec>().is_err());
        assert!("sim://axis?latency_ms=fast".parse::<AdaptorSpec>().is_err());
        assert!("camera://usb0".parse::<AdaptorSpec>().is_err());
    }
}
