// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Camera module adaptor
//!
//! Command 8 captures a frame and, in detect mode, converts the first detected
//! object to world coordinates on the calibration plane.
//!
//! | Param | Meaning |
//! |-------|---------|
//! | param0 low word | 0 = capture only, 1 = capture and detect |
//!
//! | Telemetry | Meaning |
//! |-----------|---------|
//! | 4 | detected objects |
//! | 5..=6 | first object world X (f32) |
//! | 7..=8 | first object world Y (f32) |
//! | 9..=10 | first object angle in degrees (f32) |
//! | 11 | capture time (ms) |
//! | 12 | processing time (ms) |
//!
//! Command 64 reloads the calibration file. The controller drops Initialized
//! while it runs; a calibration that fails to load raises `CALIBRATION`.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::calibration::CameraCalibration;
use super::transform::pixel_to_world;
use crate::adaptor::{
    AdaptorError, CancelToken, CommandParams, DeviceAdaptor, DeviceLink, DeviceState,
    DeviceStatus, ExecutionHandle, ExecutionResult, LinkOptions, Telemetry,
};
use crate::handshake::command::CMD_RELOAD_CALIBRATION;
use crate::handshake::ActionKind;

/// Device code published when the first object cannot be placed on the
/// calibration plane.
pub const ERR_OFF_PLANE: u16 = 0x0301;

pub const MODE_CAPTURE: u16 = 0;
pub const MODE_DETECT: u16 = 1;

/// An object seen in a frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    pub u: f64,
    pub v: f64,
    /// Orientation in degrees
    pub angle: f64,
}

impl SceneObject {
    /// Parse `u,v,angle;u,v,angle;...`.
    pub fn parse_list(text: &str) -> Result<Vec<SceneObject>, AdaptorError> {
        text.split(';')
            .filter(|item| !item.trim().is_empty())
            .map(|item| {
                let fields = item
                    .split(',')
                    .map(|field| field.trim().parse::<f64>())
                    .collect::<Result<Vec<f64>, _>>()
                    .map_err(|e| AdaptorError::InvalidSpec(format!("object '{item}': {e}")))?;
                match fields.as_slice() {
                    [u, v, angle] => Ok(SceneObject {
                        u: *u,
                        v: *v,
                        angle: *angle,
                    }),
                    [u, v] => Ok(SceneObject {
                        u: *u,
                        v: *v,
                        angle: 0.0,
                    }),
                    _ => Err(AdaptorError::InvalidSpec(format!(
                        "object '{item}' must be u,v[,angle]"
                    ))),
                }
            })
            .collect()
    }
}

/// A captured frame with the objects found in it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub objects: Vec<SceneObject>,
}

/// Image acquisition and detection backend of a camera module.
pub trait FrameGrabber: Send + Sync + fmt::Debug {
    fn grab(&self) -> Result<Frame, AdaptorError>;
}

/// Grabber returning the same scene on every capture.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGrabber {
    scene: Vec<SceneObject>,
}

impl SimulatedGrabber {
    pub fn new(scene: Vec<SceneObject>) -> Self {
        Self { scene }
    }
}

impl FrameGrabber for SimulatedGrabber {
    fn grab(&self) -> Result<Frame, AdaptorError> {
        Ok(Frame {
            objects: self.scene.clone(),
        })
    }
}

#[derive(Debug)]
struct CameraInner {
    link: DeviceLink,
    grabber: Box<dyn FrameGrabber>,
    calibration: RwLock<Arc<CameraCalibration>>,
    calibration_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct CameraAdaptor {
    inner: Arc<CameraInner>,
}

impl CameraAdaptor {
    pub fn new(
        grabber: Box<dyn FrameGrabber>,
        calibration: CameraCalibration,
        calibration_path: Option<PathBuf>,
        options: LinkOptions,
    ) -> Self {
        Self {
            inner: Arc::new(CameraInner {
                link: DeviceLink::new("camera", options),
                grabber,
                calibration: RwLock::new(Arc::new(calibration)),
                calibration_path,
            }),
        }
    }

    pub fn simulated(
        scene: Vec<SceneObject>,
        calibration: CameraCalibration,
        calibration_path: Option<PathBuf>,
        options: LinkOptions,
    ) -> Self {
        Self::new(
            Box::new(SimulatedGrabber::new(scene)),
            calibration,
            calibration_path,
            options,
        )
    }

    /// Calibration currently in use.
    pub fn calibration(&self) -> Result<Arc<CameraCalibration>, AdaptorError> {
        self.inner.calibration()
    }
}

impl CameraInner {
    fn calibration(&self) -> Result<Arc<CameraCalibration>, AdaptorError> {
        self.calibration
            .read()
            .map(|c| Arc::clone(&c))
            .map_err(|_| AdaptorError::Calibration("calibration lock poisoned".into()))
    }

    fn reload_calibration(&self) -> Result<(), AdaptorError> {
        let loaded = match &self.calibration_path {
            Some(path) => CameraCalibration::from_file(path)?,
            None => CameraCalibration::default(),
        };
        let mut current = self
            .calibration
            .write()
            .map_err(|_| AdaptorError::Calibration("calibration lock poisoned".into()))?;
        *current = Arc::new(loaded);
        info!(
            "camera calibration reloaded from {}",
            self.calibration_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        );
        Ok(())
    }

    fn capture(&self, mode: u16) -> Result<Telemetry, AdaptorError> {
        let started = Instant::now();
        let frame = self.grabber.grab()?;
        let capture_ms = started.elapsed().as_millis().min(u16::MAX as u128) as u16;

        let processing = Instant::now();
        let mut telemetry = Telemetry::new();
        if mode == MODE_DETECT {
            telemetry.set(4, frame.objects.len().min(u16::MAX as usize) as u16);
            if let Some(first) = frame.objects.first() {
                let calibration = self.calibration()?;
                let (x, y) = pixel_to_world(first.u, first.v, &calibration).ok_or_else(|| {
                    AdaptorError::Device {
                        code: ERR_OFF_PLANE,
                        message: format!(
                            "pixel ({}, {}) does not reach the work plane",
                            first.u, first.v
                        ),
                    }
                })?;
                debug!(
                    "camera: object at pixel ({:.1}, {:.1}) -> world ({:.3}, {:.3})",
                    first.u, first.v, x, y
                );
                telemetry
                    .set_f32(5, x as f32)
                    .set_f32(7, y as f32)
                    .set_f32(9, first.angle as f32);
            }
        }
        let process_ms = processing.elapsed().as_millis().min(u16::MAX as u128) as u16;
        telemetry.set(11, capture_ms).set(12, process_ms);
        Ok(telemetry)
    }

    async fn run(&self, kind: ActionKind, params: CommandParams, cancel: CancelToken) -> ExecutionResult {
        match kind {
            ActionKind::Primary => {
                let mode = params.word(0);
                if mode != MODE_CAPTURE && mode != MODE_DETECT {
                    return Err(AdaptorError::InvalidParams(format!(
                        "unknown capture mode {mode}"
                    )));
                }
                self.link.set_state(DeviceState::Busy);
                let settled = self.link.settle(&cancel).await;
                self.link.set_state(DeviceState::Idle);
                settled?;
                self.link.require_connected()?;
                self.capture(mode).map(Some)
            }
            ActionKind::ReloadCalibration => {
                self.reload_calibration()?;
                Ok(None)
            }
            ActionKind::Reinitialize => {
                self.link.settle(&cancel).await?;
                self.link.set_initialized(true);
                Ok(None)
            }
            other => Err(AdaptorError::Unsupported(other.word())),
        }
    }
}

#[async_trait]
impl DeviceAdaptor for CameraAdaptor {
    async fn connect(&self) -> Result<(), AdaptorError> {
        self.inner.link.connect()
    }

    async fn initialize(&self) -> Result<(), AdaptorError> {
        self.inner.link.require_connected()?;
        self.inner.calibration()?.validate()?;
        self.inner.link.set_initialized(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdaptorError> {
        self.inner.link.disconnect();
        Ok(())
    }

    fn query(&self) -> DeviceStatus {
        self.inner.link.status()
    }

    fn execute(&self, kind: ActionKind, params: CommandParams) -> ExecutionHandle {
        let id = self.inner.link.next_id();
        if let Err(e) = self.inner.link.require_connected() {
            return ExecutionHandle::resolved(id, Err(e));
        }
        let (handle, completion) = ExecutionHandle::pair(id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.run(kind, params, completion.cancel_token()).await;
            if let Err(e) = &result {
                warn!("camera {kind} #{id} failed: {e}");
            }
            completion.finish(result);
        });
        handle
    }

    fn extended_commands(&self) -> Vec<u16> {
        vec![CMD_RELOAD_CALIBRATION]
    }
}
