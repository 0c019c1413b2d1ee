// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Vision modules
//!
//! A camera module runs the same handshake as every other module; this
//! module supplies its calibration model, the pixel → world conversion and the
//! [`CameraAdaptor`] that ties capture and conversion to command 8.

pub mod calibration;
pub mod camera;
pub mod transform;

pub use calibration::CameraCalibration;
pub use camera::{CameraAdaptor, Frame, FrameGrabber, SceneObject, SimulatedGrabber};
pub use transform::{pixel_to_world, world_to_pixel};
