// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Camera calibration model
//!
//! The calibration follows the pinhole camera model with Brown–Conrady
//! distortion:
//!
//! - `intrinsic` is the 3×3 camera matrix `K` (`fx`, `fy`, `cx`, `cy`, skew),
//! - `distortion` holds `[k1, k2, p1, p2, k3]`,
//! - `rotation` and `translation` map world points into the camera frame:
//!   `Xc = R·Xw + t`,
//! - `plane_z` is the world height of the work surface objects lie on.
//!
//! Calibrations are stored as YAML:
//!
//! ```yaml
//! intrinsic: [[2400.0, 0.0, 1224.0], [0.0, 2400.0, 1024.0], [0.0, 0.0, 1.0]]
//! distortion: [-0.11, 0.7, 0.0003, 0.0006, 0.0]
//! rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//! translation: [-185.0, -108.0, 654.6]
//! plane_z: 0.0
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adaptor::AdaptorError;

pub type Matrix3 = [[f64; 3]; 3];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub intrinsic: Matrix3,
    #[serde(default)]
    pub distortion: [f64; 5],
    pub rotation: Matrix3,
    pub translation: [f64; 3],
    #[serde(default)]
    pub plane_z: f64,
}

impl Default for CameraCalibration {
    /// Unit focal length camera one unit above the `Z = 0` plane, looking
    /// down the Z axis: pixel `(u, v)` maps to world `(u, v)`.
    fn default() -> Self {
        Self {
            intrinsic: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            distortion: [0.0; 5],
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 1.0],
            plane_z: 0.0,
        }
    }
}

impl CameraCalibration {
    /// Load and check a YAML calibration file.
    pub fn from_file(path: &Path) -> Result<Self, AdaptorError> {
        let text = fs::read_to_string(path).map_err(|e| {
            AdaptorError::Calibration(format!("cannot read {}: {e}", path.display()))
        })?;
        let calibration: CameraCalibration = serde_yml::from_str(&text).map_err(|e| {
            AdaptorError::Calibration(format!("cannot parse {}: {e}", path.display()))
        })?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), AdaptorError> {
        let text = serde_yml::to_string(self)
            .map_err(|e| AdaptorError::Calibration(format!("cannot serialise: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic[1][2]
    }

    pub fn skew(&self) -> f64 {
        self.intrinsic[0][1]
    }

    /// Reject calibrations that cannot be inverted.
    pub fn validate(&self) -> Result<(), AdaptorError> {
        let finite = self
            .intrinsic
            .iter()
            .chain(self.rotation.iter())
            .flatten()
            .chain(self.distortion.iter())
            .chain(self.translation.iter())
            .chain(std::iter::once(&self.plane_z))
            .all(|v| v.is_finite());
        if !finite {
            return Err(AdaptorError::Calibration(
                "calibration contains non-finite values".into(),
            ));
        }
        if self.fx().abs() < f64::EPSILON || self.fy().abs() < f64::EPSILON {
            return Err(AdaptorError::Calibration(
                "focal lengths must be non-zero".into(),
            ));
        }
        let det = determinant(&self.rotation);
        if (det - 1.0).abs() > 1e-3 {
            return Err(AdaptorError::Calibration(format!(
                "rotation matrix is not a proper rotation (det = {det:.6})"
            )));
        }
        Ok(())
    }
}

fn determinant(m: &Matrix3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CameraCalibration::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.yaml");
        let mut calibration = CameraCalibration::default();
        calibration.intrinsic[0][0] = 2400.0;
        calibration.intrinsic[1][1] = 2410.0;
        calibration.plane_z = 12.5;
        calibration.save_to_file(&path).unwrap();
        assert_eq!(CameraCalibration::from_file(&path).unwrap(), calibration);
    }

    #[test]
    fn test_reject_bad_rotation() {
        let mut calibration = CameraCalibration::default();
        calibration.rotation[2][2] = 2.0;
        assert!(matches!(
            calibration.validate(),
            Err(AdaptorError::Calibration(_))
        ));
    }

    #[test]
    fn test_missing_file_is_calibration_error() {
        assert!(matches!(
            CameraCalibration::from_file(Path::new("/nonexistent/camera.yaml")),
            Err(AdaptorError::Calibration(_))
        ));
    }
}
