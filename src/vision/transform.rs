// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pixel ↔ world coordinate conversion
//!
//! [`pixel_to_world`] inverts the camera model in four steps:
//!
//! 1. normalise through `K⁻¹`,
//! 2. remove lens distortion by fixed-point iteration of the Brown–Conrady
//!    model,
//! 3. rotate the viewing ray into the world frame (`Xw = Rᵀ·(Xc − t)`),
//! 4. intersect it with the plane `Z = plane_z`.
//!
//! [`world_to_pixel`] is the forward model and is used to check the inverse.

use super::calibration::{CameraCalibration, Matrix3};

/// Iterations of the undistortion fixed point; converges well below a
/// thousandth of a pixel for realistic lenses.
const UNDISTORT_ITERATIONS: usize = 20;

/// Rays closer to parallel with the plane than this never intersect it.
const PARALLEL_EPSILON: f64 = 1e-12;

fn transpose_mul(m: &Matrix3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2],
        m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2],
        m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2],
    ]
}

fn mul(m: &Matrix3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Apply lens distortion to normalised image coordinates.
pub fn distort(x: f64, y: f64, coefficients: &[f64; 5]) -> (f64, f64) {
    let [k1, k2, p1, p2, k3] = *coefficients;
    let r2 = x * x + y * y;
    let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
    let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
    let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
    (x * radial + dx, y * radial + dy)
}

/// Remove lens distortion from normalised image coordinates.
pub fn undistort(xd: f64, yd: f64, coefficients: &[f64; 5]) -> (f64, f64) {
    let [k1, k2, p1, p2, k3] = *coefficients;
    let (mut x, mut y) = (xd, yd);
    for _ in 0..UNDISTORT_ITERATIONS {
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        x = (xd - dx) / radial;
        y = (yd - dy) / radial;
    }
    (x, y)
}

/// World coordinates `(x, y)` on the calibration plane seen at pixel
/// `(u, v)`. `None` when the viewing ray misses the plane.
pub fn pixel_to_world(u: f64, v: f64, calibration: &CameraCalibration) -> Option<(f64, f64)> {
    let yd = (v - calibration.cy()) / calibration.fy();
    let xd = (u - calibration.cx() - calibration.skew() * yd) / calibration.fx();
    let (x, y) = undistort(xd, yd, &calibration.distortion);

    // Camera centre and ray direction in world coordinates
    let t = calibration.translation;
    let centre = transpose_mul(&calibration.rotation, [-t[0], -t[1], -t[2]]);
    let direction = transpose_mul(&calibration.rotation, [x, y, 1.0]);

    if direction[2].abs() < PARALLEL_EPSILON {
        return None;
    }
    let s = (calibration.plane_z - centre[2]) / direction[2];
    if s <= 0.0 || !s.is_finite() {
        return None;
    }
    Some((centre[0] + s * direction[0], centre[1] + s * direction[1]))
}

/// Pixel at which the world point `(x, y, plane_z)` is imaged. `None` for
/// points behind the camera.
pub fn world_to_pixel(x: f64, y: f64, calibration: &CameraCalibration) -> Option<(f64, f64)> {
    let camera = mul(&calibration.rotation, [x, y, calibration.plane_z]);
    let t = calibration.translation;
    let (xc, yc, zc) = (camera[0] + t[0], camera[1] + t[1], camera[2] + t[2]);
    if zc <= 0.0 {
        return None;
    }
    let (xd, yd) = distort(xc / zc, yc / zc, &calibration.distortion);
    Some((
        calibration.fx() * xd + calibration.skew() * yd + calibration.cx(),
        calibration.fy() * yd + calibration.cy(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn bench_calibration() -> CameraCalibration {
        let angle: f64 = 6.981_316_44e-4;
        CameraCalibration {
            intrinsic: [[2400.0, 0.0, 1224.0], [0.0, 2410.0, 1024.0], [0.0, 0.0, 1.0]],
            distortion: [-0.111_665, 0.706_682, 0.000_284_5, 0.000_578_2, 0.0],
            rotation: [
                [angle.cos(), -angle.sin(), 0.0],
                [angle.sin(), angle.cos(), 0.0],
                [0.0, 0.0, 1.0],
            ],
            translation: [-185.168_683, -108.028_248, 654.612_316],
            plane_z: 0.0,
        }
    }

    #[test]
    fn test_default_calibration_is_identity_on_plane() {
        let calibration = CameraCalibration::default();
        let (x, y) = pixel_to_world(12.5, -3.0, &calibration).unwrap();
        assert_abs_diff_eq!(x, 12.5, epsilon = 1e-9);
        assert_abs_diff_eq!(y, -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_principal_point_maps_below_camera() {
        let calibration = bench_calibration();
        let (x, y) = pixel_to_world(1224.0, 1024.0, &calibration).unwrap();
        // Camera centre projected on the plane: -Rᵀ·t
        let centre = transpose_mul(
            &calibration.rotation,
            [185.168_683, 108.028_248, -654.612_316],
        );
        assert_abs_diff_eq!(x, centre[0], epsilon = 1e-6);
        assert_abs_diff_eq!(y, centre[1], epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_of_forward_projection() {
        let calibration = bench_calibration();
        for (wx, wy) in [(0.0, 0.0), (150.0, 80.0), (320.0, 210.0), (-40.0, 300.0)] {
            let (u, v) = world_to_pixel(wx, wy, &calibration).unwrap();
            let (x, y) = pixel_to_world(u, v, &calibration).unwrap();
            assert_abs_diff_eq!(x, wx, epsilon = 1e-3);
            assert_abs_diff_eq!(y, wy, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_plane_height_shifts_intersection() {
        let mut calibration = CameraCalibration::default();
        calibration.plane_z = 0.5;
        // Camera sits at Z = -1; the plane is now 1.5 units away.
        let (x, y) = pixel_to_world(2.0, 1.0, &calibration).unwrap();
        assert_abs_diff_eq!(x, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_ray_has_no_intersection() {
        let mut calibration = CameraCalibration::default();
        // Camera looking along world X: its optical axis is parallel to Z = 0
        calibration.rotation = [[0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]];
        assert!(pixel_to_world(0.0, 0.0, &calibration).is_none());
    }

    #[test]
    fn test_plane_behind_camera() {
        let mut calibration = CameraCalibration::default();
        calibration.plane_z = -2.0;
        assert!(pixel_to_world(0.0, 0.0, &calibration).is_none());
    }
}
