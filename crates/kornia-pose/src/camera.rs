use glam::{DMat3, DMat4, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::linalg::Pose;
use crate::traits::ReprojectionModel;

/// Number of fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

/// Pinhole intrinsics with radial-tangential distortion `[k1, k2, p1, p2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length along x in pixels.
    pub fx: f64,
    /// Focal length along y in pixels.
    pub fy: f64,
    /// Principal point x in pixels.
    pub cx: f64,
    /// Principal point y in pixels.
    pub cy: f64,
    /// Distortion coefficients `[k1, k2, p1, p2]`.
    pub distortion: [f64; 4],
}

impl CameraIntrinsics {
    /// Create distortion-free intrinsics.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: [0.0; 4],
        }
    }

    /// Replace the distortion coefficients.
    pub fn with_distortion(mut self, distortion: [f64; 4]) -> Self {
        self.distortion = distortion;
        self
    }

    /// Build from the packed layout `[fx, fy, cx, cy, k1, k2, p1, p2]`.
    pub fn from_array(values: [f64; 8]) -> Self {
        Self {
            fx: values[0],
            fy: values[1],
            cx: values[2],
            cy: values[3],
            distortion: [values[4], values[5], values[6], values[7]],
        }
    }

    /// Packed layout `[fx, fy, cx, cy, k1, k2, p1, p2]`.
    pub fn to_array(&self) -> [f64; 8] {
        let [k1, k2, p1, p2] = self.distortion;
        [self.fx, self.fy, self.cx, self.cy, k1, k2, p1, p2]
    }

    /// The 3x3 calibration matrix K.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// Whether any distortion coefficient is non-zero.
    pub fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|&d| d != 0.0)
    }

    /// Apply the distortion model to an undistorted normalized point.
    pub fn distort_normalized(&self, p: DVec2) -> DVec2 {
        let [k1, k2, p1, p2] = self.distortion;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        DVec2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Invert the distortion model by fixed-point iteration.
    pub fn undistort_normalized(&self, p: DVec2) -> DVec2 {
        if !self.has_distortion() {
            return p;
        }
        let [k1, k2, p1, p2] = self.distortion;
        let mut u = p;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = u.length_squared();
            let icdist = 1.0 / (1.0 + k1 * r2 + k2 * r2 * r2);
            let dx = 2.0 * p1 * u.x * u.y + p2 * (r2 + 2.0 * u.x * u.x);
            let dy = p1 * (r2 + 2.0 * u.y * u.y) + 2.0 * p2 * u.x * u.y;
            u = DVec2::new((p.x - dx) * icdist, (p.y - dy) * icdist);
        }
        u
    }

    /// Map a pixel to undistorted normalized image coordinates.
    pub fn pixel_to_normalized(&self, pixel: DVec2) -> DVec2 {
        let distorted = DVec2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy);
        self.undistort_normalized(distorted)
    }

    /// Map undistorted normalized coordinates to a pixel, applying distortion.
    pub fn normalized_to_pixel(&self, p: DVec2) -> DVec2 {
        let d = self.distort_normalized(p);
        DVec2::new(self.fx * d.x + self.cx, self.fy * d.y + self.cy)
    }

    /// Project a point expressed in the camera frame.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, p_cam: DVec3) -> Option<DVec2> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(self.normalized_to_pixel(p_cam.truncate() / p_cam.z))
    }
}

/// A calibrated camera: fixed intrinsics plus a world-to-camera extrinsic transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Intrinsic calibration.
    pub intrinsics: CameraIntrinsics,
    /// World-to-camera transform, bottom row `(0, 0, 0, 1)`.
    pub extrinsics: DMat4,
}

impl Camera {
    /// Camera at the world origin looking down +Z.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            extrinsics: DMat4::IDENTITY,
        }
    }

    /// Camera with the given pose.
    pub fn with_pose(intrinsics: CameraIntrinsics, pose: &Pose) -> Self {
        Self {
            intrinsics,
            extrinsics: pose.to_extrinsics(),
        }
    }

    /// Current world-to-camera pose.
    pub fn pose(&self) -> Pose {
        Pose::from_extrinsics(&self.extrinsics)
    }

    /// Overwrite the extrinsics with a new pose.
    pub fn set_pose(&mut self, pose: &Pose) {
        self.extrinsics = pose.to_extrinsics();
    }

    /// Project a world point to pixels.
    pub fn project_world(&self, point: DVec3) -> Option<DVec2> {
        self.intrinsics.project(self.pose().transform_point(point))
    }
}

impl ReprojectionModel<DVec3> for Camera {
    fn reprojection_error(&self, reference: &DVec3, scene: &DVec2) -> f64 {
        match self.project_world(*reference) {
            Some(projected) => projected.distance(*scene),
            None => f64::INFINITY,
        }
    }
}
