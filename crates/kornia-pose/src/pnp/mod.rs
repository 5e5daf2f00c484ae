mod direct;
mod epnp;
mod ransac;
mod refine;

pub use direct::{is_planar, solve_direct, DLT_MIN_POINTS, PLANARITY_RATIO, PLANAR_MIN_POINTS};
pub use epnp::{solve_epnp, EPnPParams};
pub use ransac::{solve_pnp_ransac, PnPRansac, PnPRansacResult};
pub use refine::{refine_pose_lm, PoseRefiner};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, CameraIntrinsics};
use crate::linalg::Pose;
use crate::traits::ReprojectionModel;
use crate::PoseError;

/// Enumeration of the Perspective-n-Point algorithms available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PnPMethod {
    /// Linear solve: plane homography for coplanar references, 6-point DLT otherwise.
    Direct,
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
}

impl Default for PnPMethod {
    fn default() -> Self {
        Self::EPnP(EPnPParams::default())
    }
}

impl PnPMethod {
    /// Minimal sample size for RANSAC over `world`.
    pub fn sample_size(&self, world: &[DVec3]) -> usize {
        match self {
            Self::EPnP(_) if world.len() == 4 => 4,
            Self::EPnP(_) => 5,
            Self::Direct if is_planar(world) => PLANAR_MIN_POINTS,
            Self::Direct => DLT_MIN_POINTS,
        }
    }
}

/// Result of a PnP solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnPResult {
    /// World-to-camera pose.
    pub pose: Pose,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: DVec3,
    /// Root mean squared pixel reprojection error over the input points.
    pub reproj_rmse: f64,
}

/// Solve PnP from world points and their pixel observations.
pub fn solve_pnp(
    world: &[DVec3],
    image: &[DVec2],
    intrinsics: &CameraIntrinsics,
    method: &PnPMethod,
) -> Result<PnPResult, PoseError> {
    if world.len() != image.len() {
        return Err(PoseError::MismatchedLengths {
            left: world.len(),
            right: image.len(),
        });
    }

    let normalized: Vec<DVec2> = image.iter().map(|&p| intrinsics.pixel_to_normalized(p)).collect();
    let pose = match method {
        PnPMethod::Direct => solve_direct(world, &normalized)?,
        PnPMethod::EPnP(params) => solve_epnp(world, &normalized, params)?,
    };

    let camera = Camera::with_pose(*intrinsics, &pose);
    let sum_sq: f64 = world
        .iter()
        .zip(image.iter())
        .map(|(p, uv)| camera.reprojection_error(p, uv).powi(2))
        .sum();

    Ok(PnPResult {
        pose,
        rvec: pose.rvec(),
        reproj_rmse: (sum_sq / world.len().max(1) as f64).sqrt(),
    })
}
