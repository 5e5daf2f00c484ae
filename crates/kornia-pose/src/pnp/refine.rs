//! Levenberg–Marquardt pose refinement for PnP solutions.

use glam::{DVec2, DVec3};
use nalgebra::{DMatrix, DVector};

use crate::camera::{Camera, CameraIntrinsics};
use crate::correspondence::Correspondence3d;
use crate::linalg::Pose;
use crate::refine::{levenberg_marquardt, LMParams};
use crate::traits::{Refinement, Refiner};
use crate::PoseError;

const H_ROT: f64 = 1e-6; // radians

fn pose_from_params(x: &DVector<f64>) -> Pose {
    Pose::from_rvec(DVec3::new(x[0], x[1], x[2]), DVec3::new(x[3], x[4], x[5]))
}

fn residuals(
    x: &DVector<f64>,
    world: &[DVec3],
    image: &[DVec2],
    intrinsics: &CameraIntrinsics,
) -> Option<DVector<f64>> {
    let pose = pose_from_params(x);
    let mut r = DVector::zeros(2 * world.len());
    for (i, (&pw, uv)) in world.iter().zip(image.iter()).enumerate() {
        // a point behind the camera invalidates the whole step
        let projected = intrinsics.project(pose.transform_point(pw))?;
        r[2 * i] = projected.x - uv.x;
        r[2 * i + 1] = projected.y - uv.y;
    }
    Some(r)
}

fn numeric_jacobian(
    x: &DVector<f64>,
    world: &[DVec3],
    image: &[DVec2],
    intrinsics: &CameraIntrinsics,
) -> DMatrix<f64> {
    let mut j = DMatrix::zeros(2 * world.len(), 6);
    let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
    let h_trans = 1e-6 * t_scale;

    for k in 0..6 {
        // central differences
        let h = if k < 3 { H_ROT } else { h_trans };
        let mut x_plus = x.clone();
        let mut x_minus = x.clone();
        x_plus[k] += h;
        x_minus[k] -= h;
        if let (Some(rp), Some(rm)) = (
            residuals(&x_plus, world, image, intrinsics),
            residuals(&x_minus, world, image, intrinsics),
        ) {
            j.set_column(k, &((rp - rm) / (2.0 * h)));
        }
    }
    j
}

/// Refine a pose by minimizing the squared pixel reprojection error over the inliers.
///
/// Parameters are the Rodrigues vector and the translation. Steps that move a point behind
/// the camera are rejected.
pub fn refine_pose_lm(
    pose: &Pose,
    correspondences: &[Correspondence3d],
    intrinsics: &CameraIntrinsics,
    params: &LMParams,
) -> Result<Refinement<Pose>, PoseError> {
    let (world, image): (Vec<DVec3>, Vec<DVec2>) = correspondences
        .iter()
        .filter(|c| !c.is_outlier)
        .map(|c| (c.reference, c.scene))
        .unzip();
    if world.len() < 3 {
        return Err(PoseError::InsufficientCorrespondences {
            required: 3,
            actual: world.len(),
        });
    }

    let rvec = pose.rvec();
    let x0 = DVector::from_vec(vec![
        rvec.x,
        rvec.y,
        rvec.z,
        pose.translation.x,
        pose.translation.y,
        pose.translation.z,
    ]);

    let out = levenberg_marquardt(
        x0,
        params,
        |x| residuals(x, &world, &image, intrinsics),
        |x, _| numeric_jacobian(x, &world, &image, intrinsics),
    )?;

    log::debug!(
        "pose LM: {} iterations, error {:.6e} -> {:.6e}, converged: {}",
        out.iterations,
        out.initial_error,
        out.final_error,
        out.converged
    );

    Ok(Refinement {
        model: pose_from_params(&out.params),
        initial_error: out.initial_error,
        final_error: out.final_error,
        iterations: out.iterations,
        converged: out.converged,
    })
}

/// Levenberg–Marquardt refiner of a camera's extrinsics; intrinsics stay fixed.
#[derive(Debug, Clone, Default)]
pub struct PoseRefiner {
    /// LM parameters.
    pub params: LMParams,
}

impl Refiner for PoseRefiner {
    type Reference = DVec3;
    type Model = Camera;

    fn refine(
        &self,
        model: &Camera,
        correspondences: &[Correspondence3d],
    ) -> Result<Refinement<Camera>, PoseError> {
        let refined =
            refine_pose_lm(&model.pose(), correspondences, &model.intrinsics, &self.params)?;
        let mut camera = *model;
        camera.set_pose(&refined.model);
        Ok(Refinement {
            model: camera,
            initial_error: refined.initial_error,
            final_error: refined.final_error,
            iterations: refined.iterations,
            converged: refined.converged,
        })
    }
}
