//! RANSAC-based robust wrapper for PnP solvers.

use glam::{DVec2, DVec3};
use rand::Rng;

use super::{solve_pnp, PnPMethod, PnPResult};
use crate::camera::{Camera, CameraIntrinsics};
use crate::correspondence::Correspondence3d;
use crate::linalg::Pose;
use crate::ransac::{adaptive_iterations, draw_sample, RansacParams};
use crate::traits::{Estimate, Estimator, ReprojectionModel};
use crate::PoseError;

/// Default minimum number of inliers of a PnP model.
pub const PNP_MIN_INLIERS: usize = 5;

/// RANSAC result for PnP.
#[derive(Debug, Clone)]
pub struct PnPRansacResult {
    /// Best pose, refit over all inliers.
    pub pose: PnPResult,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
    /// Number of hypotheses evaluated.
    pub iterations: usize,
}

fn all_in_front(pose: &Pose, world: &[DVec3]) -> bool {
    world.iter().all(|&p| pose.transform_point(p).z > 0.0)
}

fn classify(
    camera: &Camera,
    correspondences: &[Correspondence3d],
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum = 0.0;
    for (i, c) in correspondences.iter().enumerate() {
        let e = camera.reprojection_error(&c.reference, &c.scene);
        if e < threshold {
            inliers.push(i);
            sum += e;
        }
    }
    (inliers, sum)
}

/// Solve PnP robustly with RANSAC around a base method.
///
/// - The minimal sample is 5 points for EPnP (4 when only 4 points exist), 4 for
///   direct planar and 6 for direct non-planar solves.
/// - Hypotheses with a point of the sample behind the camera are discarded.
/// - Iterations adapt from the current inlier ratio and the desired confidence.
/// - The winner is refit over all its inliers; `is_outlier` is written on every
///   correspondence.
/// - Fewer than `max(params.min_inliers, PNP_MIN_INLIERS)` final inliers is a failure.
pub fn solve_pnp_ransac<R: Rng + ?Sized>(
    correspondences: &mut [Correspondence3d],
    intrinsics: &CameraIntrinsics,
    method: &PnPMethod,
    params: &RansacParams,
    rng: &mut R,
) -> Result<PnPRansacResult, PoseError> {
    let n = correspondences.len();
    let min_inliers = params.min_inliers.max(PNP_MIN_INLIERS);
    let world: Vec<DVec3> = correspondences.iter().map(|c| c.reference).collect();
    let image: Vec<DVec2> = correspondences.iter().map(|c| c.scene).collect();

    let sample_size = method.sample_size(&world);
    if n < sample_size {
        return Err(PoseError::InsufficientCorrespondences {
            required: sample_size,
            actual: n,
        });
    }

    let mut best: Option<Pose> = None;
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_score = f64::INFINITY;
    let mut required = params.max_iterations;
    let mut iterations = 0;

    while iterations < required {
        iterations += 1;

        let sample = draw_sample(rng, n, sample_size);
        let w_min: Vec<DVec3> = sample.iter().map(|&i| world[i]).collect();
        let i_min: Vec<DVec2> = sample.iter().map(|&i| image[i]).collect();

        let Ok(candidate) = solve_pnp(&w_min, &i_min, intrinsics, method) else {
            continue;
        };
        if !all_in_front(&candidate.pose, &w_min) {
            continue;
        }

        let camera = Camera::with_pose(*intrinsics, &candidate.pose);
        let (inliers, score) = classify(&camera, correspondences, params.threshold);
        let count = inliers.len();
        let best_count = best_inliers.len();
        if count > best_count || (count == best_count && count > 0 && score < best_score) {
            log::debug!("PnP RANSAC iter {iterations}: {count}/{n} inliers");
            best = Some(candidate.pose);
            best_inliers = inliers;
            best_score = score;
            required = required.min(adaptive_iterations(
                params.confidence,
                count as f64 / n as f64,
                sample_size,
                params.max_iterations,
            ));
        }
    }

    let mut pose = match best {
        Some(p) if !best_inliers.is_empty() => p,
        _ => return Err(PoseError::NoConsensus),
    };

    if best_inliers.len() >= sample_size {
        let w_all: Vec<DVec3> = best_inliers.iter().map(|&i| world[i]).collect();
        let i_all: Vec<DVec2> = best_inliers.iter().map(|&i| image[i]).collect();
        if let Ok(refit) = solve_pnp(&w_all, &i_all, intrinsics, method) {
            let camera = Camera::with_pose(*intrinsics, &refit.pose);
            let (inliers, _) = classify(&camera, correspondences, params.threshold);
            if inliers.len() >= best_inliers.len() {
                pose = refit.pose;
                best_inliers = inliers;
            }
        }
    }

    let camera = Camera::with_pose(*intrinsics, &pose);
    let mut sum_sq = 0.0;
    for (i, c) in correspondences.iter_mut().enumerate() {
        let inlier = best_inliers.binary_search(&i).is_ok();
        c.is_outlier = !inlier;
        if inlier {
            sum_sq += camera.reprojection_error(&c.reference, &c.scene).powi(2);
        }
    }

    if best_inliers.len() < min_inliers {
        return Err(PoseError::InsufficientInliers {
            required: min_inliers,
            actual: best_inliers.len(),
        });
    }

    Ok(PnPRansacResult {
        pose: PnPResult {
            pose,
            rvec: pose.rvec(),
            reproj_rmse: (sum_sq / best_inliers.len() as f64).sqrt(),
        },
        inliers: best_inliers,
        iterations,
    })
}

/// RANSAC PnP estimator producing a posed [`Camera`].
#[derive(Debug, Clone)]
pub struct PnPRansac {
    /// Intrinsics of the camera observing the scene points.
    pub intrinsics: CameraIntrinsics,
    /// Base solver run on each minimal sample.
    pub method: PnPMethod,
    /// RANSAC parameters.
    pub params: RansacParams,
}

impl PnPRansac {
    /// EPnP-based estimator requiring at least [`PNP_MIN_INLIERS`] inliers.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            method: PnPMethod::default(),
            params: RansacParams {
                min_inliers: PNP_MIN_INLIERS,
                ..Default::default()
            },
        }
    }

    /// Use a different base solver.
    pub fn with_method(mut self, method: PnPMethod) -> Self {
        self.method = method;
        self
    }
}

impl Estimator for PnPRansac {
    type Reference = DVec3;
    type Model = Camera;

    fn estimate<R: Rng + ?Sized>(
        &self,
        correspondences: &mut [Correspondence3d],
        rng: &mut R,
    ) -> Result<Estimate<Camera>, PoseError> {
        let result = solve_pnp_ransac(
            correspondences,
            &self.intrinsics,
            &self.method,
            &self.params,
            rng,
        )?;
        Ok(Estimate {
            model: Camera::with_pose(self.intrinsics, &result.pose.pose),
            inlier_count: result.inliers.len(),
            iterations: result.iterations,
            rmse: result.pose.reproj_rmse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_ransac_rejects_too_few() {
        let mut list = vec![Correspondence3d::new(DVec3::ZERO, DVec2::ZERO); 3];
        let mut rng = StdRng::seed_from_u64(0);
        let res = solve_pnp_ransac(
            &mut list,
            &CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0),
            &PnPMethod::default(),
            &RansacParams::default(),
            &mut rng,
        );
        assert!(matches!(res, Err(PoseError::InsufficientCorrespondences { .. })));
    }

    #[test]
    fn test_ransac_four_exact_points_is_not_enough() {
        let k = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
        let truth = Pose::from_rvec(DVec3::new(0.1, 0.05, 0.0), DVec3::new(0.2, -0.1, 6.0));
        let camera = Camera::with_pose(k, &truth);
        let mut list: Vec<Correspondence3d> = [
            DVec3::new(-1.0, -1.0, 0.3),
            DVec3::new(1.0, -0.8, -0.2),
            DVec3::new(0.9, 1.1, 0.5),
            DVec3::new(-1.2, 0.7, -0.4),
        ]
        .iter()
        .map(|&p| Correspondence3d::new(p, camera.project_world(p).unwrap_or_default()))
        .collect();

        let mut rng = StdRng::seed_from_u64(0);
        let params = RansacParams::default();
        let res = solve_pnp_ransac(&mut list, &k, &PnPMethod::default(), &params, &mut rng);
        assert!(matches!(
            res,
            Err(PoseError::InsufficientInliers { required: PNP_MIN_INLIERS, .. })
                | Err(PoseError::NoConsensus)
        ));
    }

    #[test]
    fn test_ransac_clean_data() -> Result<(), PoseError> {
        let k = CameraIntrinsics::new(600.0, 600.0, 320.0, 240.0);
        let truth = Pose::from_rvec(DVec3::new(0.05, -0.1, 0.02), DVec3::new(0.0, 0.0, 8.0));
        let camera = Camera::with_pose(k, &truth);
        let mut list: Vec<Correspondence3d> = (0..12)
            .map(|i| {
                let a = i as f64 * 0.7;
                let p = DVec3::new(a.cos() * 2.0, a.sin() * 1.5, (i % 3) as f64 - 1.0);
                Correspondence3d::new(p, camera.project_world(p).unwrap_or_default())
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(1);
        let est = PnPRansac::new(k).estimate(&mut list, &mut rng)?;
        assert_eq!(est.inlier_count, 12);
        assert!(est.rmse < 1e-6);
        assert!(list.iter().all(|c| !c.is_outlier));
        assert!((est.model.pose().translation - truth.translation).length() < 1e-6);
        Ok(())
    }
}
