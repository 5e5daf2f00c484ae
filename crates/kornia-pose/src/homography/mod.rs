mod refine;
pub use refine::{refine_homography_lm, HomographyRefiner};

use glam::{DMat3, DVec2, DVec3};
use nalgebra::DMatrix;
use rand::Rng;

use crate::camera::CameraIntrinsics;
use crate::correspondence::Correspondence2d;
use crate::linalg::{hartley_normalize, null_vector, project_to_so3, Pose};
use crate::ransac::{adaptive_iterations, draw_valid_sample, RansacParams};
use crate::traits::{Estimate, Estimator, ReprojectionModel};
use crate::PoseError;

/// Number of correspondences of the minimal homography sample.
pub const HOMOGRAPHY_SAMPLE_SIZE: usize = 4;

/// Planar projective transform mapping reference plane coordinates to pixels.
///
/// Stored normalized so that `h33 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub DMat3);

impl Homography {
    /// Map a reference point through the homography.
    ///
    /// Returns `None` if the point maps to infinity.
    pub fn transfer(&self, p: DVec2) -> Option<DVec2> {
        let q = self.0 * p.extend(1.0);
        if q.z.abs() < 1e-12 {
            return None;
        }
        Some(q.truncate() / q.z)
    }

    /// Scale the matrix so that `h33 == 1`.
    pub fn normalized(&self) -> Result<Self, PoseError> {
        let h33 = self.0.z_axis.z;
        if h33.abs() < 1e-12 {
            return Err(PoseError::Degenerate("homography with h33 = 0"));
        }
        Ok(Self(self.0 * (1.0 / h33)))
    }
}

impl ReprojectionModel<DVec2> for Homography {
    fn reprojection_error(&self, reference: &DVec2, scene: &DVec2) -> f64 {
        transfer_error(self, *reference, *scene)
    }
}

/// Pixel distance between `H * reference` and the observed scene point.
pub fn transfer_error(h: &Homography, reference: DVec2, scene: DVec2) -> f64 {
    match h.transfer(reference) {
        Some(p) => p.distance(scene),
        None => f64::INFINITY,
    }
}

fn collinear(a: DVec2, b: DVec2, c: DVec2) -> bool {
    let (ab, ac) = (b - a, c - a);
    let scale = ab.length() * ac.length();
    scale < 1e-12 || ab.perp_dot(ac).abs() < 1e-6 * scale
}

fn any_three_collinear(points: &[DVec2]) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if collinear(points[i], points[j], points[k]) {
                    return true;
                }
            }
        }
    }
    false
}

/// Exact homography from four correspondences.
///
/// Fails on samples with three collinear points in either image or on a singular result.
pub fn homography_4pt(src: &[DVec2; 4], dst: &[DVec2; 4]) -> Result<Homography, PoseError> {
    if any_three_collinear(src) || any_three_collinear(dst) {
        return Err(PoseError::Degenerate("collinear homography sample"));
    }
    homography_dlt(src, dst)
}

/// Least-squares homography from four or more correspondences (normalized DLT).
pub fn homography_dlt(src: &[DVec2], dst: &[DVec2]) -> Result<Homography, PoseError> {
    if src.len() != dst.len() {
        return Err(PoseError::MismatchedLengths {
            left: src.len(),
            right: dst.len(),
        });
    }
    let n = src.len();
    if n < HOMOGRAPHY_SAMPLE_SIZE {
        return Err(PoseError::InsufficientCorrespondences {
            required: HOMOGRAPHY_SAMPLE_SIZE,
            actual: n,
        });
    }

    let (s, t_src) = hartley_normalize(src);
    let (d, t_dst) = hartley_normalize(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (x, y) = (s[i].x, s[i].y);
        let (u, v) = (d[i].x, d[i].y);
        let r0 = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u];
        let r1 = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v];
        for c in 0..9 {
            a[(2 * i, c)] = r0[c];
            a[(2 * i + 1, c)] = r1[c];
        }
    }

    let h = null_vector(&a)?;
    let h_norm = DMat3::from_cols(
        DVec3::new(h[0], h[3], h[6]),
        DVec3::new(h[1], h[4], h[7]),
        DVec3::new(h[2], h[5], h[8]),
    );

    // undo the conditioning: H = T_dst^-1 * H_norm * T_src
    let homography = Homography(t_dst.inverse() * h_norm * t_src).normalized()?;
    if homography.0.determinant().abs() < 1e-8 || !homography.0.is_finite() {
        return Err(PoseError::Degenerate("singular homography"));
    }
    Ok(homography)
}

fn score(h: &Homography, correspondences: &[Correspondence2d], threshold: f64) -> (usize, f64) {
    correspondences
        .iter()
        .map(|c| transfer_error(h, c.reference, c.scene))
        .filter(|&e| e < threshold)
        .fold((0, 0.0), |(count, sum), e| (count + 1, sum + e))
}

/// Estimate a homography with RANSAC and flag outliers in place.
///
/// Hypotheses are ranked by inlier count, ties broken by the summed inlier error. The
/// winner is refit over all its inliers.
pub fn ransac_homography<R: Rng + ?Sized>(
    correspondences: &mut [Correspondence2d],
    params: &RansacParams,
    rng: &mut R,
) -> Result<Estimate<Homography>, PoseError> {
    let n = correspondences.len();
    if n < HOMOGRAPHY_SAMPLE_SIZE {
        return Err(PoseError::InsufficientCorrespondences {
            required: HOMOGRAPHY_SAMPLE_SIZE,
            actual: n,
        });
    }

    let mut best: Option<Homography> = None;
    let mut best_count = 0usize;
    let mut best_score = f64::INFINITY;
    let mut required = params.max_iterations;
    let mut iterations = 0;

    while iterations < required {
        iterations += 1;

        let sample = draw_valid_sample(
            rng,
            n,
            HOMOGRAPHY_SAMPLE_SIZE,
            params.max_sample_retries,
            |idx| {
                let src: Vec<DVec2> = idx.iter().map(|&i| correspondences[i].reference).collect();
                let dst: Vec<DVec2> = idx.iter().map(|&i| correspondences[i].scene).collect();
                !any_three_collinear(&src) && !any_three_collinear(&dst)
            },
        );
        let Some(sample) = sample else {
            log::debug!(
                "homography RANSAC: no non-degenerate sample after {} draws",
                params.max_sample_retries + 1
            );
            break;
        };

        let src = [0, 1, 2, 3].map(|k| correspondences[sample[k]].reference);
        let dst = [0, 1, 2, 3].map(|k| correspondences[sample[k]].scene);
        let Ok(h) = homography_4pt(&src, &dst) else {
            continue;
        };

        let (count, sum) = score(&h, correspondences, params.threshold);
        if count > best_count || (count == best_count && count > 0 && sum < best_score) {
            log::debug!(
                "homography RANSAC iter {iterations}: {count}/{n} inliers, error sum {sum:.3}"
            );
            best = Some(h);
            best_count = count;
            best_score = sum;
            required = required.min(adaptive_iterations(
                params.confidence,
                count as f64 / n as f64,
                HOMOGRAPHY_SAMPLE_SIZE,
                params.max_iterations,
            ));
        }
    }

    let mut model = match best {
        Some(h) if best_count > 0 => h,
        _ => return Err(PoseError::NoConsensus),
    };

    // refit over the consensus set, keep the refit only if it does not lose support
    let (src, dst): (Vec<DVec2>, Vec<DVec2>) = correspondences
        .iter()
        .filter(|c| transfer_error(&model, c.reference, c.scene) < params.threshold)
        .map(|c| (c.reference, c.scene))
        .unzip();
    if let Ok(refit) = homography_dlt(&src, &dst) {
        if score(&refit, correspondences, params.threshold).0 >= best_count {
            model = refit;
        }
    }

    let mut inlier_count = 0;
    let mut sum_sq = 0.0;
    for c in correspondences.iter_mut() {
        let e = transfer_error(&model, c.reference, c.scene);
        c.is_outlier = !(e < params.threshold);
        if !c.is_outlier {
            inlier_count += 1;
            sum_sq += e * e;
        }
    }

    if inlier_count < params.min_inliers {
        return Err(PoseError::InsufficientInliers {
            required: params.min_inliers,
            actual: inlier_count,
        });
    }

    Ok(Estimate {
        model,
        inlier_count,
        iterations,
        rmse: (sum_sq / inlier_count.max(1) as f64).sqrt(),
    })
}

/// RANSAC homography estimator.
#[derive(Debug, Clone, Default)]
pub struct HomographyRansac {
    /// RANSAC parameters.
    pub params: RansacParams,
}

impl Estimator for HomographyRansac {
    type Reference = DVec2;
    type Model = Homography;

    fn estimate<R: Rng + ?Sized>(
        &self,
        correspondences: &mut [Correspondence2d],
        rng: &mut R,
    ) -> Result<Estimate<Homography>, PoseError> {
        ransac_homography(correspondences, &self.params, rng)
    }
}

/// Recover the camera pose from a homography of the reference plane `Z = 0`.
///
/// With `K^-1 H = λ [r1 r2 t]`, the scale is taken from the mean norm of the first two
/// columns and its sign is chosen so the plane lies in front of the camera.
pub fn decompose_homography(
    h: &Homography,
    intrinsics: &CameraIntrinsics,
) -> Result<Pose, PoseError> {
    let m = intrinsics.matrix().inverse() * h.0;
    let (h1, h2, h3) = (m.x_axis, m.y_axis, m.z_axis);

    let norm = 0.5 * (h1.length() + h2.length());
    if norm < 1e-12 {
        return Err(PoseError::Degenerate("homography with vanishing rotation columns"));
    }
    let mut lambda = 1.0 / norm;
    if h3.z < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(r2);
    let rotation = project_to_so3(&DMat3::from_cols(r1, r2, r3))?;

    Ok(Pose::new(rotation, h3 * lambda))
}
