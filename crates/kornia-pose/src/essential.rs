//! Relative pose of two calibrated views.
//!
//! Convention: `x2^T E x1 = 0` for normalized points, with `E = [t]x R` and the second
//! camera at pose `(R, t)` relative to the first.

use glam::{DMat3, DVec2, DVec3, DVec4};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::correspondence::Correspondence2d;
use crate::linalg::{hartley_normalize, mat3_from_rows, null_vector, svd3, Pose};
use crate::ransac::{adaptive_iterations, draw_sample, RansacParams};
use crate::triangulation::{depth_in, triangulate_point};
use crate::PoseError;

/// Number of correspondences of the minimal essential matrix sample.
pub const ESSENTIAL_SAMPLE_SIZE: usize = 8;

/// Parameters of [`ransac_essential`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EssentialParams {
    /// RANSAC parameters; `threshold` is the mean two-view reprojection error in pixels.
    ///
    /// The threshold should stay above `max_mean_error`, otherwise the quality gate is
    /// bounded by the inlier test and never rejects a model.
    pub ransac: RansacParams,
    /// A hypothesis is only accepted if its inliers outnumber this multiple of the points
    /// that reproject well but fail the positive-depth check.
    pub depth_failure_ratio: usize,
    /// Maximum accepted mean reprojection error of the final model, in pixels.
    pub max_mean_error: f64,
}

impl Default for EssentialParams {
    fn default() -> Self {
        Self {
            ransac: RansacParams {
                threshold: 8.0,
                min_inliers: ESSENTIAL_SAMPLE_SIZE,
                ..Default::default()
            },
            depth_failure_ratio: 10,
            max_mean_error: 5.0,
        }
    }
}

/// A correspondence triangulated under the estimated relative pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriangulatedPoint {
    /// Homogeneous position in the first camera's frame, `w = 1`. Zero if the rays do not meet.
    pub position: DVec4,
    /// Mean reprojection error over both views in pixels, infinite if not triangulated.
    pub error: f64,
    /// Whether the point was rejected as an outlier.
    pub is_outlier: bool,
}

/// Output of [`ransac_essential`].
#[derive(Debug, Clone)]
pub struct EssentialResult {
    /// Essential matrix with unit Frobenius norm.
    pub essential: DMat3,
    /// Pose of the second camera relative to the first; `|t| = 1`.
    pub pose: Pose,
    /// One entry per input correspondence.
    pub points: Vec<TriangulatedPoint>,
    /// Number of inliers.
    pub inlier_count: usize,
    /// Mean reprojection error over the inliers in pixels.
    pub mean_error: f64,
}

/// Essential matrix from eight or more normalized correspondences.
///
/// The result satisfies the essential constraints and has unit Frobenius norm.
pub fn essential_8point(x1: &[DVec2], x2: &[DVec2]) -> Result<DMat3, PoseError> {
    if x1.len() != x2.len() {
        return Err(PoseError::MismatchedLengths {
            left: x1.len(),
            right: x2.len(),
        });
    }
    let n = x1.len();
    if n < ESSENTIAL_SAMPLE_SIZE {
        return Err(PoseError::InsufficientCorrespondences {
            required: ESSENTIAL_SAMPLE_SIZE,
            actual: n,
        });
    }

    let (a_pts, t1) = hartley_normalize(x1);
    let (b_pts, t2) = hartley_normalize(x2);

    let mut a = DMatrix::<f64>::zeros(n, 9);
    for (i, (p, q)) in a_pts.iter().zip(b_pts.iter()).enumerate() {
        let row = [q.x * p.x, q.x * p.y, q.x, q.y * p.x, q.y * p.y, q.y, p.x, p.y, 1.0];
        for (c, v) in row.iter().enumerate() {
            a[(i, c)] = *v;
        }
    }

    let e = null_vector(&a)?;
    let e_norm = mat3_from_rows(
        DVec3::new(e[0], e[1], e[2]),
        DVec3::new(e[3], e[4], e[5]),
        DVec3::new(e[6], e[7], e[8]),
    );

    let essential = enforce_essential_constraints(&(t2.transpose() * e_norm * t1))?;
    let norm = frobenius(&essential);
    if norm < 1e-12 {
        return Err(PoseError::Degenerate("vanishing essential matrix"));
    }
    Ok(essential * (1.0 / norm))
}

fn frobenius(m: &DMat3) -> f64 {
    m.to_cols_array().iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Project onto the essential manifold: equal leading singular values, zero third.
pub fn enforce_essential_constraints(e: &DMat3) -> Result<DMat3, PoseError> {
    let svd = svd3(e)?;
    let s = 0.5 * (svd.s.x + svd.s.y);
    Ok(svd.u * DMat3::from_diagonal(DVec3::new(s, s, 0.0)) * svd.v.transpose())
}

/// The four `(R, t)` factorizations of an essential matrix.
///
/// Ordered as `(R1, t)`, `(R1, -t)`, `(R2, t)`, `(R2, -t)` with `R1 = U W V^T`,
/// `R2 = U W^T V^T` and `t` the last column of `U`.
pub fn essential_candidates(e: &DMat3) -> Result<[Pose; 4], PoseError> {
    let svd = svd3(&enforce_essential_constraints(e)?)?;
    let w = DMat3::from_cols(DVec3::new(0.0, 1.0, 0.0), DVec3::new(-1.0, 0.0, 0.0), DVec3::Z);

    let proper = |r: DMat3| if r.determinant() < 0.0 { -r } else { r };
    let r1 = proper(svd.u * w * svd.v.transpose());
    let r2 = proper(svd.u * w.transpose() * svd.v.transpose());
    let t = svd.u.z_axis.normalize_or_zero();

    Ok([
        Pose::new(r1, t),
        Pose::new(r1, -t),
        Pose::new(r2, t),
        Pose::new(r2, -t),
    ])
}

/// Whether the correspondence triangulates in front of both cameras under `pose`.
pub fn check_candidate(pose: &Pose, x1: DVec2, x2: DVec2) -> bool {
    match triangulate_point(&Pose::IDENTITY, pose, x1, x2) {
        Some(x) => depth_in(&Pose::IDENTITY, &x) > 0.0 && depth_in(pose, &x) > 0.0,
        None => false,
    }
}

/// Select the factorization that puts every test correspondence in front of both cameras.
///
/// The first candidate passing all tests wins; if none passes the decomposition fails.
pub fn decompose_essential(e: &DMat3, test_points: &[(DVec2, DVec2)]) -> Result<Pose, PoseError> {
    if test_points.is_empty() {
        return Err(PoseError::InsufficientCorrespondences {
            required: 1,
            actual: 0,
        });
    }
    essential_candidates(e)?
        .into_iter()
        .find(|pose| test_points.iter().all(|&(x1, x2)| check_candidate(pose, x1, x2)))
        .ok_or(PoseError::AmbiguousDecomposition)
}

struct Evaluation {
    points: Vec<TriangulatedPoint>,
    inlier_count: usize,
    depth_failures: usize,
    error_sum: f64,
}

fn pixel_error(d: DVec2, k: &CameraIntrinsics) -> f64 {
    DVec2::new(d.x * k.fx, d.y * k.fy).length()
}

fn evaluate(
    pose: &Pose,
    x1: &[DVec2],
    x2: &[DVec2],
    k1: &CameraIntrinsics,
    k2: &CameraIntrinsics,
    threshold: f64,
) -> Evaluation {
    let mut eval = Evaluation {
        points: Vec::with_capacity(x1.len()),
        inlier_count: 0,
        depth_failures: 0,
        error_sum: 0.0,
    };

    for (&a, &b) in x1.iter().zip(x2.iter()) {
        let Some(x) = triangulate_point(&Pose::IDENTITY, pose, a, b) else {
            eval.points.push(TriangulatedPoint {
                position: DVec4::ZERO,
                error: f64::INFINITY,
                is_outlier: true,
            });
            continue;
        };

        let p1 = x.truncate();
        let p2 = pose.transform_point(p1);
        let e1 = pixel_error(p1.truncate() / p1.z - a, k1);
        let e2 = pixel_error(p2.truncate() / p2.z - b, k2);
        let error = 0.5 * (e1 + e2);
        let in_front = p1.z > 0.0 && p2.z > 0.0;

        let reprojects = error < threshold;
        if reprojects && !in_front {
            eval.depth_failures += 1;
        }
        let inlier = reprojects && in_front;
        if inlier {
            eval.inlier_count += 1;
            eval.error_sum += error;
        }
        eval.points.push(TriangulatedPoint {
            position: x,
            error,
            is_outlier: !inlier,
        });
    }
    eval
}

/// Robust relative pose between two calibrated views.
///
/// `reference` holds pixels of the first view and `scene` pixels of the second. Each sample
/// of eight correspondences yields an essential matrix whose factorization is chosen with
/// two sample points; the full set is then triangulated and scored. `is_outlier` is written
/// on every correspondence.
pub fn ransac_essential<R: Rng + ?Sized>(
    correspondences: &mut [Correspondence2d],
    k1: &CameraIntrinsics,
    k2: &CameraIntrinsics,
    params: &EssentialParams,
    rng: &mut R,
) -> Result<EssentialResult, PoseError> {
    let n = correspondences.len();
    if n < ESSENTIAL_SAMPLE_SIZE {
        return Err(PoseError::InsufficientCorrespondences {
            required: ESSENTIAL_SAMPLE_SIZE,
            actual: n,
        });
    }

    let x1: Vec<DVec2> = correspondences
        .iter()
        .map(|c| k1.pixel_to_normalized(c.reference))
        .collect();
    let x2: Vec<DVec2> = correspondences
        .iter()
        .map(|c| k2.pixel_to_normalized(c.scene))
        .collect();
    let threshold = params.ransac.threshold;

    let mut best: Option<(DMat3, Pose, Evaluation)> = None;
    let mut required = params.ransac.max_iterations;
    let mut iterations = 0;

    while iterations < required {
        iterations += 1;

        let sample = draw_sample(rng, n, ESSENTIAL_SAMPLE_SIZE);
        let s1: Vec<DVec2> = sample.iter().map(|&i| x1[i]).collect();
        let s2: Vec<DVec2> = sample.iter().map(|&i| x2[i]).collect();

        let Ok(e) = essential_8point(&s1, &s2) else {
            continue;
        };
        // an unresolved factorization is not a candidate at all
        let Ok(pose) = decompose_essential(&e, &[(s1[0], s2[0]), (s1[1], s2[1])]) else {
            continue;
        };

        let eval = evaluate(&pose, &x1, &x2, k1, k2, threshold);
        let best_count = best.as_ref().map_or(0, |(_, _, b)| b.inlier_count);
        if eval.inlier_count > best_count
            && eval.inlier_count > params.depth_failure_ratio * eval.depth_failures
        {
            log::debug!(
                "essential RANSAC iter {iterations}: {}/{n} inliers, {} depth failures",
                eval.inlier_count,
                eval.depth_failures
            );
            required = required.min(adaptive_iterations(
                params.ransac.confidence,
                eval.inlier_count as f64 / n as f64,
                ESSENTIAL_SAMPLE_SIZE,
                params.ransac.max_iterations,
            ));
            best = Some((e, pose, eval));
        }
    }

    let Some((mut essential, mut pose, mut eval)) = best else {
        return Err(PoseError::NoConsensus);
    };

    // refit over the consensus set, keep it only if it does not lose support
    if eval.inlier_count >= ESSENTIAL_SAMPLE_SIZE {
        let inliers: Vec<usize> = (0..n).filter(|&i| !eval.points[i].is_outlier).collect();
        let s1: Vec<DVec2> = inliers.iter().map(|&i| x1[i]).collect();
        let s2: Vec<DVec2> = inliers.iter().map(|&i| x2[i]).collect();

        let mut by_error = inliers.clone();
        by_error.sort_by(|&a, &b| eval.points[a].error.total_cmp(&eval.points[b].error));
        let tests: Vec<(DVec2, DVec2)> = by_error.iter().take(2).map(|&i| (x1[i], x2[i])).collect();

        if let Ok(e) = essential_8point(&s1, &s2) {
            if let Ok(refit_pose) = decompose_essential(&e, &tests) {
                let refit = evaluate(&refit_pose, &x1, &x2, k1, k2, threshold);
                if refit.inlier_count >= eval.inlier_count
                    && refit.inlier_count > params.depth_failure_ratio * refit.depth_failures
                {
                    essential = e;
                    pose = refit_pose;
                    eval = refit;
                }
            }
        }
    }

    for (c, p) in correspondences.iter_mut().zip(eval.points.iter()) {
        c.is_outlier = p.is_outlier;
    }

    if eval.inlier_count == 0 {
        return Err(PoseError::NoConsensus);
    }
    let mean_error = eval.error_sum / eval.inlier_count as f64;
    if mean_error > params.max_mean_error {
        return Err(PoseError::QualityGate {
            error: mean_error,
            ceiling: params.max_mean_error,
        });
    }
    if eval.inlier_count < params.ransac.min_inliers {
        return Err(PoseError::InsufficientInliers {
            required: params.ransac.min_inliers,
            actual: eval.inlier_count,
        });
    }

    Ok(EssentialResult {
        essential,
        pose,
        points: eval.points,
        inlier_count: eval.inlier_count,
        mean_error,
    })
}
