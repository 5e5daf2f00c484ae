use glam::{DVec3, DVec4};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ransac::draw_valid_sample;
use crate::PoseError;

/// Parameters of [`fit_plane_ransac`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneFitParams {
    /// Maximum point-to-plane distance of an inlier.
    pub distance_threshold: f64,
    /// Hypotheses drawn per input point.
    pub iterations_per_point: usize,
    /// Redraws allowed for a duplicate or collinear triple.
    pub max_sample_retries: usize,
}

impl Default for PlaneFitParams {
    fn default() -> Self {
        Self {
            distance_threshold: 1.0,
            iterations_per_point: 100,
            max_sample_retries: 100,
        }
    }
}

/// A plane fitted to a point set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneFit {
    /// `(n, d)` with unit normal `n` such that `n·p + d = 0` on the plane.
    pub plane: DVec4,
    /// Indices of the points within the distance threshold.
    pub inliers: Vec<usize>,
    /// Mean of the inlier points.
    pub centroid: DVec3,
    /// Mean absolute point-to-plane distance of the inliers.
    pub mean_distance: f64,
}

/// Signed distance from a point to a plane with unit normal.
pub fn signed_distance(plane: &DVec4, p: DVec3) -> f64 {
    plane.truncate().dot(p) + plane.w
}

fn plane_from_points(a: DVec3, b: DVec3, c: DVec3) -> Option<DVec4> {
    let normal = (b - a).cross(c - a);
    let len = normal.length();
    let scale = (b - a).length() * (c - a).length();
    if scale < 1e-12 || len < 1e-9 * scale {
        return None;
    }
    let n = normal / len;
    Some(n.extend(-n.dot(a)))
}

fn consensus(plane: &DVec4, points: &[DVec3], threshold: f64) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum = 0.0;
    for (i, &p) in points.iter().enumerate() {
        let d = signed_distance(plane, p).abs();
        if d <= threshold {
            inliers.push(i);
            sum += d;
        }
    }
    let mean = if inliers.is_empty() { f64::INFINITY } else { sum / inliers.len() as f64 };
    (inliers, mean)
}

/// Fit a plane to noisy 3D points with RANSAC.
///
/// Draws `points.len() * iterations_per_point` triples, ranks planes by inlier count and
/// breaks ties by the mean inlier distance.
pub fn fit_plane_ransac<R: Rng + ?Sized>(
    points: &[DVec3],
    params: &PlaneFitParams,
    rng: &mut R,
) -> Result<PlaneFit, PoseError> {
    let n = points.len();
    if n < 3 {
        return Err(PoseError::InsufficientCorrespondences { required: 3, actual: n });
    }

    let mut best: Option<(DVec4, usize, f64)> = None;
    let iterations = n.saturating_mul(params.iterations_per_point);

    for _ in 0..iterations {
        let sample = draw_valid_sample(rng, n, 3, params.max_sample_retries, |s| {
            plane_from_points(points[s[0]], points[s[1]], points[s[2]]).is_some()
        });
        let Some(sample) = sample else {
            break;
        };
        let [a, b, c] = [sample[0], sample[1], sample[2]].map(|i| points[i]);
        let Some(plane) = plane_from_points(a, b, c) else {
            continue;
        };

        let (inliers, mean) = consensus(&plane, points, params.distance_threshold);
        let count = inliers.len();
        let improves = match best {
            None => true,
            Some((_, c, m)) => count > c || (count == c && mean < m),
        };
        if improves {
            best = Some((plane, count, mean));
        }
    }

    let (plane, _, _) = best.ok_or(PoseError::Degenerate("all point triples are collinear"))?;
    let (inliers, mean_distance) = consensus(&plane, points, params.distance_threshold);
    let centroid = inliers.iter().map(|&i| points[i]).sum::<DVec3>() / inliers.len().max(1) as f64;

    log::debug!("plane fit: {}/{n} inliers, mean distance {mean_distance:.4}", inliers.len());

    Ok(PlaneFit {
        plane,
        inliers,
        centroid,
        mean_distance,
    })
}
