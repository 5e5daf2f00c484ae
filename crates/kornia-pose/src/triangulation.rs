use glam::{DVec2, DVec3, DVec4};
use nalgebra::DMatrix;

use crate::linalg::{normalize_homogeneous, null_vector, Pose};
use crate::PoseError;

/// Linear (DLT) triangulation of one point observed by two cameras.
///
/// `x1`, `x2` are normalized image coordinates in cameras with world-to-camera poses
/// `pose1`, `pose2`. Returns the homogeneous world point with `w = 1`, or `None` when the
/// solution lies at infinity.
pub fn triangulate_point(pose1: &Pose, pose2: &Pose, x1: DVec2, x2: DVec2) -> Option<DVec4> {
    let mut a = DMatrix::<f64>::zeros(6, 4);
    for (view, (pose, x)) in [(pose1, x1), (pose2, x2)].into_iter().enumerate() {
        let [p0, p1, p2] = pose.projection_rows();
        // rows of skew([x, y, 1]) * P
        let rows = [p2 * x.y - p1, p0 - p2 * x.x, p1 * x.x - p0 * x.y];
        for (r, row) in rows.iter().enumerate() {
            for c in 0..4 {
                a[(3 * view + r, c)] = row[c];
            }
        }
    }

    let v = null_vector(&a).ok()?;
    normalize_homogeneous(DVec4::new(v[0], v[1], v[2], v[3]))
}

/// Triangulate normalized correspondences between a camera at the origin and a camera at `pose`.
pub fn triangulate_relative(
    pose: &Pose,
    pairs: &[(DVec2, DVec2)],
) -> Result<Vec<Option<DVec4>>, PoseError> {
    if pairs.is_empty() {
        return Err(PoseError::InsufficientCorrespondences {
            required: 1,
            actual: 0,
        });
    }
    Ok(pairs
        .iter()
        .map(|&(x1, x2)| triangulate_point(&Pose::IDENTITY, pose, x1, x2))
        .collect())
}

/// Depth of a homogeneous point in the frame of the camera at `pose`.
pub fn depth_in(pose: &Pose, point: &DVec4) -> f64 {
    let p = DVec3::new(point.x, point.y, point.z) / point.w;
    pose.transform_point(p).z
}
