//! Direct (linear) PnP.
//!
//! Coplanar references are solved through the plane-induced homography, general
//! configurations through a normalized 6-point DLT followed by projection onto SO(3).

use glam::{DMat3, DMat4, DVec2, DVec3, DVec4};
use nalgebra::DMatrix;

use crate::camera::CameraIntrinsics;
use crate::homography::{decompose_homography, homography_dlt};
use crate::linalg::{null_vector, project_to_so3, svd3, Pose};
use crate::PoseError;

/// Minimum correspondences for the non-planar DLT.
pub const DLT_MIN_POINTS: usize = 6;

/// Minimum correspondences for the planar solve.
pub const PLANAR_MIN_POINTS: usize = 4;

/// Ratio between the smallest and largest covariance eigenvalue below which a point set is planar.
pub const PLANARITY_RATIO: f64 = 1e-9;

/// Principal frame of a point set: centroid plus eigen-axes sorted by decreasing variance.
struct PrincipalFrame {
    centroid: DVec3,
    axes: DMat3,
    variances: DVec3,
}

fn principal_frame(world: &[DVec3]) -> Result<PrincipalFrame, PoseError> {
    let n = world.len().max(1) as f64;
    let centroid = world.iter().copied().sum::<DVec3>() / n;
    let mut cov = DMat3::ZERO;
    for &p in world {
        let d = p - centroid;
        cov += DMat3::from_cols(d * d.x, d * d.y, d * d.z);
    }
    cov *= 1.0 / n;
    let svd = svd3(&cov)?;
    Ok(PrincipalFrame {
        centroid,
        axes: svd.v,
        variances: svd.s,
    })
}

/// Whether the points lie (numerically) on a plane.
pub fn is_planar(world: &[DVec3]) -> bool {
    if world.len() < 4 {
        return true;
    }
    match principal_frame(world) {
        Ok(frame) => frame.variances.z <= PLANARITY_RATIO * frame.variances.x,
        Err(_) => true,
    }
}

/// Solve PnP directly from world points and normalized image points.
pub fn solve_direct(world: &[DVec3], normalized: &[DVec2]) -> Result<Pose, PoseError> {
    if world.len() != normalized.len() {
        return Err(PoseError::MismatchedLengths {
            left: world.len(),
            right: normalized.len(),
        });
    }
    if is_planar(world) {
        solve_planar(world, normalized)
    } else {
        solve_dlt(world, normalized)
    }
}

fn solve_planar(world: &[DVec3], normalized: &[DVec2]) -> Result<Pose, PoseError> {
    if world.len() < PLANAR_MIN_POINTS {
        return Err(PoseError::InsufficientCorrespondences {
            required: PLANAR_MIN_POINTS,
            actual: world.len(),
        });
    }

    let frame = principal_frame(world)?;
    let e1 = frame.axes.x_axis;
    let e2 = frame.axes.y_axis;
    // plane frame, rows are the in-plane axes and the normal
    let to_plane = DMat3::from_cols(e1, e2, e1.cross(e2)).transpose();

    let plane_points: Vec<DVec2> = world
        .iter()
        .map(|&p| (to_plane * (p - frame.centroid)).truncate())
        .collect();

    let h = homography_dlt(&plane_points, normalized)?;
    let plane_pose = decompose_homography(&h, &CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0))?;

    // x_cam = R_p * B * (p - c) + t_p
    let rotation = plane_pose.rotation * to_plane;
    let translation = plane_pose.translation - rotation * frame.centroid;
    Ok(Pose::new(rotation, translation))
}

fn solve_dlt(world: &[DVec3], normalized: &[DVec2]) -> Result<Pose, PoseError> {
    let n = world.len();
    if n < DLT_MIN_POINTS {
        return Err(PoseError::InsufficientCorrespondences {
            required: DLT_MIN_POINTS,
            actual: n,
        });
    }

    let centroid = world.iter().copied().sum::<DVec3>() / n as f64;
    let mean_dist = world.iter().map(|p| p.distance(centroid)).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        return Err(PoseError::Degenerate("coincident world points"));
    }
    let scale = 3f64.sqrt() / mean_dist;
    let t_world = DMat4::from_cols(
        DVec4::new(scale, 0.0, 0.0, 0.0),
        DVec4::new(0.0, scale, 0.0, 0.0),
        DVec4::new(0.0, 0.0, scale, 0.0),
        (-centroid * scale).extend(1.0),
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, uv)) in world.iter().zip(normalized.iter()).enumerate() {
        let p = (*pw - centroid) * scale;
        let (u, v) = (uv.x, uv.y);
        let r0 = [p.x, p.y, p.z, 1.0, 0.0, 0.0, 0.0, 0.0, -u * p.x, -u * p.y, -u * p.z, -u];
        let r1 = [0.0, 0.0, 0.0, 0.0, p.x, p.y, p.z, 1.0, -v * p.x, -v * p.y, -v * p.z, -v];
        for c in 0..12 {
            a[(2 * i, c)] = r0[c];
            a[(2 * i + 1, c)] = r1[c];
        }
    }

    let sol = null_vector(&a)?;
    let rows = [
        DVec4::new(sol[0], sol[1], sol[2], sol[3]),
        DVec4::new(sol[4], sol[5], sol[6], sol[7]),
        DVec4::new(sol[8], sol[9], sol[10], sol[11]),
    ];
    // P = P_norm * T_world, rows transform as row * T
    let t_world_t = t_world.transpose();
    let p_rows = rows.map(|r| t_world_t * r);

    let m = DMat3::from_cols(
        DVec3::new(p_rows[0].x, p_rows[1].x, p_rows[2].x),
        DVec3::new(p_rows[0].y, p_rows[1].y, p_rows[2].y),
        DVec3::new(p_rows[0].z, p_rows[1].z, p_rows[2].z),
    );
    let mut s = p_rows.iter().map(|row| row.truncate().length()).sum::<f64>() / 3.0;
    if s <= f64::EPSILON {
        return Err(PoseError::Degenerate("vanishing DLT solution"));
    }
    if m.determinant() < 0.0 {
        s = -s;
    }

    let rotation = project_to_so3(&(m * (1.0 / s)))?;
    let translation = DVec3::new(p_rows[0].w, p_rows[1].w, p_rows[2].w) / s;
    Ok(Pose::new(rotation, translation))
}
