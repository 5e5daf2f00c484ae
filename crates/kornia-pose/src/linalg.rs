use glam::{DMat3, DMat4, DQuat, DVec2, DVec3, DVec4};
use nalgebra::{DMatrix, DVector, Matrix3};

use crate::PoseError;

/// Rigid transform mapping points from the world (reference) frame into the camera frame.
///
/// `x_cam = rotation * x_world + translation`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Rotation from world to camera.
    pub rotation: DMat3,
    /// Translation from world to camera.
    pub translation: DVec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a pose from a rotation matrix and a translation vector.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pose from a Rodrigues axis-angle vector and a translation vector.
    pub fn from_rvec(rvec: DVec3, translation: DVec3) -> Self {
        Self::new(rotation_from_rvec(rvec), translation)
    }

    /// Rodrigues axis-angle representation of the rotation.
    pub fn rvec(&self) -> DVec3 {
        rvec_from_rotation(&self.rotation)
    }

    /// Map a world point into the camera frame.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Compose two transforms, `self ∘ other`: first `other`, then `self`.
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose::new(
            self.rotation * other.rotation,
            self.rotation * other.translation + self.translation,
        )
    }

    /// Inverse transform, mapping camera coordinates back to world coordinates.
    pub fn inverse(&self) -> Pose {
        let rt = self.rotation.transpose();
        Pose::new(rt, -(rt * self.translation))
    }

    /// Position of the camera optical center in world coordinates.
    pub fn camera_center(&self) -> DVec3 {
        -(self.rotation.transpose() * self.translation)
    }

    /// Pack the pose into a 4x4 extrinsic matrix with bottom row `(0, 0, 0, 1)`.
    pub fn to_extrinsics(&self) -> DMat4 {
        DMat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            self.translation.extend(1.0),
        )
    }

    /// Unpack a 4x4 extrinsic matrix.
    pub fn from_extrinsics(extrinsics: &DMat4) -> Pose {
        Pose::new(DMat3::from_mat4(*extrinsics), extrinsics.w_axis.truncate())
    }

    /// Rows of the 3x4 projection matrix `[R | t]`.
    pub fn projection_rows(&self) -> [DVec4; 3] {
        let r = self.rotation;
        let t = self.translation;
        [
            r.row(0).extend(t.x),
            r.row(1).extend(t.y),
            r.row(2).extend(t.z),
        ]
    }
}

/// Skew-symmetric matrix such that `skew(a) * b == a.cross(b)`.
pub fn skew(v: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, v.z, -v.y),
        DVec3::new(-v.z, 0.0, v.x),
        DVec3::new(v.y, -v.x, 0.0),
    )
}

/// Build a 3x3 matrix from its rows.
pub fn mat3_from_rows(r0: DVec3, r1: DVec3, r2: DVec3) -> DMat3 {
    DMat3::from_cols(r0, r1, r2).transpose()
}

/// Rotation matrix from a Rodrigues axis-angle vector.
pub fn rotation_from_rvec(rvec: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(rvec))
}

/// Rodrigues axis-angle vector from a rotation matrix.
pub fn rvec_from_rotation(rotation: &DMat3) -> DVec3 {
    quat_from_rotation(rotation).to_scaled_axis()
}

/// Unit quaternion from a rotation matrix.
pub fn quat_from_rotation(rotation: &DMat3) -> DQuat {
    DQuat::from_mat3(rotation).normalize()
}

/// Rotation matrix from a (not necessarily normalized) quaternion.
pub fn rotation_from_quat(quat: DQuat) -> DMat3 {
    DMat3::from_quat(quat.normalize())
}

/// Divide a homogeneous point by its last coordinate.
///
/// Returns `None` when the point lies at infinity.
pub fn normalize_homogeneous(point: DVec4) -> Option<DVec4> {
    if point.w.abs() < 1e-12 || !point.is_finite() {
        return None;
    }
    Some(point / point.w)
}

/// Hartley normalization: translate the centroid to the origin and scale so the mean
/// distance from it is `sqrt(2)`.
///
/// Returns the normalized points and the similarity `T` with `x_norm = T * x`.
pub fn hartley_normalize(points: &[DVec2]) -> (Vec<DVec2>, DMat3) {
    if points.is_empty() {
        return (Vec::new(), DMat3::IDENTITY);
    }
    let n = points.len() as f64;
    let centroid = points.iter().copied().sum::<DVec2>() / n;
    let mean_dist = points.iter().map(|p| p.distance(centroid)).sum::<f64>() / n;
    let scale = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = DMat3::from_cols(
        DVec3::new(scale, 0.0, 0.0),
        DVec3::new(0.0, scale, 0.0),
        DVec3::new(-scale * centroid.x, -scale * centroid.y, 1.0),
    );
    let normalized = points.iter().map(|&p| (p - centroid) * scale).collect();
    (normalized, t)
}

/// Convert a glam matrix into a nalgebra matrix.
pub fn to_na_mat3(m: &DMat3) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| m.col(j)[i])
}

/// Convert a nalgebra matrix into a glam matrix.
pub fn from_na_mat3(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]),
        DVec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]),
        DVec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]),
    )
}

/// Singular value decomposition of a 3x3 matrix, `m = u * diag(s) * v^T`.
///
/// Singular values are sorted in descending order.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    /// Left singular vectors as columns.
    pub u: DMat3,
    /// Singular values, largest first.
    pub s: DVec3,
    /// Right singular vectors as columns.
    pub v: DMat3,
}

/// Compute the SVD of a 3x3 matrix.
pub fn svd3(m: &DMat3) -> Result<Svd3, PoseError> {
    let svd = to_na_mat3(m).svd(true, true);
    let u = svd.u.ok_or(PoseError::SvdFailed("missing U"))?;
    let v_t = svd.v_t.ok_or(PoseError::SvdFailed("missing V^T"))?;
    let s = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let u_cols = order.map(|i| DVec3::new(u[(0, i)], u[(1, i)], u[(2, i)]));
    let v_cols = order.map(|i| DVec3::new(v_t[(i, 0)], v_t[(i, 1)], v_t[(i, 2)]));

    Ok(Svd3 {
        u: DMat3::from_cols(u_cols[0], u_cols[1], u_cols[2]),
        s: DVec3::new(s[order[0]], s[order[1]], s[order[2]]),
        v: DMat3::from_cols(v_cols[0], v_cols[1], v_cols[2]),
    })
}

/// Closest rotation matrix (Frobenius norm) to `m`, with determinant +1.
pub fn project_to_so3(m: &DMat3) -> Result<DMat3, PoseError> {
    let svd = svd3(m)?;
    let mut u = svd.u;
    if (u * svd.v.transpose()).determinant() < 0.0 {
        u.z_axis = -u.z_axis;
    }
    Ok(u * svd.v.transpose())
}

/// Unit vector spanning the (approximate) null space of `a`.
///
/// Returns the right singular vector associated with the smallest singular value.
/// Systems with fewer rows than columns are padded with zero rows so the complete
/// right-singular basis is available.
pub fn null_vector(a: &DMatrix<f64>) -> Result<DVector<f64>, PoseError> {
    let cols = a.ncols();
    let padded = if a.nrows() < cols {
        let mut m = DMatrix::<f64>::zeros(cols, cols);
        m.view_mut((0, 0), (a.nrows(), cols)).copy_from(a);
        m
    } else {
        a.clone()
    };

    let svd = padded.svd(false, true);
    let v_t = svd.v_t.ok_or(PoseError::SvdFailed("missing V^T"))?;
    let s = &svd.singular_values;

    let idx = (0..s.len())
        .min_by(|&i, &j| s[i].total_cmp(&s[j]))
        .ok_or(PoseError::SvdFailed("empty system"))?;

    Ok(v_t.row(idx).transpose())
}

/// Least-squares rigid alignment (Kabsch) such that `dst ≈ R * src + t`.
pub fn rigid_alignment(src: &[DVec3], dst: &[DVec3]) -> Result<(DMat3, DVec3), PoseError> {
    if src.len() != dst.len() {
        return Err(PoseError::MismatchedLengths {
            left: src.len(),
            right: dst.len(),
        });
    }
    if src.len() < 3 {
        return Err(PoseError::InsufficientCorrespondences {
            required: 3,
            actual: src.len(),
        });
    }

    let n = src.len() as f64;
    let mu_src = src.iter().copied().sum::<DVec3>() / n;
    let mu_dst = dst.iter().copied().sum::<DVec3>() / n;

    // cross-covariance H = sum (dst - mu_dst) (src - mu_src)^T
    let mut h = DMat3::ZERO;
    for (&s, &d) in src.iter().zip(dst.iter()) {
        let (s, d) = (s - mu_src, d - mu_dst);
        h += DMat3::from_cols(d * s.x, d * s.y, d * s.z);
    }

    let svd = svd3(&h)?;
    let sign = (svd.u * svd.v.transpose()).determinant().signum();
    let d = DMat3::from_diagonal(DVec3::new(1.0, 1.0, sign));
    let rotation = svd.u * d * svd.v.transpose();
    let translation = mu_dst - rotation * mu_src;

    Ok((rotation, translation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_mat3_eq(a: &DMat3, b: &DMat3, eps: f64) {
        for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
            assert_relative_eq!(x, y, epsilon = eps);
        }
    }

    #[test]
    fn test_skew_matches_cross() {
        let a = DVec3::new(1.0, -2.0, 0.5);
        let b = DVec3::new(0.3, 4.0, -1.0);
        let c = skew(a) * b;
        let expected = a.cross(b);
        assert_relative_eq!(c.x, expected.x, epsilon = 1e-12);
        assert_relative_eq!(c.y, expected.y, epsilon = 1e-12);
        assert_relative_eq!(c.z, expected.z, epsilon = 1e-12);
    }

    #[test]
    fn test_rvec_roundtrip() {
        let rvec = DVec3::new(0.1, -0.4, 0.25);
        let r = rotation_from_rvec(rvec);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        let back = rvec_from_rotation(&r);
        assert_relative_eq!(back.x, rvec.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, rvec.y, epsilon = 1e-9);
        assert_relative_eq!(back.z, rvec.z, epsilon = 1e-9);
    }

    #[test]
    fn test_pose_extrinsics_and_inverse() {
        let pose = Pose::from_rvec(DVec3::new(0.2, 0.1, -0.3), DVec3::new(1.0, 2.0, 3.0));
        let ext = pose.to_extrinsics();
        assert_eq!(ext.row(3), DVec4::new(0.0, 0.0, 0.0, 1.0));

        let back = Pose::from_extrinsics(&ext);
        assert_mat3_eq(&back.rotation, &pose.rotation, 1e-12);

        let identity = pose.compose(&pose.inverse());
        assert_mat3_eq(&identity.rotation, &DMat3::IDENTITY, 1e-12);
        assert!(identity.translation.length() < 1e-12);

        let center = pose.camera_center();
        assert!(pose.transform_point(center).length() < 1e-12);
    }

    #[test]
    fn test_svd3_sorted_and_reconstructs() -> Result<(), PoseError> {
        let m = mat3_from_rows(
            DVec3::new(0.1, 2.0, -0.3),
            DVec3::new(0.4, -0.1, 5.0),
            DVec3::new(-3.0, 0.5, 0.3),
        );
        let svd = svd3(&m)?;
        assert!(svd.s.x >= svd.s.y && svd.s.y >= svd.s.z);
        let recon = svd.u * DMat3::from_diagonal(svd.s) * svd.v.transpose();
        assert_mat3_eq(&recon, &m, 1e-9);
        Ok(())
    }

    #[test]
    fn test_project_to_so3() -> Result<(), PoseError> {
        let r = rotation_from_rvec(DVec3::new(0.3, 0.2, 0.1));
        let noisy = r + DMat3::from_diagonal(DVec3::splat(1e-3));
        let projected = project_to_so3(&noisy)?;
        assert_relative_eq!(projected.determinant(), 1.0, epsilon = 1e-9);
        assert_mat3_eq(&projected, &r, 1e-2);
        Ok(())
    }

    #[test]
    fn test_null_vector_underdetermined() -> Result<(), PoseError> {
        // two equations in three unknowns: x + y = 0, z = 0
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let v = null_vector(&a)?;
        assert_eq!(v.len(), 3);
        assert!((&a * &v).norm() < 1e-12);
        assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_hartley_normalize() {
        let pts = vec![
            DVec2::new(100.0, 200.0),
            DVec2::new(300.0, 200.0),
            DVec2::new(300.0, 400.0),
            DVec2::new(100.0, 400.0),
        ];
        let (norm, t) = hartley_normalize(&pts);
        let centroid = norm.iter().copied().sum::<DVec2>() / 4.0;
        assert!(centroid.length() < 1e-12);
        let mean = norm.iter().map(|p| p.length()).sum::<f64>() / 4.0;
        assert_relative_eq!(mean, std::f64::consts::SQRT_2, epsilon = 1e-12);
        let mapped = t * pts[2].extend(1.0);
        assert_relative_eq!(mapped.x, norm[2].x, epsilon = 1e-12);
        assert_relative_eq!(mapped.y, norm[2].y, epsilon = 1e-12);
    }

    #[test]
    fn test_rigid_alignment() -> Result<(), PoseError> {
        let pose = Pose::from_rvec(DVec3::new(-0.2, 0.4, 0.1), DVec3::new(0.5, -1.0, 2.0));
        let src = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(1.0, 1.0, 1.0),
        ];
        let dst: Vec<DVec3> = src.iter().map(|&p| pose.transform_point(p)).collect();
        let (r, t) = rigid_alignment(&src, &dst)?;
        assert_mat3_eq(&r, &pose.rotation, 1e-9);
        assert!((t - pose.translation).length() < 1e-9);
        Ok(())
    }
}
