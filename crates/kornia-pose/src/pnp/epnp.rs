//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp
//!
//! The solver works on undistorted normalized image coordinates.

use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::linalg::{rigid_alignment, svd3, Pose};
use crate::PoseError;

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EPnPParams {
    /// Singular values below this are treated as zero in least-squares solves.
    pub svd_tolerance: f64,
    /// Gauss-Newton iterations applied to each beta initialization.
    pub gauss_newton_iterations: usize,
}

impl Default for EPnPParams {
    fn default() -> Self {
        Self {
            svd_tolerance: 1e-12,
            gauss_newton_iterations: 5,
        }
    }
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Solve EPnP from world points and normalized image points (`N >= 4`).
pub fn solve_epnp(
    world: &[DVec3],
    normalized: &[DVec2],
    params: &EPnPParams,
) -> Result<Pose, PoseError> {
    let n = world.len();
    if n != normalized.len() {
        return Err(PoseError::MismatchedLengths {
            left: n,
            right: normalized.len(),
        });
    }
    if n < 4 {
        return Err(PoseError::InsufficientCorrespondences { required: 4, actual: n });
    }

    let cw = select_control_points(world)?;
    let alphas = compute_barycentric(world, &cw)?;
    let basis = null_space_basis(&alphas, normalized)?;

    let l = build_l6x10(&basis);
    let rho = DVector::from_iterator(
        6,
        CP_PAIRS.iter().map(|&(i, j)| cw[i].distance_squared(cw[j])),
    );

    let mut best: Option<(f64, Pose)> = None;
    for init in [
        beta_approx_1(&l, &rho, params.svd_tolerance),
        beta_approx_2(&l, &rho, params.svd_tolerance),
        beta_approx_3(&l, &rho, params.svd_tolerance),
    ]
    .into_iter()
    .flatten()
    {
        let betas = gauss_newton(init, &l, &rho, params.gauss_newton_iterations);
        let Ok(pose) = pose_from_betas(&betas, &basis, &alphas, world) else {
            continue;
        };
        let err = normalized_rmse(&pose, world, normalized);
        if best.as_ref().map_or(true, |(e, _)| err < *e) {
            best = Some((err, pose));
        }
    }

    best.map(|(_, pose)| pose)
        .ok_or(PoseError::Degenerate("no EPnP beta initialization succeeded"))
}

fn select_control_points(world: &[DVec3]) -> Result<[DVec3; 4], PoseError> {
    let n = world.len() as f64;
    let c = world.iter().copied().sum::<DVec3>() / n;

    let mut cov = DMat3::ZERO;
    for &p in world {
        let d = p - c;
        cov += DMat3::from_cols(d * d.x, d * d.y, d * d.z);
    }
    cov *= 1.0 / n;

    let svd = svd3(&cov)?;
    let axes = [svd.v.x_axis, svd.v.y_axis, svd.v.z_axis];
    let sigmas = [svd.s.x, svd.s.y, svd.s.z];

    let mut cw = [c; 4];
    for i in 0..3 {
        cw[i + 1] = c + axes[i] * sigmas[i].max(0.0).sqrt();
    }
    Ok(cw)
}

fn compute_barycentric(world: &[DVec3], cw: &[DVec3; 4]) -> Result<Vec<[f64; 4]>, PoseError> {
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);

    // planar sets collapse one control axis, fall back to the pseudo-inverse
    let b_inv = if b.determinant().abs() > 1e-12 {
        b.inverse()
    } else {
        let svd = svd3(&b)?;
        let tol = 1e-12 * svd.s.x.max(1.0);
        let inv = DVec3::new(
            if svd.s.x > tol { 1.0 / svd.s.x } else { 0.0 },
            if svd.s.y > tol { 1.0 / svd.s.y } else { 0.0 },
            if svd.s.z > tol { 1.0 / svd.s.z } else { 0.0 },
        );
        svd.v * DMat3::from_diagonal(inv) * svd.u.transpose()
    };

    Ok(world
        .iter()
        .map(|&p| {
            let l = b_inv * (p - cw[0]);
            [1.0 - l.x - l.y - l.z, l.x, l.y, l.z]
        })
        .collect())
}

/// The four right singular vectors of M with the smallest singular values, smallest first.
///
/// Each entry holds the four control points (camera frame) encoded by that vector.
fn null_space_basis(
    alphas: &[[f64; 4]],
    normalized: &[DVec2],
) -> Result<[[DVec3; 4]; 4], PoseError> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, uv)) in alphas.iter().zip(normalized.iter()).enumerate() {
        for (j, &alpha) in a.iter().enumerate() {
            m[(2 * i, 3 * j)] = alpha;
            m[(2 * i, 3 * j + 2)] = -alpha * uv.x;
            m[(2 * i + 1, 3 * j + 1)] = alpha;
            m[(2 * i + 1, 3 * j + 2)] = -alpha * uv.y;
        }
    }

    let mtm = m.transpose() * &m;
    let svd = mtm.svd(false, true);
    let v_t = svd.v_t.ok_or(PoseError::SvdFailed("missing V^T in EPnP"))?;
    let s = &svd.singular_values;

    let mut order: Vec<usize> = (0..s.len()).collect();
    order.sort_by(|&a, &b| s[a].total_cmp(&s[b]));

    let mut basis = [[DVec3::ZERO; 4]; 4];
    for (k, &row) in order.iter().take(4).enumerate() {
        for (j, cp) in basis[k].iter_mut().enumerate() {
            *cp = DVec3::new(v_t[(row, 3 * j)], v_t[(row, 3 * j + 1)], v_t[(row, 3 * j + 2)]);
        }
    }
    Ok(basis)
}

fn build_l6x10(basis: &[[DVec3; 4]; 4]) -> DMatrix<f64> {
    let dv: Vec<[DVec3; 6]> = basis
        .iter()
        .map(|v| CP_PAIRS.map(|(a, b)| v[a] - v[b]))
        .collect();

    DMatrix::from_fn(6, 10, |j, c| match c {
        0 => dv[0][j].dot(dv[0][j]),
        1 => 2.0 * dv[0][j].dot(dv[1][j]),
        2 => dv[1][j].dot(dv[1][j]),
        3 => 2.0 * dv[0][j].dot(dv[2][j]),
        4 => 2.0 * dv[1][j].dot(dv[2][j]),
        5 => dv[2][j].dot(dv[2][j]),
        6 => 2.0 * dv[0][j].dot(dv[3][j]),
        7 => 2.0 * dv[1][j].dot(dv[3][j]),
        8 => 2.0 * dv[2][j].dot(dv[3][j]),
        _ => dv[3][j].dot(dv[3][j]),
    })
}

fn solve_columns(
    l: &DMatrix<f64>,
    cols: &[usize],
    rho: &DVector<f64>,
    tol: f64,
) -> Option<DVector<f64>> {
    let sub = DMatrix::from_fn(6, cols.len(), |r, c| l[(r, cols[c])]);
    sub.svd(true, true).solve(rho, tol).ok()
}

// betas_approx_1: [B11 B12 B13 B14]
fn beta_approx_1(l: &DMatrix<f64>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let b = solve_columns(l, &[0, 1, 3, 6], rho, tol)?;
    if b[0].abs() < f64::EPSILON {
        return None;
    }
    Some(if b[0] < 0.0 {
        let b0 = (-b[0]).sqrt();
        [b0, -b[1] / b0, -b[2] / b0, -b[3] / b0]
    } else {
        let b0 = b[0].sqrt();
        [b0, b[1] / b0, b[2] / b0, b[3] / b0]
    })
}

// betas_approx_2: [B11 B12 B22]
fn beta_approx_2(l: &DMatrix<f64>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let b = solve_columns(l, &[0, 1, 2], rho, tol)?;
    let (mut b0, b1) = if b[0] < 0.0 {
        ((-b[0]).sqrt(), if b[2] > 0.0 { 0.0 } else { (-b[2]).sqrt() })
    } else {
        (b[0].sqrt(), if b[2] < 0.0 { 0.0 } else { b[2].sqrt() })
    };
    if b[1] < 0.0 {
        b0 = -b0;
    }
    Some([b0, b1, 0.0, 0.0])
}

// betas_approx_3: [B11 B12 B22 B13 B23]
fn beta_approx_3(l: &DMatrix<f64>, rho: &DVector<f64>, tol: f64) -> Option<[f64; 4]> {
    let b = solve_columns(l, &[0, 1, 2, 3, 4], rho, tol)?;
    let (mut b0, b1) = if b[0] < 0.0 {
        ((-b[0]).sqrt(), if b[2] > 0.0 { 0.0 } else { (-b[2]).sqrt() })
    } else {
        (b[0].sqrt(), if b[2] < 0.0 { 0.0 } else { b[2].sqrt() })
    };
    if b[1] < 0.0 {
        b0 = -b0;
    }
    if b0.abs() < f64::EPSILON {
        return None;
    }
    Some([b0, b1, b[3] / b0, 0.0])
}

fn gauss_newton(
    mut betas: [f64; 4],
    l: &DMatrix<f64>,
    rho: &DVector<f64>,
    iterations: usize,
) -> [f64; 4] {
    for _ in 0..iterations {
        let mut a = DMatrix::<f64>::zeros(6, 4);
        let mut r = DVector::<f64>::zeros(6);
        let [b0, b1, b2, b3] = betas;
        for i in 0..6 {
            let row = |c: usize| l[(i, c)];
            a[(i, 0)] = 2.0 * row(0) * b0 + row(1) * b1 + row(3) * b2 + row(6) * b3;
            a[(i, 1)] = row(1) * b0 + 2.0 * row(2) * b1 + row(4) * b2 + row(7) * b3;
            a[(i, 2)] = row(3) * b0 + row(4) * b1 + 2.0 * row(5) * b2 + row(8) * b3;
            a[(i, 3)] = row(6) * b0 + row(7) * b1 + row(8) * b2 + 2.0 * row(9) * b3;
            r[i] = rho[i]
                - (row(0) * b0 * b0
                    + row(1) * b0 * b1
                    + row(2) * b1 * b1
                    + row(3) * b0 * b2
                    + row(4) * b1 * b2
                    + row(5) * b2 * b2
                    + row(6) * b0 * b3
                    + row(7) * b1 * b3
                    + row(8) * b2 * b3
                    + row(9) * b3 * b3);
        }
        let Ok(dx) = a.svd(true, true).solve(&r, 1e-14) else {
            break;
        };
        for (b, d) in betas.iter_mut().zip(dx.iter()) {
            *b += d;
        }
    }
    betas
}

fn pose_from_betas(
    betas: &[f64; 4],
    basis: &[[DVec3; 4]; 4],
    alphas: &[[f64; 4]],
    world: &[DVec3],
) -> Result<Pose, PoseError> {
    let mut cc = [DVec3::ZERO; 4];
    for (beta, v) in betas.iter().zip(basis.iter()) {
        for (c, vj) in cc.iter_mut().zip(v.iter()) {
            *c += *vj * *beta;
        }
    }

    let mut pc: Vec<DVec3> = alphas
        .iter()
        .map(|a| cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3])
        .collect();

    // the null space is sign-ambiguous, put the points in front of the camera
    if pc[0].z < 0.0 {
        pc.iter_mut().for_each(|p| *p = -*p);
    }

    let (rotation, translation) = rigid_alignment(world, &pc)?;
    Ok(Pose::new(rotation, translation))
}

fn normalized_rmse(pose: &Pose, world: &[DVec3], normalized: &[DVec2]) -> f64 {
    let sum_sq: f64 = world
        .iter()
        .zip(normalized.iter())
        .map(|(&p, &uv)| {
            let pc = pose.transform_point(p);
            if pc.z <= 0.0 {
                return f64::INFINITY;
            }
            (pc.truncate() / pc.z).distance_squared(uv)
        })
        .sum();
    (sum_sq / world.len() as f64).sqrt()
}
