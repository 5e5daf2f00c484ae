//! Levenberg–Marquardt refinement of a homography over its eight free entries.

use glam::{DMat3, DVec2};
use nalgebra::{DMatrix, DVector};

use super::{Homography, HOMOGRAPHY_SAMPLE_SIZE};
use crate::correspondence::Correspondence2d;
use crate::refine::{levenberg_marquardt, LMParams};
use crate::traits::{Refinement, Refiner};
use crate::PoseError;

// parameters are h11..h32 in row-major order, h33 is fixed to 1
fn to_params(h: &Homography) -> DVector<f64> {
    let rows = h.0.transpose().to_cols_array();
    DVector::from_column_slice(&rows[..8])
}

fn from_params(x: &DVector<f64>) -> Homography {
    let rows = [x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0];
    Homography(DMat3::from_cols_array(&rows).transpose())
}

fn residuals(x: &DVector<f64>, src: &[DVec2], dst: &[DVec2]) -> Option<DVector<f64>> {
    let mut r = DVector::zeros(2 * src.len());
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let w = x[6] * s.x + x[7] * s.y + 1.0;
        if w.abs() < 1e-12 {
            return None;
        }
        r[2 * i] = (x[0] * s.x + x[1] * s.y + x[2]) / w - d.x;
        r[2 * i + 1] = (x[3] * s.x + x[4] * s.y + x[5]) / w - d.y;
    }
    Some(r)
}

fn jacobian(x: &DVector<f64>, src: &[DVec2]) -> DMatrix<f64> {
    let mut j = DMatrix::zeros(2 * src.len(), 8);
    for (i, s) in src.iter().enumerate() {
        let w = x[6] * s.x + x[7] * s.y + 1.0;
        let u = (x[0] * s.x + x[1] * s.y + x[2]) / w;
        let v = (x[3] * s.x + x[4] * s.y + x[5]) / w;

        let ru = 2 * i;
        j[(ru, 0)] = s.x / w;
        j[(ru, 1)] = s.y / w;
        j[(ru, 2)] = 1.0 / w;
        j[(ru, 6)] = -u * s.x / w;
        j[(ru, 7)] = -u * s.y / w;

        let rv = 2 * i + 1;
        j[(rv, 3)] = s.x / w;
        j[(rv, 4)] = s.y / w;
        j[(rv, 5)] = 1.0 / w;
        j[(rv, 6)] = -v * s.x / w;
        j[(rv, 7)] = -v * s.y / w;
    }
    j
}

/// Refine a homography by minimizing the squared transfer error over the inliers.
///
/// Correspondences flagged as outliers are ignored. The returned homography is never worse
/// than the input on the inlier set.
pub fn refine_homography_lm(
    h: &Homography,
    correspondences: &[Correspondence2d],
    params: &LMParams,
) -> Result<Refinement<Homography>, PoseError> {
    let (src, dst): (Vec<DVec2>, Vec<DVec2>) = correspondences
        .iter()
        .filter(|c| !c.is_outlier)
        .map(|c| (c.reference, c.scene))
        .unzip();
    if src.len() < HOMOGRAPHY_SAMPLE_SIZE {
        return Err(PoseError::InsufficientCorrespondences {
            required: HOMOGRAPHY_SAMPLE_SIZE,
            actual: src.len(),
        });
    }

    let x0 = to_params(&h.normalized()?);
    let out = levenberg_marquardt(
        x0,
        params,
        |x| residuals(x, &src, &dst),
        |x, _| jacobian(x, &src),
    )?;

    log::debug!(
        "homography LM: {} iterations, error {:.6e} -> {:.6e}, converged: {}",
        out.iterations,
        out.initial_error,
        out.final_error,
        out.converged
    );

    Ok(Refinement {
        model: from_params(&out.params),
        initial_error: out.initial_error,
        final_error: out.final_error,
        iterations: out.iterations,
        converged: out.converged,
    })
}

/// Levenberg–Marquardt homography refiner.
#[derive(Debug, Clone, Default)]
pub struct HomographyRefiner {
    /// LM parameters.
    pub params: LMParams,
}

impl Refiner for HomographyRefiner {
    type Reference = DVec2;
    type Model = Homography;

    fn refine(
        &self,
        model: &Homography,
        correspondences: &[Correspondence2d],
    ) -> Result<Refinement<Homography>, PoseError> {
        refine_homography_lm(model, correspondences, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn ground_truth() -> Homography {
        Homography(DMat3::from_cols(
            DVec3::new(1.2, 0.05, 1e-4),
            DVec3::new(-0.1, 0.9, -2e-4),
            DVec3::new(30.0, -12.0, 1.0),
        ))
    }

    #[test]
    fn test_params_roundtrip() {
        let h = ground_truth();
        assert_eq!(from_params(&to_params(&h)), h);
    }

    #[test]
    fn test_analytic_jacobian_matches_numeric() {
        let x = to_params(&ground_truth());
        let src = vec![DVec2::new(12.0, -3.0), DVec2::new(-40.0, 25.0)];
        let dst = vec![DVec2::ZERO; 2];
        let j = jacobian(&x, &src);
        for k in 0..8 {
            let h = 1e-6 * x[k].abs().max(1e-3);
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[k] += h;
            xm[k] -= h;
            let (Some(rp), Some(rm)) = (residuals(&xp, &src, &dst), residuals(&xm, &src, &dst))
            else {
                panic!("residuals must be defined");
            };
            for i in 0..4 {
                let numeric = (rp[i] - rm[i]) / (2.0 * h);
                assert!((numeric - j[(i, k)]).abs() < 1e-4 * (1.0 + numeric.abs()));
            }
        }
    }

    #[test]
    fn test_refine_reduces_error() -> Result<(), PoseError> {
        let mut rng = StdRng::seed_from_u64(3);
        let truth = ground_truth();
        let correspondences: Vec<Correspondence2d> = (0..40)
            .map(|_| {
                let p =
                    DVec2::new(rng.random_range(-100.0..100.0), rng.random_range(-100.0..100.0));
                let q = truth.transfer(p).unwrap_or_default();
                let noise = DVec2::new(rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5));
                Correspondence2d::new(p, q + noise)
            })
            .collect();

        let offset = DMat3::from_cols(DVec3::ZERO, DVec3::ZERO, DVec3::new(2.0, -1.5, 0.0));
        let perturbed = Homography(truth.0 + offset);
        let refined = HomographyRefiner::default().refine(&perturbed, &correspondences)?;
        assert!(refined.final_error <= refined.initial_error);
        assert!(refined.final_error < 0.5 * refined.initial_error);
        Ok(())
    }
}
