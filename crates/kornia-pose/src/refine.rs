use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::PoseError;

/// Parameters controlling the Levenberg–Marquardt refiners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LMParams {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative parameter change of an accepted step.
    pub epsilon: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_factor: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            epsilon: 1e-10,
            lambda_init: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

/// Outcome of [`levenberg_marquardt`].
#[derive(Debug, Clone)]
pub(crate) struct LMOutcome {
    pub params: DVector<f64>,
    pub initial_error: f64,
    pub final_error: f64,
    pub iterations: usize,
    pub converged: bool,
}

const LAMBDA_MIN: f64 = 1e-15;
const LAMBDA_MAX: f64 = 1e15;

/// Minimize the sum of squared residuals starting from `x0`.
///
/// `residuals` returns `None` when the parameters are invalid (e.g. points behind the
/// camera); such steps are rejected like steps that increase the error. `jacobian` is only
/// evaluated after an accepted step.
pub(crate) fn levenberg_marquardt<F, J>(
    x0: DVector<f64>,
    params: &LMParams,
    residuals: F,
    jacobian: J,
) -> Result<LMOutcome, PoseError>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
    J: Fn(&DVector<f64>, &DVector<f64>) -> DMatrix<f64>,
{
    let mut x = x0;
    let mut r = residuals(&x).ok_or(PoseError::Degenerate("initial model is not valid"))?;
    let initial_error = r.norm_squared();
    let mut error = initial_error;
    let mut lambda = params.lambda_init;

    let mut jac = jacobian(&x, &r);
    let mut iterations = 0;
    let mut converged = error <= f64::EPSILON;

    while !converged && iterations < params.max_iterations {
        iterations += 1;

        let jt = jac.transpose();
        let mut a = &jt * &jac;
        let b = -(&jt * &r);
        for i in 0..a.nrows() {
            a[(i, i)] += lambda * a[(i, i)].max(1e-12);
        }

        let step = a
            .svd(true, true)
            .solve(&b, 1e-15)
            .map_err(PoseError::SvdFailed)?;

        let x_new = &x + &step;
        let candidate = residuals(&x_new).map(|r_new| {
            let e = r_new.norm_squared();
            (r_new, e)
        });

        match candidate {
            Some((r_new, e_new)) if e_new < error => {
                let relative = step.norm() / (x.norm() + params.epsilon);
                log::debug!(
                    "LM iter {iterations}: accept, error {error:.6e} -> {e_new:.6e}, lambda {lambda:.1e}"
                );
                x = x_new;
                r = r_new;
                error = e_new;
                lambda = (lambda / params.lambda_factor).max(LAMBDA_MIN);
                if relative < params.epsilon || error <= f64::EPSILON {
                    converged = true;
                } else {
                    jac = jacobian(&x, &r);
                }
            }
            _ => {
                log::debug!("LM iter {iterations}: reject, lambda {lambda:.1e}");
                lambda *= params.lambda_factor;
                if lambda > LAMBDA_MAX {
                    // no descent direction left at this damping
                    converged = true;
                }
            }
        }
    }

    Ok(LMOutcome {
        params: x,
        initial_error,
        final_error: error,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fits_exponential() -> Result<(), PoseError> {
        // y = a * exp(b * t)
        let ts: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 2.0 * (0.5 * t).exp()).collect();

        let residuals = |x: &DVector<f64>| {
            Some(DVector::from_iterator(
                ts.len(),
                ts.iter().zip(ys.iter()).map(|(t, y)| x[0] * (x[1] * t).exp() - y),
            ))
        };
        let jacobian = |x: &DVector<f64>, _: &DVector<f64>| {
            DMatrix::from_fn(ts.len(), 2, |i, j| {
                let e = (x[1] * ts[i]).exp();
                if j == 0 {
                    e
                } else {
                    x[0] * ts[i] * e
                }
            })
        };

        let params = LMParams {
            max_iterations: 100,
            ..Default::default()
        };
        let x0 = DVector::from_vec(vec![1.0, 0.1]);
        let out = levenberg_marquardt(x0, &params, residuals, jacobian)?;
        assert!(out.final_error <= out.initial_error);
        assert_relative_eq!(out.params[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(out.params[1], 0.5, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_invalid_start() {
        let out = levenberg_marquardt(
            DVector::from_vec(vec![0.0]),
            &LMParams::default(),
            |_| None,
            |_, _| DMatrix::zeros(1, 1),
        );
        assert!(matches!(out, Err(PoseError::Degenerate(_))));
    }
}
