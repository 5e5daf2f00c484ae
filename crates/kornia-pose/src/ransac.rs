use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Parameters shared by the RANSAC estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RansacParams {
    /// Maximum number of hypotheses.
    pub max_iterations: usize,
    /// Inlier threshold on the reprojection error, in pixels.
    pub threshold: f64,
    /// Probability that at least one sample is outlier-free; `>= 1.0` disables
    /// adaptive early termination.
    pub confidence: f64,
    /// Minimum number of inliers of the final model.
    pub min_inliers: usize,
    /// Number of redraws allowed for a degenerate minimal sample.
    pub max_sample_retries: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            threshold: 3.0,
            confidence: 0.99,
            min_inliers: 4,
            max_sample_retries: 100,
        }
    }
}

/// Number of hypotheses needed to draw one outlier-free sample with the given confidence.
///
/// Computes `log(1 - confidence) / log(1 - ratio^sample_size)` clamped to `[1, max_iterations]`.
pub fn adaptive_iterations(
    confidence: f64,
    inlier_ratio: f64,
    sample_size: usize,
    max_iterations: usize,
) -> usize {
    if confidence >= 1.0 || max_iterations == 0 {
        return max_iterations;
    }
    let w = inlier_ratio.clamp(0.0, 1.0);
    let ws = w.powi(sample_size as i32);
    if ws >= 1.0 - f64::EPSILON {
        return 1;
    }
    if ws <= f64::EPSILON {
        return max_iterations;
    }

    let num = (1.0 - confidence).max(f64::EPSILON).ln();
    let den = (1.0 - ws).ln();
    let est = (num / den).ceil();
    if !est.is_finite() {
        return max_iterations;
    }
    (est as usize).clamp(1, max_iterations)
}

/// Draw `sample_size` distinct indices out of `n`.
pub fn draw_sample<R: Rng + ?Sized>(rng: &mut R, n: usize, sample_size: usize) -> Vec<usize> {
    index::sample(rng, n, sample_size.min(n)).into_vec()
}

/// Draw a sample accepted by `is_valid`, redrawing up to `max_retries` times.
///
/// Returns `None` if every draw was rejected.
pub fn draw_valid_sample<R, F>(
    rng: &mut R,
    n: usize,
    sample_size: usize,
    max_retries: usize,
    mut is_valid: F,
) -> Option<Vec<usize>>
where
    R: Rng + ?Sized,
    F: FnMut(&[usize]) -> bool,
{
    for _ in 0..=max_retries {
        let sample = draw_sample(rng, n, sample_size);
        if is_valid(&sample) {
            return Some(sample);
        }
    }
    None
}
