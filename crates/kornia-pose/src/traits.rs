use glam::DVec2;
use rand::Rng;

use crate::correspondence::Correspondence;
use crate::PoseError;

/// A model that maps reference points of type `P` to pixels.
pub trait ReprojectionModel<P> {
    /// Pixel distance between the projected reference point and the observed scene point.
    ///
    /// Points that cannot be projected (behind the camera, at infinity) report `f64::INFINITY`.
    fn reprojection_error(&self, reference: &P, scene: &DVec2) -> f64;
}

/// Output of a robust estimator.
#[derive(Debug, Clone)]
pub struct Estimate<M> {
    /// The estimated model.
    pub model: M,
    /// Number of correspondences classified as inliers.
    pub inlier_count: usize,
    /// Number of hypotheses evaluated.
    pub iterations: usize,
    /// Root mean squared reprojection error over the inliers, in pixels.
    pub rmse: f64,
}

/// A robust estimator that fits a model and flags outliers in place.
pub trait Estimator {
    /// Reference point type of the correspondences.
    type Reference;
    /// Estimated model.
    type Model;

    /// Fit the model, writing `is_outlier` on every correspondence.
    fn estimate<R: Rng + ?Sized>(
        &self,
        correspondences: &mut [Correspondence<Self::Reference>],
        rng: &mut R,
    ) -> Result<Estimate<Self::Model>, PoseError>;
}

/// Result of a local refinement.
///
/// Errors are sums of squared pixel residuals. Non-convergence is reported through
/// `converged`, the model is still the best one found.
#[derive(Debug, Clone)]
pub struct Refinement<M> {
    /// Refined model.
    pub model: M,
    /// Squared error before refinement.
    pub initial_error: f64,
    /// Squared error after refinement, never above `initial_error`.
    pub final_error: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the stopping criterion was met before the iteration cap.
    pub converged: bool,
}

/// A local optimizer that polishes a model against inlier correspondences.
pub trait Refiner {
    /// Reference point type of the correspondences.
    type Reference;
    /// Refined model.
    type Model;

    /// Refine `model`; correspondences flagged as outliers are ignored.
    fn refine(
        &self,
        model: &Self::Model,
        correspondences: &[Correspondence<Self::Reference>],
    ) -> Result<Refinement<Self::Model>, PoseError>;
}

/// Classifies correspondences as inliers or outliers against a fixed model.
pub trait OutlierChecker<M, P> {
    /// Overwrite `is_outlier` on every correspondence and return the inlier count.
    fn check(&self, model: &M, correspondences: &mut [Correspondence<P>]) -> usize;
}
