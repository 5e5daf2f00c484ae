use thiserror::Error;

/// Error types for pose estimation and refinement.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoseError {
    /// Fewer correspondences than the minimal sample of the solver.
    #[error("Solver requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// Two input slices that must be paired have different lengths.
    #[error("Mismatched array lengths: {left} != {right}")]
    MismatchedLengths {
        /// Length of the left-hand slice.
        left: usize,
        /// Length of the right-hand slice.
        right: usize,
    },

    /// The input geometry does not constrain the model (collinear, coincident, singular).
    #[error("Degenerate configuration: {0}")]
    Degenerate(&'static str),

    /// No RANSAC hypothesis produced a single inlier.
    #[error("RANSAC failed to find a valid model")]
    NoConsensus,

    /// The best model was supported by too few inliers.
    #[error("Model requires at least {required} inliers, got {actual}")]
    InsufficientInliers {
        /// Minimum number of inliers required.
        required: usize,
        /// Number of inliers found.
        actual: usize,
    },

    /// None of the four essential matrix decompositions places the points in front of both cameras.
    #[error("Essential matrix decomposition is ambiguous: no candidate passes the depth check")]
    AmbiguousDecomposition,

    /// A model was computed but its mean reprojection error exceeds the accepted ceiling.
    #[error("Mean reprojection error {error:.3} px exceeds the ceiling of {ceiling:.3} px")]
    QualityGate {
        /// Mean reprojection error of the model in pixels.
        error: f64,
        /// Maximum accepted mean reprojection error in pixels.
        ceiling: f64,
    },

    /// Singular value decomposition failed.
    #[error("SVD computation failed: {0}")]
    SvdFailed(&'static str),
}
