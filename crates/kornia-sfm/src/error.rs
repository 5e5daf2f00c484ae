use kornia_pose::PoseError;
use thiserror::Error;

/// Error types for the incremental reconstruction.
#[derive(Debug, Error)]
pub enum ReconstructionError {
    /// A pose estimation primitive failed.
    #[error(transparent)]
    Pose(#[from] PoseError),

    /// Calibration or frames have not been attached yet.
    #[error("Reconstruction is not ready: {0}")]
    NotReady(&'static str),

    /// Writing the reconstruction failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
