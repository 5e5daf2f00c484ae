#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia SfM
//!
//! Frames of matched features go in, a sparse point cloud with posed cameras comes out.
//! Each new frame is matched against the previous one, registered through a robust
//! essential matrix, scaled against the points already reconstructed and used to extend
//! or create point tracks.
//!
//! ```rust
//! use kornia_pose::camera::CameraIntrinsics;
//! use kornia_sfm::{IncrementalReconstruction, ReconstructionConfig, ReconstructionState};
//!
//! let mut sfm = IncrementalReconstruction::new(ReconstructionConfig::default());
//! assert_eq!(sfm.state(), ReconstructionState::Uninitialized);
//! assert!(sfm.calculate_step().is_err());
//!
//! sfm.attach_calibration(CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0));
//! assert_eq!(sfm.state(), ReconstructionState::Uninitialized);
//! ```

mod error;
pub use error::ReconstructionError;

/// Text serialization of a reconstruction.
pub mod export;

/// Descriptor matching between frames.
pub mod matcher;

/// Features, frames, points and cameras of a reconstruction.
pub mod model;

mod reconstruction;
pub use reconstruction::{IncrementalReconstruction, ReconstructionConfig, ReconstructionState};
