#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Pose
//!
//! Robust estimation and refinement of camera pose from point correspondences.
//!
//! ## Key Features
//!
//! - **Homography**: RANSAC estimation, Levenberg–Marquardt refinement and planar pose
//!   decomposition
//! - **PnP**: direct and EPnP solvers wrapped in an adaptive RANSAC loop, LM pose refinement
//! - **Two-view geometry**: eight-point essential matrix RANSAC with cheirality-based decomposition
//! - **Triangulation** and **plane fitting** for sparse 3D structure
//!
//! ## Example: planar tracking
//!
//! ```rust
//! use glam::DVec2;
//! use kornia_pose::correspondence::Correspondence2d;
//! use kornia_pose::homography::{ransac_homography, decompose_homography};
//! use kornia_pose::camera::CameraIntrinsics;
//! use kornia_pose::ransac::RansacParams;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let intrinsics = CameraIntrinsics::new(1000.0, 1000.0, 320.0, 240.0);
//! let mut matches = vec![
//!     Correspondence2d::new(DVec2::new(-50.0, -50.0), DVec2::new(220.0, 340.0)),
//!     Correspondence2d::new(DVec2::new(50.0, -50.0), DVec2::new(420.0, 340.0)),
//!     Correspondence2d::new(DVec2::new(50.0, 50.0), DVec2::new(420.0, 140.0)),
//!     Correspondence2d::new(DVec2::new(-50.0, 50.0), DVec2::new(220.0, 140.0)),
//! ];
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let estimate = ransac_homography(&mut matches, &RansacParams::default(), &mut rng)?;
//! let pose = decompose_homography(&estimate.model, &intrinsics)?;
//! assert!((pose.translation.z - 500.0).abs() < 5.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera intrinsics, distortion and the intrinsic/extrinsic camera pair.
pub mod camera;

/// Point correspondences shared by every estimator.
pub mod correspondence;

mod error;
pub use error::PoseError;

/// Eight-point essential matrix estimation, decomposition and RANSAC.
pub mod essential;

/// Homography estimation, refinement and planar pose decomposition.
pub mod homography;

/// Linear algebra primitives on top of `glam` and `nalgebra`.
pub mod linalg;

/// Reprojection-based outlier classification.
pub mod outlier;

/// RANSAC plane fitting for 3D point sets.
pub mod plane;

/// Perspective-n-Point solvers, robust estimation and refinement.
pub mod pnp;

/// Shared RANSAC parameters and sampling utilities.
pub mod ransac;

/// Levenberg–Marquardt parameters shared by the refiners.
pub mod refine;

/// Capability traits for estimators, refiners and outlier checkers.
pub mod traits;

/// Linear triangulation from two calibrated views.
pub mod triangulation;
