use glam::{DVec2, DVec3};

/// A match between a reference point and its observation in the current frame.
///
/// The reference is a plane coordinate ([`Correspondence2d`]) or a world point
/// ([`Correspondence3d`]); the scene point is always in pixels. Estimators write the
/// inlier/outlier verdict into `is_outlier`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence<P> {
    /// Point in the reference (plane or world) frame.
    pub reference: P,
    /// Observed pixel in the current frame.
    pub scene: DVec2,
    /// Set by estimators and outlier checkers.
    pub is_outlier: bool,
    /// Identifier of the reference point in an external repository, if any.
    pub repository_id: Option<usize>,
}

/// Plane-to-image correspondence.
pub type Correspondence2d = Correspondence<DVec2>;

/// World-to-image correspondence.
pub type Correspondence3d = Correspondence<DVec3>;

impl<P> Correspondence<P> {
    /// Create an inlier correspondence with no repository id.
    pub fn new(reference: P, scene: DVec2) -> Self {
        Self {
            reference,
            scene,
            is_outlier: false,
            repository_id: None,
        }
    }

    /// Attach a repository id.
    pub fn with_repository_id(mut self, id: usize) -> Self {
        self.repository_id = Some(id);
        self
    }
}

/// Split correspondences into `(inliers, outliers)` in a single pass.
pub fn partition_inliers<P: Copy>(
    correspondences: &[Correspondence<P>],
) -> (Vec<Correspondence<P>>, Vec<Correspondence<P>>) {
    correspondences.iter().partition(|c| !c.is_outlier)
}

/// Number of correspondences not flagged as outliers.
pub fn inlier_count<P>(correspondences: &[Correspondence<P>]) -> usize {
    correspondences.iter().filter(|c| !c.is_outlier).count()
}

/// Repository ids of outlier correspondences, for callers that stop tracking them.
pub fn untracked_repository_ids<P>(correspondences: &[Correspondence<P>]) -> Vec<usize> {
    correspondences
        .iter()
        .filter(|c| c.is_outlier)
        .filter_map(|c| c.repository_id)
        .collect()
}
