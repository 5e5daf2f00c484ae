use serde::{Deserialize, Serialize};

use crate::correspondence::Correspondence;
use crate::traits::{OutlierChecker, ReprojectionModel};

/// Flags correspondences whose reprojection error reaches a pixel threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionChecker {
    /// Pixel threshold; errors at or above it are outliers.
    pub threshold: f64,
}

impl Default for ReprojectionChecker {
    fn default() -> Self {
        Self { threshold: 3.0 }
    }
}

impl ReprojectionChecker {
    /// Create a checker with the given pixel threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl<M, P> OutlierChecker<M, P> for ReprojectionChecker
where
    M: ReprojectionModel<P>,
{
    fn check(&self, model: &M, correspondences: &mut [Correspondence<P>]) -> usize {
        let mut inliers = 0;
        for c in correspondences.iter_mut() {
            let err = model.reprojection_error(&c.reference, &c.scene);
            // NaN and infinite errors count as outliers
            c.is_outlier = !(err < self.threshold);
            if !c.is_outlier {
                inliers += 1;
            }
        }
        log::debug!(
            "outlier check: {inliers}/{} inliers at {:.2} px",
            correspondences.len(),
            self.threshold
        );
        inliers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence2d;
    use crate::homography::Homography;
    use glam::{DMat3, DVec2};

    #[test]
    fn test_check_overwrites_flags() {
        let h = Homography(DMat3::IDENTITY);
        let mut list = vec![
            Correspondence2d::new(DVec2::new(1.0, 1.0), DVec2::new(1.0, 1.0)),
            Correspondence2d::new(DVec2::new(1.0, 1.0), DVec2::new(1.0, 3.5)),
            Correspondence2d::new(DVec2::new(1.0, 1.0), DVec2::new(1.0, 4.0)),
            Correspondence2d::new(DVec2::new(1.0, 1.0), DVec2::new(f64::NAN, 4.0)),
        ];
        list[0].is_outlier = true;

        let checker = ReprojectionChecker::new(3.0);
        let inliers = checker.check(&h, &mut list);
        assert_eq!(inliers, 2);
        assert!(!list[0].is_outlier);
        assert!(!list[1].is_outlier);
        assert!(list[2].is_outlier);
        assert!(list[3].is_outlier);
    }
}
