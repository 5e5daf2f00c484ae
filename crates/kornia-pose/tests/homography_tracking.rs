use glam::{DVec2, DVec3};
use kornia_pose::camera::{Camera, CameraIntrinsics};
use kornia_pose::correspondence::{partition_inliers, Correspondence2d};
use kornia_pose::homography::{
    decompose_homography, ransac_homography, HomographyRansac, HomographyRefiner,
};
use kornia_pose::linalg::Pose;
use kornia_pose::outlier::ReprojectionChecker;
use kornia_pose::ransac::RansacParams;
use kornia_pose::traits::{Estimator, OutlierChecker, Refiner};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_INLIERS: usize = 120;
const NUM_OUTLIERS: usize = 40;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(1000.0, 1000.0, 320.0, 240.0)
}

/// Points of a 100x100 planar marker seen from about 500 units away.
fn marker_scene(rng: &mut StdRng) -> (Pose, Vec<Correspondence2d>) {
    let pose = Pose::from_rvec(DVec3::new(0.08, -0.05, 0.02), DVec3::new(5.0, -3.0, 500.0));
    let camera = Camera::with_pose(intrinsics(), &pose);

    let mut list = Vec::with_capacity(NUM_INLIERS + NUM_OUTLIERS);
    for i in 0..NUM_INLIERS {
        let reference = DVec2::new(rng.random_range(-50.0..50.0), rng.random_range(-50.0..50.0));
        let pixel = camera
            .project_world(reference.extend(0.0))
            .expect("marker is in front of the camera");
        let noise = DVec2::new(rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5));
        list.push(Correspondence2d::new(reference, pixel + noise).with_repository_id(i));
    }
    for i in 0..NUM_OUTLIERS {
        let reference = DVec2::new(rng.random_range(-50.0..50.0), rng.random_range(-50.0..50.0));
        let pixel = camera
            .project_world(reference.extend(0.0))
            .expect("marker is in front of the camera");
        let angle = rng.random_range(0.0..std::f64::consts::TAU);
        let offset = DVec2::new(angle.cos(), angle.sin()) * rng.random_range(20.0..80.0);
        list.push(
            Correspondence2d::new(reference, pixel + offset).with_repository_id(NUM_INLIERS + i),
        );
    }
    (pose, list)
}

#[test]
fn square_marker_pose_from_four_corners() {
    let mut matches = vec![
        Correspondence2d::new(DVec2::new(-50.0, -50.0), DVec2::new(220.0, 340.0)),
        Correspondence2d::new(DVec2::new(50.0, -50.0), DVec2::new(420.0, 340.0)),
        Correspondence2d::new(DVec2::new(50.0, 50.0), DVec2::new(420.0, 140.0)),
        Correspondence2d::new(DVec2::new(-50.0, 50.0), DVec2::new(220.0, 140.0)),
    ];
    let mut rng = StdRng::seed_from_u64(0);
    let estimate =
        ransac_homography(&mut matches, &RansacParams::default(), &mut rng)
            .expect("homography from 4 corners");
    assert_eq!(estimate.inlier_count, 4);

    let pose = decompose_homography(&estimate.model, &intrinsics()).expect("decomposition");
    assert!((pose.translation.z - 500.0).abs() < 5.0);
    assert!(pose.translation.truncate().length() < 1e-6);
}

#[test]
fn tracks_marker_under_outliers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(11);
    let (truth, mut list) = marker_scene(&mut rng);

    let estimator = HomographyRansac::default();
    let estimate = estimator.estimate(&mut list, &mut rng).expect("homography RANSAC");
    assert!(estimate.iterations <= estimator.params.max_iterations);
    assert!(estimate.rmse < 1.0);

    let flagged_outliers = list[NUM_INLIERS..].iter().filter(|c| c.is_outlier).count();
    assert!(flagged_outliers as f64 >= 0.95 * NUM_OUTLIERS as f64);
    let kept_inliers = list[..NUM_INLIERS].iter().filter(|c| !c.is_outlier).count();
    assert!(kept_inliers as f64 >= 0.95 * NUM_INLIERS as f64);

    let (inliers, outliers) = partition_inliers(&list);
    assert_eq!(inliers.len(), estimate.inlier_count);
    assert_eq!(inliers.len() + outliers.len(), list.len());

    let pose = decompose_homography(&estimate.model, &intrinsics()).expect("decomposition");
    assert!((pose.translation.z - truth.translation.z).abs() < 0.01 * truth.translation.z);
    assert!((pose.rvec() - truth.rvec()).length() < 5e-2);
}

#[test]
fn refinement_after_outlier_check_never_increases_error() {
    let mut rng = StdRng::seed_from_u64(5);
    let (_, mut list) = marker_scene(&mut rng);

    let estimate = HomographyRansac::default()
        .estimate(&mut list, &mut rng)
        .expect("homography RANSAC");

    let refined = HomographyRefiner::default()
        .refine(&estimate.model, &list)
        .expect("homography LM");
    assert!(refined.final_error <= refined.initial_error);

    let checker = ReprojectionChecker::new(3.0);
    let inliers = checker.check(&refined.model, &mut list);
    assert!(inliers >= estimate.inlier_count - 2);
    assert!(list[NUM_INLIERS..].iter().filter(|c| c.is_outlier).count() >= 38);
}
