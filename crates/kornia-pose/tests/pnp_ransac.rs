use glam::{DVec2, DVec3};
use kornia_pose::camera::{Camera, CameraIntrinsics};
use kornia_pose::correspondence::{untracked_repository_ids, Correspondence3d};
use kornia_pose::linalg::Pose;
use kornia_pose::pnp::{solve_pnp_ransac, PnPMethod, PnPRansac, PoseRefiner};
use kornia_pose::ransac::RansacParams;
use kornia_pose::traits::{Estimator, Refiner};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_INLIERS: usize = 60;
const NUM_OUTLIERS: usize = 15;

fn scene(rng: &mut StdRng, planar: bool) -> (Camera, Vec<Correspondence3d>) {
    let k = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0);
    let truth = Pose::from_rvec(DVec3::new(0.2, -0.1, 0.05), DVec3::new(0.1, -0.2, 10.0));
    let camera = Camera::with_pose(k, &truth);

    let mut list = Vec::new();
    for i in 0..NUM_INLIERS + NUM_OUTLIERS {
        let z = if planar { 0.0 } else { rng.random_range(-1.0..1.0) };
        let p = DVec3::new(rng.random_range(-2.0..2.0), rng.random_range(-2.0..2.0), z);
        let pixel = camera.project_world(p).expect("points are in front of the camera");
        let scene = if i < NUM_INLIERS {
            pixel + DVec2::new(rng.random_range(-0.3..0.3), rng.random_range(-0.3..0.3))
        } else {
            let angle = rng.random_range(0.0..std::f64::consts::TAU);
            pixel + DVec2::new(angle.cos(), angle.sin()) * rng.random_range(30.0..80.0)
        };
        list.push(Correspondence3d::new(p, scene).with_repository_id(i));
    }
    (camera, list)
}

#[test]
fn epnp_ransac_rejects_outliers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(21);
    let (truth, mut list) = scene(&mut rng, false);

    let params = RansacParams {
        min_inliers: 5,
        ..Default::default()
    };
    let method = PnPMethod::default();
    let result = solve_pnp_ransac(&mut list, &truth.intrinsics, &method, &params, &mut rng)
        .expect("PnP RANSAC");

    assert_eq!(result.inliers.len(), NUM_INLIERS);
    assert!(result.pose.reproj_rmse < 1.0);
    let t = result.pose.pose.translation;
    assert!((t - truth.pose().translation).length() < 0.01 * 10.0);

    let untracked = untracked_repository_ids(&list);
    assert_eq!(untracked, (NUM_INLIERS..NUM_INLIERS + NUM_OUTLIERS).collect::<Vec<_>>());
}

#[test]
fn direct_solver_on_planar_marker() {
    let mut rng = StdRng::seed_from_u64(8);
    let (truth, mut list) = scene(&mut rng, true);

    let estimator = PnPRansac::new(truth.intrinsics).with_method(PnPMethod::Direct);
    let estimate = estimator.estimate(&mut list, &mut rng).expect("planar PnP RANSAC");
    assert_eq!(estimate.inlier_count, NUM_INLIERS);
    let pose = estimate.model.pose();
    assert!((pose.translation - truth.pose().translation).length() < 0.1);
    assert!((pose.rvec() - truth.pose().rvec()).length() < 1e-2);
}

#[test]
fn pose_refinement_is_monotonic() {
    let mut rng = StdRng::seed_from_u64(3);
    let (truth, mut list) = scene(&mut rng, false);

    let estimate = PnPRansac::new(truth.intrinsics)
        .estimate(&mut list, &mut rng)
        .expect("PnP RANSAC");

    // start the refiner away from the RANSAC optimum
    let mut start = estimate.model;
    let mut pose = start.pose();
    pose.translation += DVec3::new(0.05, -0.05, 0.2);
    start.set_pose(&pose);

    let refined = PoseRefiner::default().refine(&start, &list).expect("pose LM");
    assert!(refined.final_error <= refined.initial_error);
    assert!(refined.final_error < 0.1 * refined.initial_error);
    assert!((refined.model.pose().translation - truth.pose().translation).length() < 0.1);
}
