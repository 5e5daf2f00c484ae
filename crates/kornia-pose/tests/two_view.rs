use glam::{DVec2, DVec3};
use kornia_pose::camera::CameraIntrinsics;
use kornia_pose::correspondence::Correspondence2d;
use kornia_pose::essential::{
    decompose_essential, essential_8point, ransac_essential, EssentialParams,
};
use kornia_pose::linalg::{skew, Pose};
use kornia_pose::triangulation::triangulate_relative;
use kornia_pose::PoseError;
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_INLIERS: usize = 80;
const NUM_OUTLIERS: usize = 15;

fn relative_pose() -> Pose {
    Pose::from_rvec(DVec3::new(0.02, -0.15, 0.01), DVec3::new(-1.0, 0.05, 0.1).normalize())
}

fn random_points(rng: &mut StdRng, n: usize) -> Vec<DVec3> {
    (0..n)
        .map(|_| {
            DVec3::new(
                rng.random_range(-3.0..3.0),
                rng.random_range(-2.0..2.0),
                rng.random_range(5.0..12.0),
            )
        })
        .collect()
}

fn project(pose: &Pose, p: DVec3) -> DVec2 {
    let c = pose.transform_point(p);
    c.truncate() / c.z
}

#[test]
fn decomposition_selects_ground_truth_candidate() {
    let mut rng = StdRng::seed_from_u64(1);
    let pose = relative_pose();
    let points = random_points(&mut rng, 12);
    let x1: Vec<DVec2> = points.iter().map(|&p| project(&Pose::IDENTITY, p)).collect();
    let x2: Vec<DVec2> = points.iter().map(|&p| project(&pose, p)).collect();

    let e = essential_8point(&x1, &x2).expect("8-point");
    let recovered =
        decompose_essential(&e, &[(x1[0], x2[0]), (x1[5], x2[5])]).expect("decomposition");
    assert!((recovered.rvec() - pose.rvec()).length() < 1e-6);
    assert!(recovered.translation.dot(pose.translation) > 1.0 - 1e-9);

    let triangulated = triangulate_relative(&recovered, &[(x1[3], x2[3])]).expect("triangulation");
    let x = triangulated[0].expect("finite point");
    // scale is fixed by |t| = 1 on both sides
    assert!((x.truncate() - points[3]).length() < 1e-6);
}

#[test]
fn decomposition_fails_when_no_candidate_is_in_front() {
    let pose = relative_pose();
    let e = skew(pose.translation) * pose.rotation;
    let front = DVec3::new(0.5, 0.2, 6.0);
    let behind = DVec3::new(-0.4, 0.3, -6.0);
    let tests = [
        (project(&Pose::IDENTITY, front), project(&pose, front)),
        (project(&Pose::IDENTITY, behind), project(&pose, behind)),
    ];
    assert_eq!(decompose_essential(&e, &tests), Err(PoseError::AmbiguousDecomposition));
}

#[test]
fn essential_ransac_with_outliers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(17);
    let k = CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0);
    let pose = relative_pose();
    let points = random_points(&mut rng, NUM_INLIERS + NUM_OUTLIERS);

    let mut list: Vec<Correspondence2d> = points
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let a = k.normalized_to_pixel(project(&Pose::IDENTITY, p));
            let mut b = k.normalized_to_pixel(project(&pose, p));
            if i < NUM_INLIERS {
                b += DVec2::new(rng.random_range(-0.3..0.3), rng.random_range(-0.3..0.3));
            } else {
                b = DVec2::new(rng.random_range(0.0..640.0), rng.random_range(0.0..480.0));
            }
            Correspondence2d::new(a, b)
        })
        .collect();

    let mut params = EssentialParams::default();
    params.ransac.threshold = 2.0;
    let result = ransac_essential(&mut list, &k, &k, &params, &mut rng).expect("essential RANSAC");

    assert_eq!(result.points.len(), list.len());
    assert!(result.inlier_count >= NUM_INLIERS - 2);
    assert!(result.mean_error < 1.0);
    assert!(list[NUM_INLIERS..].iter().filter(|c| c.is_outlier).count() >= NUM_OUTLIERS - 2);
    assert!((result.pose.rvec() - pose.rvec()).length() < 1e-2);
    assert!(result.pose.translation.dot(pose.translation) > 0.99);

    // inliers triangulate close to the ground truth since |t| = 1 in both
    let mut rel_errors: Vec<f64> = result
        .points
        .iter()
        .zip(points.iter())
        .take(NUM_INLIERS)
        .filter(|(p, _)| !p.is_outlier)
        .map(|(p, truth)| (p.position.truncate() - *truth).length() / truth.length())
        .collect();
    rel_errors.sort_by(f64::total_cmp);
    assert!(rel_errors[rel_errors.len() / 2] < 0.05);
}

#[test]
fn essential_ransac_needs_eight_points() {
    let k = CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0);
    let mut list = vec![Correspondence2d::new(DVec2::ZERO, DVec2::ZERO); 7];
    let mut rng = StdRng::seed_from_u64(0);
    let res = ransac_essential(&mut list, &k, &k, &EssentialParams::default(), &mut rng);
    assert_eq!(
        res.err(),
        Some(PoseError::InsufficientCorrespondences { required: 8, actual: 7 })
    );
}

#[test]
fn essential_quality_gate_rejects_noisy_model() {
    let mut rng = StdRng::seed_from_u64(5);
    let k = CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0);
    let pose = relative_pose();
    let mut list: Vec<Correspondence2d> = random_points(&mut rng, 100)
        .iter()
        .map(|&p| {
            let a = k.normalized_to_pixel(project(&Pose::IDENTITY, p));
            let b = k.normalized_to_pixel(project(&pose, p))
                + DVec2::new(rng.random_range(-2.0..2.0), rng.random_range(-2.0..2.0));
            Correspondence2d::new(a, b)
        })
        .collect();

    let params = EssentialParams {
        max_mean_error: 0.05,
        ..Default::default()
    };
    let res = ransac_essential(&mut list, &k, &k, &params, &mut rng);
    match res {
        Err(PoseError::QualityGate { error, ceiling }) => {
            assert_eq!(ceiling, 0.05);
            assert!(error > ceiling && error < params.ransac.threshold);
        }
        other => panic!("expected the quality gate to fire, got {other:?}"),
    }
}

#[test]
fn essential_depth_failures_veto_hypotheses() {
    let mut rng = StdRng::seed_from_u64(9);
    let k = CameraIntrinsics::new(700.0, 700.0, 320.0, 240.0);
    let pose = relative_pose();

    // 40 points in front of both cameras, 20 behind both: every hypothesis sees at
    // least 20 correspondences that reproject exactly with negative depth
    let mut points = random_points(&mut rng, 40);
    points.extend(random_points(&mut rng, 20).iter().map(|p| DVec3::new(p.x, p.y, -p.z)));
    for p in &points[40..] {
        assert!(pose.transform_point(*p).z < 0.0);
    }
    let list: Vec<Correspondence2d> = points
        .iter()
        .map(|&p| {
            Correspondence2d::new(
                k.normalized_to_pixel(project(&Pose::IDENTITY, p)),
                k.normalized_to_pixel(project(&pose, p)),
            )
        })
        .collect();

    let strict = EssentialParams::default();
    let res = ransac_essential(&mut list.clone(), &k, &k, &strict, &mut rng);
    assert_eq!(res.err(), Some(PoseError::NoConsensus));

    let lenient = EssentialParams {
        depth_failure_ratio: 1,
        ..Default::default()
    };
    let mut accepted = list.clone();
    let result =
        ransac_essential(&mut accepted, &k, &k, &lenient, &mut rng).expect("essential RANSAC");
    assert_eq!(result.inlier_count, 40);
    assert!(accepted[..40].iter().all(|c| !c.is_outlier));
    assert!(accepted[40..].iter().all(|c| c.is_outlier));
    assert!(result.pose.translation.dot(pose.translation) > 0.99);
}
