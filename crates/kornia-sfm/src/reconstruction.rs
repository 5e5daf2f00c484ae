use std::collections::HashMap;

use kornia_pose::camera::{Camera, CameraIntrinsics};
use kornia_pose::correspondence::Correspondence2d;
use kornia_pose::essential::{ransac_essential, EssentialParams, EssentialResult};
use kornia_pose::linalg::Pose;
use kornia_pose::traits::ReprojectionModel;
use kornia_pose::PoseError;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::matcher::{FeatureMatcher, RatioTestMatcher};
use crate::model::{CameraView, Frame, Observation, Reconstruction, ReconstructionPoint};
use crate::ReconstructionError;

/// Parameters of [`IncrementalReconstruction`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Essential matrix RANSAC parameters used to register each frame.
    pub essential: EssentialParams,
    /// Reprojection error in pixels above which an existing point seen again is flagged.
    pub validation_threshold: f64,
    /// Minimum number of descriptor matches needed to attempt registration.
    pub min_matches: usize,
    /// Ratio of the bundled ratio-test matcher.
    pub match_ratio: f32,
    /// Seed of the random generator driving RANSAC.
    pub random_seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            essential: EssentialParams::default(),
            validation_threshold: 4.0,
            min_matches: 8,
            match_ratio: 0.8,
            random_seed: 0,
        }
    }
}

/// Lifecycle of an [`IncrementalReconstruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionState {
    /// Calibration or frames are missing.
    Uninitialized,
    /// Frames remain to be processed.
    Ready,
    /// All frames have been processed.
    Done,
}

/// Registered relative motion of one frame.
struct Registration {
    pose: Pose,
    scale: f64,
    matches: Vec<(usize, usize)>,
    result: EssentialResult,
}

/// Incremental two-view reconstruction over an ordered frame sequence.
///
/// Frame 0 defines the world frame. Every later frame is registered against the last
/// registered frame; the metric scale of the first pair is fixed to a unit baseline and
/// propagated through the points shared with earlier frames.
///
/// A point seen again is validated by reprojection and its position is updated with the
/// running mean of the two-view triangulations that observe it.
pub struct IncrementalReconstruction<M: FeatureMatcher = RatioTestMatcher> {
    config: ReconstructionConfig,
    matcher: M,
    rng: StdRng,
    intrinsics: Option<CameraIntrinsics>,
    frames: Vec<Frame>,
    next_frame: usize,
    state: ReconstructionState,
    reconstruction: Reconstruction,
    // last registered frame, the reference of the next registration
    reference: Option<usize>,
    // feature index in the reference frame -> point index
    tracks: HashMap<usize, usize>,
    last_scale: f64,
}

impl IncrementalReconstruction<RatioTestMatcher> {
    /// Reconstruction using the ratio-test matcher configured by `config.match_ratio`.
    pub fn new(config: ReconstructionConfig) -> Self {
        Self::with_matcher(config, RatioTestMatcher::new(config.match_ratio))
    }
}

impl<M: FeatureMatcher> IncrementalReconstruction<M> {
    /// Reconstruction using a custom matcher.
    pub fn with_matcher(config: ReconstructionConfig, matcher: M) -> Self {
        Self {
            config,
            matcher,
            rng: StdRng::seed_from_u64(config.random_seed),
            intrinsics: None,
            frames: Vec::new(),
            next_frame: 0,
            state: ReconstructionState::Uninitialized,
            reconstruction: Reconstruction::default(),
            reference: None,
            tracks: HashMap::new(),
            last_scale: 1.0,
        }
    }

    /// Set the intrinsics shared by all frames.
    pub fn attach_calibration(&mut self, intrinsics: CameraIntrinsics) {
        self.intrinsics = Some(intrinsics);
        self.update_state();
    }

    /// Set the frame sequence and restart processing.
    pub fn attach_frames(&mut self, frames: Vec<Frame>) {
        self.frames = frames;
        self.next_frame = 0;
        self.reconstruction = Reconstruction::default();
        self.reference = None;
        self.tracks.clear();
        self.last_scale = 1.0;
        self.state = ReconstructionState::Uninitialized;
        self.update_state();
    }

    fn update_state(&mut self) {
        if self.state == ReconstructionState::Uninitialized
            && self.intrinsics.is_some()
            && !self.frames.is_empty()
        {
            self.state = ReconstructionState::Ready;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReconstructionState {
        self.state
    }

    /// The reconstruction built so far.
    pub fn reconstruction(&self) -> &Reconstruction {
        &self.reconstruction
    }

    /// Consume the controller and return the reconstruction.
    pub fn into_reconstruction(self) -> Reconstruction {
        self.reconstruction
    }

    /// World-to-camera poses of the processed frames.
    pub fn camera_poses(&self) -> Vec<Pose> {
        self.reconstruction.cameras.iter().map(CameraView::pose).collect()
    }

    /// Process the next frame.
    ///
    /// Returns `Ok(false)` once every frame has been consumed. A frame that cannot be
    /// registered keeps the pose of the last registered frame, is recorded as unregistered
    /// and is never used as a reference.
    pub fn calculate_step(&mut self) -> Result<bool, ReconstructionError> {
        match self.state {
            ReconstructionState::Uninitialized => {
                return Err(ReconstructionError::NotReady(
                    "attach calibration and frames first",
                ))
            }
            ReconstructionState::Done => return Ok(false),
            ReconstructionState::Ready => {}
        }
        let intrinsics = self
            .intrinsics
            .ok_or(ReconstructionError::NotReady("missing calibration"))?;

        let k = self.next_frame;
        match self.reference {
            None => {
                self.push_camera(k, Pose::IDENTITY, true);
                self.reference = Some(k);
                self.tracks.clear();
            }
            Some(r) => {
                let ref_pose = self.camera_pose(r);
                match self.register(r, k, &ref_pose, &intrinsics) {
                    Ok(registration) => {
                        self.extend_tracks(r, k, &ref_pose, &intrinsics, &registration);
                        self.last_scale = registration.scale;
                        self.push_camera(k, registration.pose, true);
                        self.reference = Some(k);
                    }
                    Err(err) => {
                        log::warn!(
                            "frame {k} ({}) could not be registered against frame {r}: {err}",
                            self.frames[k].image_name
                        );
                        self.push_camera(k, ref_pose, false);
                    }
                }
            }
        }

        self.next_frame += 1;
        if self.next_frame >= self.frames.len() {
            self.state = ReconstructionState::Done;
        }
        Ok(true)
    }

    /// Process all remaining frames.
    pub fn calculate_all(&mut self) -> Result<&Reconstruction, ReconstructionError> {
        while self.calculate_step()? {}
        Ok(&self.reconstruction)
    }

    fn camera_pose(&self, frame: usize) -> Pose {
        self.reconstruction
            .cameras
            .get(frame)
            .map(CameraView::pose)
            .unwrap_or(Pose::IDENTITY)
    }

    fn push_camera(&mut self, frame: usize, pose: Pose, registered: bool) {
        if let Some(intrinsics) = self.intrinsics {
            self.reconstruction.cameras.push(CameraView {
                intrinsics,
                extrinsics: pose.to_extrinsics(),
                image_name: self.frames[frame].image_name.clone(),
                registered,
            });
        }
    }

    fn register(
        &mut self,
        r: usize,
        k: usize,
        ref_pose: &Pose,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Registration, ReconstructionError> {
        let reference = &self.frames[r];
        let current = &self.frames[k];

        let matches = self
            .matcher
            .match_frames(&reference.features, &current.features);
        if matches.len() < self.config.min_matches {
            return Err(PoseError::InsufficientCorrespondences {
                required: self.config.min_matches,
                actual: matches.len(),
            }
            .into());
        }

        let mut correspondences: Vec<Correspondence2d> = matches
            .iter()
            .map(|&(i, j)| {
                Correspondence2d::new(reference.features[i].position, current.features[j].position)
            })
            .collect();
        let result = ransac_essential(
            &mut correspondences,
            intrinsics,
            intrinsics,
            &self.config.essential,
            &mut self.rng,
        )?;

        let scale = self.resolve_scale(&matches, &result, ref_pose);
        let relative = Pose::new(result.pose.rotation, result.pose.translation * scale);
        let pose = relative.compose(ref_pose);

        log::debug!(
            "frame {k} against {r}: {} matches, {} inliers, mean error {:.3} px, scale {scale:.4}",
            matches.len(),
            result.inlier_count,
            result.mean_error
        );

        Ok(Registration {
            pose,
            scale,
            matches,
            result,
        })
    }

    /// Median ratio between the depths of tracked points and their unit-baseline triangulation.
    fn resolve_scale(
        &self,
        matches: &[(usize, usize)],
        result: &EssentialResult,
        ref_pose: &Pose,
    ) -> f64 {
        let mut ratios: Vec<f64> = matches
            .iter()
            .zip(result.points.iter())
            .filter(|(_, tp)| !tp.is_outlier && tp.position.z > 0.0)
            .filter_map(|(&(i, _), tp)| {
                let point = &self.reconstruction.points[*self.tracks.get(&i)?];
                if point.is_outlier {
                    return None;
                }
                let depth = ref_pose.transform_point(point.position.truncate()).z;
                (depth > 0.0).then(|| depth / tp.position.z)
            })
            .collect();

        if ratios.is_empty() {
            return self.last_scale;
        }
        ratios.sort_by(f64::total_cmp);
        ratios[ratios.len() / 2]
    }

    fn extend_tracks(
        &mut self,
        r: usize,
        k: usize,
        ref_pose: &Pose,
        intrinsics: &CameraIntrinsics,
        registration: &Registration,
    ) {
        let camera = Camera::with_pose(*intrinsics, &registration.pose);
        let to_world = ref_pose.inverse();
        let mut tracks = HashMap::new();
        let (mut extended, mut created, mut rejected) = (0, 0, 0);

        let pairs = registration.matches.iter().zip(registration.result.points.iter());
        for (&(i, j), tp) in pairs {
            if tp.is_outlier {
                continue;
            }
            let feature = &self.frames[k].features[j];
            let observation = Observation {
                frame: k,
                feature_index: j,
                feature: feature.clone(),
            };

            let in_ref = tp.position.truncate() * registration.scale;
            let world = to_world.transform_point(in_ref);
            let in_front = in_ref.z > 0.0 && registration.pose.transform_point(world).z > 0.0;

            if let Some(&id) = self.tracks.get(&i) {
                let point = &mut self.reconstruction.points[id];
                if point.is_outlier {
                    continue;
                }
                let position = point.position.truncate();
                let error = camera.reprojection_error(&position, &feature.position);
                if error > self.config.validation_threshold {
                    point.is_outlier = true;
                    rejected += 1;
                    continue;
                }
                point.observations.push(observation);
                if in_front {
                    // running mean over the two-view triangulations of this point
                    let m = (point.observations.len() - 1) as f64;
                    point.position = (position + (world - position) / m).extend(1.0);
                }
                tracks.insert(j, id);
                extended += 1;
                continue;
            }

            if !in_front {
                continue;
            }

            let first = &self.frames[r].features[i];
            self.reconstruction.points.push(ReconstructionPoint {
                position: world.extend(1.0),
                object_id: first.object_id,
                color: first.color,
                is_outlier: false,
                observations: vec![
                    Observation {
                        frame: r,
                        feature_index: i,
                        feature: first.clone(),
                    },
                    observation,
                ],
            });
            tracks.insert(j, self.reconstruction.points.len() - 1);
            created += 1;
        }

        log::debug!(
            "frame {k}: {extended} tracks extended, {created} points created, {rejected} flagged"
        );
        self.tracks = tracks;
    }
}
