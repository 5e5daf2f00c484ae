use glam::{DMat4, DVec2, DVec4};
use kornia_pose::camera::CameraIntrinsics;
use kornia_pose::linalg::Pose;
use serde::{Deserialize, Serialize};

/// A detected keypoint with its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Pixel position.
    pub position: DVec2,
    /// Identifier of the object the feature belongs to, `-1` if unknown.
    pub object_id: i32,
    /// RGB colour sampled at the keypoint.
    pub color: [u8; 3],
    /// Keypoint diameter in pixels.
    pub size: f64,
    /// Keypoint orientation in degrees.
    pub orientation: f64,
    /// Match distance assigned by the detector or matcher.
    pub distance: f64,
    /// Descriptor vector.
    pub descriptor: Vec<f32>,
}

impl Feature {
    /// Feature at `position` with the given descriptor and default attributes.
    pub fn new(position: DVec2, descriptor: Vec<f32>) -> Self {
        Self {
            position,
            object_id: -1,
            color: [0; 3],
            size: 1.0,
            orientation: 0.0,
            distance: 0.0,
            descriptor,
        }
    }

    /// Set the colour.
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    /// Set the object id.
    pub fn with_object_id(mut self, object_id: i32) -> Self {
        self.object_id = object_id;
        self
    }
}

/// One image of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Image file name.
    pub image_name: String,
    /// Features detected in the image.
    pub features: Vec<Feature>,
}

impl Frame {
    /// Create a frame.
    pub fn new(image_name: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            image_name: image_name.into(),
            features,
        }
    }
}

/// Sighting of a point in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Index of the frame.
    pub frame: usize,
    /// Index of the feature within the frame.
    pub feature_index: usize,
    /// Copy of the observed feature.
    pub feature: Feature,
}

/// A reconstructed 3D point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionPoint {
    /// Homogeneous world position, `w = 1`.
    pub position: DVec4,
    /// Object id of the first observing feature.
    pub object_id: i32,
    /// Colour of the first observing feature.
    pub color: [u8; 3],
    /// Set when a later view contradicts the point.
    pub is_outlier: bool,
    /// All sightings, in frame order.
    pub observations: Vec<Observation>,
}

/// A camera of the reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    /// Intrinsic calibration.
    pub intrinsics: CameraIntrinsics,
    /// World-to-camera transform.
    pub extrinsics: DMat4,
    /// Image file name.
    pub image_name: String,
    /// Whether the frame was registered; unregistered frames repeat the previous pose.
    pub registered: bool,
}

impl CameraView {
    /// World-to-camera pose of the view.
    pub fn pose(&self) -> Pose {
        Pose::from_extrinsics(&self.extrinsics)
    }
}

/// Cameras and points of a sparse reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconstruction {
    /// One camera per processed frame, in frame order.
    pub cameras: Vec<CameraView>,
    /// Reconstructed points.
    pub points: Vec<ReconstructionPoint>,
}

impl Reconstruction {
    /// Points not flagged as outliers.
    pub fn valid_points(&self) -> impl Iterator<Item = &ReconstructionPoint> {
        self.points.iter().filter(|p| !p.is_outlier)
    }
}
