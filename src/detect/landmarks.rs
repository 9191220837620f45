use serde::{Deserialize, Serialize};

/// Face-mesh landmark indices the pipeline relies on.
pub mod index {
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const RIGHT_EYE_OUTER: usize = 263;
    pub const NOSE_TIP: usize = 1;
    pub const MOUTH_LEFT: usize = 61;
    pub const MOUTH_RIGHT: usize = 291;
    pub const CHIN: usize = 199;
    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;

    /// Number of points in a standard face mesh.
    pub const MESH_SIZE: usize = 468;
}

/// The six points fed to the pose solver, in solver order.
pub const POSE_LANDMARKS: [usize; 6] = [
    index::LEFT_EYE_OUTER,
    index::RIGHT_EYE_OUTER,
    index::NOSE_TIP,
    index::MOUTH_LEFT,
    index::MOUTH_RIGHT,
    index::CHIN,
];

/// Normalized landmark: x and y in 0..1 of image width/height, z relative depth
/// on roughly the same scale as x.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for LandmarkPoint {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

impl From<LandmarkPoint> for [f32; 3] {
    fn from(p: LandmarkPoint) -> Self {
        [p.x, p.y, p.z]
    }
}

/// One detected face for one frame. Index semantics are fixed (see [`index`]).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarkSet {
    pub points: Vec<LandmarkPoint>,
}

impl FaceLandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self { points }
    }

    /// Point at `idx`, if present and finite.
    pub fn point(&self, idx: usize) -> Option<LandmarkPoint> {
        self.points.get(idx).copied().filter(LandmarkPoint::is_finite)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A flat, centred, frontal face with a closed mouth.
    ///
    /// All depths are zero and the key points are mirror-symmetric about
    /// x = 0.5, so the pose solver converges to the identity rotation.
    pub fn frontal() -> Self {
        let mut points = vec![LandmarkPoint::new(0.5, 0.5, 0.0); index::MESH_SIZE];
        points[index::LEFT_EYE_OUTER] = LandmarkPoint::new(0.40, 0.42, 0.0);
        points[index::RIGHT_EYE_OUTER] = LandmarkPoint::new(0.60, 0.42, 0.0);
        points[index::NOSE_TIP] = LandmarkPoint::new(0.50, 0.52, 0.0);
        points[index::MOUTH_LEFT] = LandmarkPoint::new(0.44, 0.62, 0.0);
        points[index::MOUTH_RIGHT] = LandmarkPoint::new(0.56, 0.62, 0.0);
        points[index::CHIN] = LandmarkPoint::new(0.50, 0.72, 0.0);
        points[index::UPPER_LIP] = LandmarkPoint::new(0.50, 0.600, 0.0);
        points[index::LOWER_LIP] = LandmarkPoint::new(0.50, 0.605, 0.0);
        Self { points }
    }

    /// Move one point. Out-of-range indices are ignored.
    pub fn with_point(mut self, idx: usize, point: LandmarkPoint) -> Self {
        if let Some(slot) = self.points.get_mut(idx) {
            *slot = point;
        }
        self
    }
}
