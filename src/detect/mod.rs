mod backend;
mod backends;
mod landmarks;
mod objects;
mod registry;

pub use backend::{DetectorSet, LandmarkProvider, ObjectDetector};
pub use backends::{ReplayBackend, ReplayEntry, StubBackend};
pub use landmarks::{index, FaceLandmarkSet, LandmarkPoint, POSE_LANDMARKS};
pub use objects::{BoundingBox, ObjectHit, PHONE_LABEL};
pub use registry::{DetectorConfig, DetectorRegistry};
