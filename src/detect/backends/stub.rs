use anyhow::Result;

use crate::detect::backend::{LandmarkProvider, ObjectDetector};
use crate::detect::landmarks::FaceLandmarkSet;
use crate::detect::objects::ObjectHit;
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// Reports the same faces and objects for every frame. The default is one
/// frontal face and no objects, i.e. a nominal (SAFE) scene.
#[derive(Clone, Debug)]
pub struct StubBackend {
    faces: Vec<FaceLandmarkSet>,
    objects: Vec<ObjectHit>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_scene(vec![FaceLandmarkSet::frontal()], Vec::new())
    }

    pub fn with_scene(faces: Vec<FaceLandmarkSet>, objects: Vec<ObjectHit>) -> Self {
        Self { faces, objects }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkProvider for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_landmarks(&mut self, _frame: &Frame) -> Result<Vec<FaceLandmarkSet>> {
        Ok(self.faces.clone())
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_objects(&mut self, _frame: &Frame) -> Result<Vec<ObjectHit>> {
        Ok(self.objects.clone())
    }
}
