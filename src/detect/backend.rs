use anyhow::Result;

use crate::detect::landmarks::FaceLandmarkSet;
use crate::detect::objects::ObjectHit;
use crate::frame::Frame;

/// Face-geometry model seam.
///
/// An `Err` means the model itself is unavailable and is fatal for the run.
/// An empty result is a valid answer ("no face in frame").
pub trait LandmarkProvider: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect_landmarks(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarkSet>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object-detection model seam. Same error contract as [`LandmarkProvider`].
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<ObjectHit>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The pair of detectors a session runs on every frame.
pub struct DetectorSet {
    pub landmarks: Box<dyn LandmarkProvider>,
    pub objects: Box<dyn ObjectDetector>,
}

impl DetectorSet {
    pub fn new(landmarks: Box<dyn LandmarkProvider>, objects: Box<dyn ObjectDetector>) -> Self {
        Self { landmarks, objects }
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.landmarks.warm_up()?;
        self.objects.warm_up()
    }
}
