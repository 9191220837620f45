//! Per-frame signal fusion.
//!
//! [`SignalClassifier::classify`] is pure: the same [`FrameSignals`] always
//! produce the same [`IncidentVerdict`]. Conflicts resolve by a fixed priority
//! so a frame never yields more than one incident.

use crate::detect::{index, FaceLandmarkSet, ObjectHit};
use crate::pose::PoseEstimate;
use crate::{IncidentKind, IncidentVerdict};

/// Classifier tuning. Angles are compared against [`crate::ANGLE_SCALE`]d pose output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub yaw_threshold_degrees: f64,
    pub pitch_threshold_degrees: f64,
    pub mouth_open_pixels: f64,
    pub phone_confidence_min: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            yaw_threshold_degrees: 25.0,
            pitch_threshold_degrees: 15.0,
            mouth_open_pixels: 25.0,
            phone_confidence_min: 0.5,
        }
    }
}

/// Raw detector and geometry output for one frame.
///
/// `poses` and `mouth_open` are indexed by face; a `None` pose means the solve
/// failed for that face.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSignals {
    pub poses: Vec<Option<PoseEstimate>>,
    pub mouth_open: Vec<bool>,
    pub face_count: usize,
    pub objects: Vec<ObjectHit>,
}

impl FrameSignals {
    /// Signals for a frame in which exactly one face was found.
    pub fn single_face(pose: Option<PoseEstimate>, mouth_open: bool) -> Self {
        Self {
            poses: vec![pose],
            mouth_open: vec![mouth_open],
            face_count: 1,
            objects: Vec::new(),
        }
    }

    pub fn with_objects(mut self, objects: Vec<ObjectHit>) -> Self {
        self.objects = objects;
        self
    }
}

/// Lip gap in pixels exceeds `threshold_pixels`.
///
/// Missing lip points count as a closed mouth.
pub fn mouth_open(landmarks: &FaceLandmarkSet, image_height: u32, threshold_pixels: f64) -> bool {
    let (Some(upper), Some(lower)) = (
        landmarks.point(index::UPPER_LIP),
        landmarks.point(index::LOWER_LIP),
    ) else {
        return false;
    };
    let gap = (f64::from(lower.y) - f64::from(upper.y)) * f64::from(image_height);
    gap > threshold_pixels
}

#[derive(Clone, Debug, Default)]
pub struct SignalClassifier {
    thresholds: Thresholds,
}

impl SignalClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Fuse one frame's signals into a single verdict.
    ///
    /// Priority, first match wins: phone, multiple faces, no face, looking
    /// away (right, left, down), mouth open, safe.
    pub fn classify(&self, signals: &FrameSignals) -> IncidentVerdict {
        let t = &self.thresholds;

        if signals
            .objects
            .iter()
            .any(|hit| hit.is_phone() && hit.confidence > t.phone_confidence_min)
        {
            return IncidentVerdict::new(
                IncidentKind::MobilePhoneDetected,
                "Cell phone visible in frame",
                0.95,
            );
        }

        match signals.face_count {
            0 => {
                return IncidentVerdict::new(IncidentKind::NoFaceDetected, "User left frame", 0.9);
            }
            1 => {}
            n => {
                return IncidentVerdict::new(
                    IncidentKind::MultipleFacesDetected,
                    format!("Multiple faces detected ({n})"),
                    1.0,
                );
            }
        }

        if let Some(pose) = signals.poses.first().copied().flatten() {
            if pose.yaw_degrees < -t.yaw_threshold_degrees {
                return IncidentVerdict::new(IncidentKind::LookingAway, "Looking right", 0.8);
            }
            if pose.yaw_degrees > t.yaw_threshold_degrees {
                return IncidentVerdict::new(IncidentKind::LookingAway, "Looking left", 0.8);
            }
            if pose.pitch_degrees < -t.pitch_threshold_degrees {
                return IncidentVerdict::new(IncidentKind::LookingAway, "Looking down", 0.7);
            }
        }

        if signals.mouth_open.first().copied().unwrap_or(false) {
            return IncidentVerdict::new(
                IncidentKind::SuspiciousAudio,
                "Mouth open / Talking",
                0.6,
            );
        }

        IncidentVerdict::safe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, LandmarkPoint};

    fn pose(yaw: f64, pitch: f64) -> Option<PoseEstimate> {
        Some(PoseEstimate {
            yaw_degrees: yaw,
            pitch_degrees: pitch,
            nose_anchor: (0, 0),
        })
    }

    fn phone(confidence: f32) -> ObjectHit {
        ObjectHit::new("cell phone", confidence, BoundingBox::default())
    }

    fn classify(signals: &FrameSignals) -> IncidentVerdict {
        SignalClassifier::default().classify(signals)
    }

    #[test]
    fn yaw_thresholds_pick_direction() {
        let right = classify(&FrameSignals::single_face(pose(-30.0, 0.0), false));
        assert_eq!(right.kind, IncidentKind::LookingAway);
        assert_eq!(right.description, "Looking right");
        assert_eq!(right.confidence, 0.8);

        let left = classify(&FrameSignals::single_face(pose(30.0, 0.0), false));
        assert_eq!(left.kind, IncidentKind::LookingAway);
        assert_eq!(left.description, "Looking left");

        let nominal = classify(&FrameSignals::single_face(pose(10.0, 0.0), false));
        assert!(nominal.is_safe());
    }

    #[test]
    fn looking_down_only_on_negative_pitch() {
        let down = classify(&FrameSignals::single_face(pose(0.0, -20.0), false));
        assert_eq!(down.description, "Looking down");
        assert_eq!(down.confidence, 0.7);

        let up = classify(&FrameSignals::single_face(pose(0.0, 20.0), false));
        assert!(up.is_safe());
    }

    #[test]
    fn phone_wins_over_multiple_faces() {
        let signals = FrameSignals {
            poses: vec![pose(40.0, 0.0), pose(0.0, 0.0)],
            mouth_open: vec![true, false],
            face_count: 2,
            objects: vec![phone(0.9)],
        };
        let verdict = classify(&signals);
        assert_eq!(verdict.kind, IncidentKind::MobilePhoneDetected);
        assert_eq!(verdict.confidence, 0.95);
    }

    #[test]
    fn phone_confidence_must_exceed_floor() {
        let at_floor =
            FrameSignals::single_face(pose(0.0, 0.0), false).with_objects(vec![phone(0.5)]);
        assert!(classify(&at_floor).is_safe());

        let other = FrameSignals::single_face(pose(0.0, 0.0), false).with_objects(vec![
            ObjectHit::new("book", 0.99, BoundingBox::default()),
        ]);
        assert!(classify(&other).is_safe());
    }

    #[test]
    fn no_face_ignores_stale_pose() {
        let signals = FrameSignals {
            poses: vec![pose(-50.0, -50.0)],
            mouth_open: vec![true],
            face_count: 0,
            objects: Vec::new(),
        };
        let verdict = classify(&signals);
        assert_eq!(verdict.kind, IncidentKind::NoFaceDetected);
        assert_eq!(verdict.confidence, 0.9);
    }

    #[test]
    fn multiple_faces_beat_gaze() {
        let signals = FrameSignals {
            poses: vec![pose(-50.0, 0.0), None],
            mouth_open: vec![false, false],
            face_count: 3,
            objects: Vec::new(),
        };
        let verdict = classify(&signals);
        assert_eq!(verdict.kind, IncidentKind::MultipleFacesDetected);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn failed_pose_falls_through_to_mouth() {
        let verdict = classify(&FrameSignals::single_face(None, true));
        assert_eq!(verdict.kind, IncidentKind::SuspiciousAudio);
        assert_eq!(verdict.confidence, 0.6);

        assert!(classify(&FrameSignals::single_face(None, false)).is_safe());
    }

    #[test]
    fn gaze_beats_mouth() {
        let verdict = classify(&FrameSignals::single_face(pose(30.0, 0.0), true));
        assert_eq!(verdict.kind, IncidentKind::LookingAway);
    }

    #[test]
    fn custom_thresholds_apply() {
        let classifier = SignalClassifier::new(Thresholds {
            yaw_threshold_degrees: 5.0,
            ..Thresholds::default()
        });
        let verdict = classifier.classify(&FrameSignals::single_face(pose(10.0, 0.0), false));
        assert_eq!(verdict.description, "Looking left");
    }

    #[test]
    fn mouth_open_measures_lip_gap_in_pixels() {
        let closed = FaceLandmarkSet::frontal();
        assert!(!mouth_open(&closed, 480, 25.0));

        // 0.1 of 480 px = 48 px
        let open = FaceLandmarkSet::frontal()
            .with_point(index::LOWER_LIP, LandmarkPoint::new(0.5, 0.70, 0.0));
        assert!(mouth_open(&open, 480, 25.0));
        assert!(!mouth_open(&open, 480, 60.0));

        let missing = FaceLandmarkSet::new(vec![LandmarkPoint::default(); 10]);
        assert!(!mouth_open(&missing, 480, 25.0));
    }
}
