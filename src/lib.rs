//! Proctor Kernel
//!
//! This crate implements the integrity-monitoring core for remote examinations.
//!
//! # Architecture
//!
//! Each frame flows through the same pipeline, independently of the frames before it:
//!
//! 1. **Ingest**: a `FrameSource` yields frames (or a transient "no frame yet").
//! 2. **Detect**: a `LandmarkProvider` and an `ObjectDetector` produce raw signals.
//! 3. **Pose**: every face landmark set is solved into yaw/pitch angles.
//! 4. **Classify**: a pure function fuses the signals into exactly one verdict.
//! 5. **Throttle**: a single-writer cooldown gate decides whether the verdict is reported.
//! 6. **Evidence + dispatch**: the frame is written as a snapshot and the report is
//!    handed to a bounded worker pool that talks to the grading backend.
//!
//! The only state carried between frames lives in the throttle gate (and the
//! optional sustain filter in front of it).
//!
//! # Module Structure
//!
//! - `frame`: Frame container and JPEG codec helpers
//! - `ingest`: Frame sources (synthetic, HTTP JPEG/MJPEG)
//! - `detect`: Landmark/object detector traits and backends
//! - `pose`, `classify`, `throttle`, `evidence`, `dispatch`, `transport`: pipeline stages
//! - `session`: per-frame orchestration
//! - `config`: `proctord` configuration loading; `ui`: console stages and summary
//! - Core types: SubjectId, IncidentKind, IncidentVerdict, IncidentReport

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod classify;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod pose;
pub mod session;
pub mod throttle;
pub mod transport;
pub mod ui;

pub use classify::{mouth_open, FrameSignals, SignalClassifier, Thresholds};
pub use detect::{
    BoundingBox, DetectorConfig, DetectorRegistry, DetectorSet, FaceLandmarkSet, LandmarkPoint,
    LandmarkProvider, ObjectDetector, ObjectHit, ReplayBackend, StubBackend,
};
pub use dispatch::{DispatchConfig, DispatchStats, ReportDispatcher};
pub use evidence::{EvidenceConfig, EvidenceError, EvidenceLocator, EvidenceStore};
pub use frame::Frame;
pub use ingest::{
    open_source, FrameRead, FrameSource, HttpJpegSource, SourceConfig, SourceStats,
    SyntheticSource,
};
pub use pose::{HeadPoseEstimator, PoseError, PoseEstimate, ANGLE_SCALE};
pub use session::{FrameOutcome, MonitoringSession, SessionSummary};
pub use throttle::{CooldownScope, SustainFilter, ThrottleGate, ThrottleState};
pub use transport::{BackendClient, BackendConfig, IncidentPayload, ReportSink, TransportError};

/// Wall-clock timestamp used for throttling, filenames and report metadata.
pub type Timestamp = DateTime<Utc>;

// -------------------- Subject --------------------

/// Identity of the monitored subject. Positive, fixed for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct SubjectId(u64);

impl SubjectId {
    pub fn new(id: u64) -> Result<Self> {
        if id == 0 {
            return Err(anyhow!("subject id must be a positive integer"));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for SubjectId {
    type Error = anyhow::Error;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SubjectId> for u64 {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -------------------- Incident Kinds --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    Safe,
    MobilePhoneDetected,
    MultipleFacesDetected,
    NoFaceDetected,
    LookingAway,
    SuspiciousAudio,
}

impl IncidentKind {
    pub const REPORTABLE: [IncidentKind; 5] = [
        IncidentKind::MobilePhoneDetected,
        IncidentKind::MultipleFacesDetected,
        IncidentKind::NoFaceDetected,
        IncidentKind::LookingAway,
        IncidentKind::SuspiciousAudio,
    ];

    /// Wire name, as the backend's incident enum spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentKind::Safe => "SAFE",
            IncidentKind::MobilePhoneDetected => "MOBILE_PHONE_DETECTED",
            IncidentKind::MultipleFacesDetected => "MULTIPLE_FACES_DETECTED",
            IncidentKind::NoFaceDetected => "NO_FACE_DETECTED",
            IncidentKind::LookingAway => "LOOKING_AWAY",
            IncidentKind::SuspiciousAudio => "SUSPICIOUS_AUDIO",
        }
    }

    pub fn is_safe(self) -> bool {
        self == IncidentKind::Safe
    }

    /// Base penalty the grading backend applies for this kind.
    ///
    /// Mirrors the backend's weighting so the session summary can estimate the
    /// score it is accumulating; the backend stays authoritative.
    pub fn suspicion_weight(self) -> f64 {
        match self {
            IncidentKind::Safe => 0.0,
            IncidentKind::MobilePhoneDetected | IncidentKind::MultipleFacesDetected => 20.0,
            IncidentKind::SuspiciousAudio => 10.0,
            IncidentKind::LookingAway | IncidentKind::NoFaceDetected => 5.0,
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Verdicts & Reports --------------------

/// Classifier output for one frame. Exactly one kind per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct IncidentVerdict {
    pub kind: IncidentKind,
    pub description: String,
    /// 0..=1
    pub confidence: f32,
}

impl IncidentVerdict {
    pub fn new(kind: IncidentKind, description: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind,
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn safe() -> Self {
        Self::new(IncidentKind::Safe, "No incident", 1.0)
    }

    pub fn is_safe(&self) -> bool {
        self.kind.is_safe()
    }
}

/// A verdict that passed throttling and is on its way to the backend.
///
/// Delivery failures are logged, never requeued.
#[derive(Clone, Debug, PartialEq)]
pub struct IncidentReport {
    pub subject_id: SubjectId,
    pub kind: IncidentKind,
    pub description: String,
    pub confidence: f32,
    pub snapshot_locator: Option<EvidenceLocator>,
    pub created_at: Timestamp,
}

impl IncidentReport {
    pub fn from_verdict(subject_id: SubjectId, verdict: IncidentVerdict, created_at: Timestamp) -> Self {
        Self {
            subject_id,
            kind: verdict.kind,
            description: verdict.description,
            confidence: verdict.confidence,
            snapshot_locator: None,
            created_at,
        }
    }

    pub fn with_snapshot(mut self, locator: Option<EvidenceLocator>) -> Self {
        self.snapshot_locator = locator;
        self
    }

    /// Backend penalty estimate: base weight scaled by confidence, floored at 0.5.
    pub fn suspicion_delta(&self) -> f64 {
        self.kind.suspicion_weight() * f64::from(self.confidence).max(0.5)
    }
}
