//! One monitored subject, start to shutdown.
//!
//! A frame goes through detectors, pose, classification, the optional
//! sustain filter and the throttle gate. Admitted incidents get evidence (when
//! enabled) and are handed to the dispatcher without waiting on the network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::classify::{mouth_open, FrameSignals, SignalClassifier, Thresholds};
use crate::detect::DetectorSet;
use crate::dispatch::{DispatchStats, ReportDispatcher};
use crate::evidence::EvidenceStore;
use crate::frame::Frame;
use crate::ingest::{FrameRead, FrameSource};
use crate::pose::HeadPoseEstimator;
use crate::throttle::{CooldownScope, SustainFilter, ThrottleGate, ThrottleState};
use crate::{IncidentKind, IncidentReport, IncidentVerdict, SubjectId};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const PENDING_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(4);

/// What happened to one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    /// Verdict after the sustain filter.
    pub verdict: IncidentVerdict,
    /// Set when the gate admitted the verdict.
    pub report: Option<IncidentReport>,
    /// The admitted report made it into the dispatch queue.
    pub dispatched: bool,
}

/// Totals logged at shutdown.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSummary {
    pub subject_id: Option<SubjectId>,
    pub frames_processed: u64,
    pub incidents: BTreeMap<IncidentKind, u64>,
    /// Estimate of the backend's accumulated suspicion score.
    pub suspicion_estimate: f64,
    pub evidence_failures: u64,
    pub dispatch: DispatchStats,
}

impl SessionSummary {
    pub fn total_incidents(&self) -> u64 {
        self.incidents.values().sum()
    }
}

pub struct MonitoringSession {
    subject_id: SubjectId,
    detectors: DetectorSet,
    estimator: HeadPoseEstimator,
    classifier: SignalClassifier,
    sustain: SustainFilter,
    gate: ThrottleGate,
    evidence: Option<EvidenceStore>,
    dispatcher: ReportDispatcher,
    frames_processed: u64,
    incidents: BTreeMap<IncidentKind, u64>,
    suspicion_estimate: f64,
    evidence_failures: u64,
}

impl MonitoringSession {
    /// Session with default thresholds, a 4 s global cooldown, no sustain
    /// filter and no evidence capture.
    pub fn new(
        subject_id: SubjectId,
        detectors: DetectorSet,
        dispatcher: ReportDispatcher,
    ) -> Result<Self> {
        let throttle = ThrottleState::new(DEFAULT_COOLDOWN, CooldownScope::Global)?;
        Ok(Self {
            subject_id,
            detectors,
            estimator: HeadPoseEstimator::new(),
            classifier: SignalClassifier::default(),
            sustain: SustainFilter::default(),
            gate: ThrottleGate::new(subject_id, throttle),
            evidence: None,
            dispatcher,
            frames_processed: 0,
            incidents: BTreeMap::new(),
            suspicion_estimate: 0.0,
            evidence_failures: 0,
        })
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.classifier = SignalClassifier::new(thresholds);
        self
    }

    pub fn with_throttle(mut self, state: ThrottleState) -> Self {
        self.gate = ThrottleGate::new(self.subject_id, state);
        self
    }

    pub fn with_sustain_frames(mut self, min_frames: u32) -> Self {
        self.sustain = SustainFilter::new(min_frames);
        self
    }

    /// Capture evidence for admitted incidents. A disabled store is ignored.
    pub fn with_evidence(mut self, store: EvidenceStore) -> Self {
        self.evidence = store.is_enabled().then_some(store);
        self
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Raw signals for one frame. Pose failures become `None` for that face.
    pub fn collect_signals(&mut self, frame: &Frame) -> Result<FrameSignals> {
        let faces = self
            .detectors
            .landmarks
            .detect_landmarks(frame)
            .with_context(|| format!("landmark provider {}", self.detectors.landmarks.name()))?;
        let objects = self
            .detectors
            .objects
            .detect_objects(frame)
            .with_context(|| format!("object detector {}", self.detectors.objects.name()))?;

        let mouth_threshold = self.classifier.thresholds().mouth_open_pixels;
        let mut poses = Vec::with_capacity(faces.len());
        let mut mouths = Vec::with_capacity(faces.len());
        for face in &faces {
            let pose = match self.estimator.estimate(face, frame.width, frame.height) {
                Ok(pose) => Some(pose),
                Err(e) => {
                    log::debug!("frame {}: no pose ({})", frame.sequence, e);
                    None
                }
            };
            poses.push(pose);
            mouths.push(mouth_open(face, frame.height, mouth_threshold));
        }

        Ok(FrameSignals {
            poses,
            mouth_open: mouths,
            face_count: faces.len(),
            objects,
        })
    }

    /// Run one frame through the pipeline. The frame's capture time is the
    /// throttle clock and the evidence timestamp.
    ///
    /// Errors mean a detector is unavailable; evidence and dispatch failures
    /// are absorbed.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let signals = self.collect_signals(frame)?;
        let verdict = self.sustain.filter(self.classifier.classify(&signals));
        self.frames_processed += 1;

        let Some(report) = self.gate.admit(verdict.clone(), frame.captured_at) else {
            return Ok(FrameOutcome {
                verdict,
                report: None,
                dispatched: false,
            });
        };

        log::warn!(
            "incident {} for subject {}: {} (confidence {:.2})",
            report.kind,
            report.subject_id,
            report.description,
            report.confidence
        );
        *self.incidents.entry(report.kind).or_default() += 1;
        self.suspicion_estimate += report.suspicion_delta();

        let locator = self.evidence.as_ref().and_then(|store| {
            match store.save(frame, report.subject_id, report.kind, report.created_at) {
                Ok(locator) => {
                    log::info!("evidence saved: {}", locator);
                    Some(locator)
                }
                Err(e) => {
                    log::warn!("evidence capture failed, reporting without snapshot: {}", e);
                    None
                }
            }
        });
        if self.evidence.is_some() && locator.is_none() {
            self.evidence_failures += 1;
        }

        let report = report.with_snapshot(locator);
        let dispatched = self.dispatcher.dispatch(report.clone());
        Ok(FrameOutcome {
            verdict,
            report: Some(report),
            dispatched,
        })
    }

    /// Drive the session from `source` until `shutdown` is set or the source fails.
    ///
    /// The dispatcher is drained (bounded by its grace period) before returning.
    pub fn run(
        mut self,
        source: &mut dyn FrameSource,
        shutdown: &AtomicBool,
    ) -> Result<SessionSummary> {
        source.connect().context("connect frame source")?;
        log::info!(
            "monitoring subject {} from {}",
            self.subject_id,
            source.stats().source
        );

        let mut last_health_log = Instant::now();
        let outcome = loop {
            if shutdown.load(Ordering::SeqCst) {
                break Ok(());
            }

            match source.next_frame() {
                Ok(FrameRead::Frame(frame)) => {
                    if let Err(e) = self.process_frame(&frame) {
                        break Err(e);
                    }
                }
                Ok(FrameRead::Pending) => std::thread::sleep(PENDING_BACKOFF),
                Err(e) => break Err(e.context("frame source unavailable")),
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                let dispatch = self.dispatcher.stats();
                log::info!(
                    "source health={} frames={} processed={} incidents={} sent={} failed={} dropped={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    self.frames_processed,
                    self.incidents.values().sum::<u64>(),
                    dispatch.sent,
                    dispatch.failed,
                    dispatch.dropped
                );
                last_health_log = Instant::now();
            }
        };

        let summary = self.finish();
        outcome.map(|()| summary)
    }

    /// Close the dispatcher and collect totals.
    pub fn finish(mut self) -> SessionSummary {
        let dispatch = self.dispatcher.shutdown();
        let summary = SessionSummary {
            subject_id: Some(self.subject_id),
            frames_processed: self.frames_processed,
            incidents: std::mem::take(&mut self.incidents),
            suspicion_estimate: self.suspicion_estimate,
            evidence_failures: self.evidence_failures,
            dispatch,
        };
        log::info!(
            "session for subject {} ended: {} frames, {} incidents, suspicion estimate {:.1}, \
             dispatch sent={} failed={} dropped={}",
            self.subject_id,
            summary.frames_processed,
            summary.total_incidents(),
            summary.suspicion_estimate,
            dispatch.sent,
            dispatch.failed,
            dispatch.dropped
        );
        summary
    }
}
