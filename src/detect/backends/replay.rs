//! Replay backend: precomputed detector output, one JSON object per line.
//!
//! Lets an external model process (or a recorded session) drive the pipeline.
//! Entry `n` is served for the frame with sequence `n + 1`; the file wraps
//! around when the source outlives it.
//!
//! ```text
//! {"faces": [{"points": [[0.41, 0.42, 0.01], ...]}], "objects": []}
//! {"faces": [], "objects": [{"label": "cell phone", "confidence": 0.81, "box": {"x": 0.1, "y": 0.2, "w": 0.1, "h": 0.2}}]}
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::detect::backend::{LandmarkProvider, ObjectDetector};
use crate::detect::landmarks::FaceLandmarkSet;
use crate::detect::objects::ObjectHit;
use crate::frame::Frame;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayEntry {
    #[serde(default)]
    pub faces: Vec<FaceLandmarkSet>,
    #[serde(default)]
    pub objects: Vec<ObjectHit>,
}

/// Shared, immutable replay script. Cloning is cheap; landmark and object
/// halves index by frame sequence, so they stay in lockstep without shared state.
#[derive(Clone, Debug)]
pub struct ReplayBackend {
    entries: Arc<Vec<ReplayEntry>>,
}

impl ReplayBackend {
    pub fn new(entries: Vec<ReplayEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(anyhow!("replay script has no entries"));
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid replay file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(line)
                .map_err(|e| anyhow!("line {}: {}", lineno + 1, e))?;
            entries.push(entry);
        }
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_for(&self, frame: &Frame) -> &ReplayEntry {
        let idx = (frame.sequence.saturating_sub(1) % self.entries.len() as u64) as usize;
        &self.entries[idx]
    }
}

impl LandmarkProvider for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect_landmarks(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarkSet>> {
        Ok(self.entry_for(frame).faces.clone())
    }
}

impl ObjectDetector for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<ObjectHit>> {
        Ok(self.entry_for(frame).objects.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(sequence: u64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, Utc::now(), sequence).unwrap()
    }

    const SCRIPT: &str = r#"
# two faces, then a phone
{"faces": [{"points": [[0.1, 0.1, 0.0]]}, {"points": [[0.9, 0.9, 0.0]]}]}

{"objects": [{"label": "cell phone", "confidence": 0.8}]}
"#;

    #[test]
    fn replay_follows_frame_sequence_and_wraps() -> Result<()> {
        let mut backend = ReplayBackend::parse(SCRIPT)?;
        assert_eq!(backend.len(), 2);

        assert_eq!(backend.detect_landmarks(&frame(1))?.len(), 2);
        assert!(backend.detect_objects(&frame(1))?.is_empty());

        assert!(backend.detect_landmarks(&frame(2))?.is_empty());
        let hits = backend.detect_objects(&frame(2))?;
        assert!(hits[0].is_phone());

        assert_eq!(backend.detect_landmarks(&frame(3))?.len(), 2);
        Ok(())
    }

    #[test]
    fn replay_reports_bad_line_numbers() {
        let err = ReplayBackend::parse("{\"faces\": []}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn empty_replay_is_rejected() {
        assert!(ReplayBackend::parse("# nothing here\n").is_err());
    }
}
