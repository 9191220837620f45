//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic generator (`stub://` URLs, tests and dry runs)
//! - HTTP JPEG snapshot / MJPEG stream endpoints (`http(s)://` URLs)
//!
//! Sources are lazy, infinite and not restartable. A read either yields a
//! frame, reports that no frame is available yet (`FrameRead::Pending`, a
//! transient gap), or fails. A failed read means the source is unavailable and
//! is fatal for the monitoring run.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::Frame;

pub mod http;
pub mod synthetic;

pub use http::HttpJpegSource;
pub use synthetic::SyntheticSource;

/// Outcome of a single blocking read.
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    /// No frame yet. Not an error; the caller should try again.
    Pending,
}

/// Configuration shared by all sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<name>` or `http(s)://...`
    pub url: String,
    /// Target frame rate. Sources decimate to this rate.
    pub target_fps: u32,
    /// Frame width (synthetic frames only).
    pub width: u32,
    /// Frame height (synthetic frames only).
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub pending_reads: u64,
    pub source: String,
}

pub trait FrameSource: Send {
    /// Connect to the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Blocking read of the next frame.
    ///
    /// `Ok(FrameRead::Pending)` is a transient gap; `Err` means the source is gone.
    fn next_frame(&mut self) -> Result<FrameRead>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Open the source that matches the configured URL scheme.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if config.url.starts_with("http://") || config.url.starts_with("https://") {
        return Ok(Box::new(HttpJpegSource::new(config)?));
    }
    Err(anyhow!(
        "unsupported frame source '{}'; expected stub:// or http(s)://",
        config.url
    ))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_dispatches_on_scheme() {
        let stub = open_source(SourceConfig::default()).unwrap();
        assert_eq!(stub.stats().source, "stub://camera");

        let http = open_source(SourceConfig {
            url: "http://127.0.0.1:81/capture".to_string(),
            ..SourceConfig::default()
        })
        .unwrap();
        assert_eq!(http.stats().frames_captured, 0);

        let err = open_source(SourceConfig {
            url: "rtsp://camera/stream".to_string(),
            ..SourceConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("unsupported frame source"));
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(10), Duration::from_millis(2_000));
    }
}
