//! HTTP camera source.
//!
//! `HttpJpegSource` ingests frames from webcam bridges that expose either a
//! single JPEG snapshot endpoint or an MJPEG `multipart/x-mixed-replace`
//! stream, decided by the response `Content-Type` at connect time.
//!
//! Network hiccups are transient: a failed fetch is reported as
//! `FrameRead::Pending` and the stream is re-opened on the next read. Only a
//! long run of consecutive failures marks the source unavailable.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::io::Read;
use std::time::{Duration, Instant};

use super::{frame_interval, health_grace, FrameRead, FrameSource, SourceConfig, SourceStats};
use crate::frame::{Frame, MAX_JPEG_BYTES};

/// Consecutive failed reads after which the source is considered gone.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpJpegSource {
    config: SourceConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    pending_reads: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpJpegSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = url::Url::parse(&config.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout_read(REQUEST_TIMEOUT)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            pending_reads: 0,
            consecutive_failures: 0,
            last_error: None,
        })
    }

    fn open_stream(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        Ok(())
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        if self.stream.is_none() {
            self.open_stream()?;
        }
        match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::SingleJpeg) => fetch_single_jpeg(&self.agent, &self.config.url),
            None => Err(anyhow!("camera stream not open")),
        }
    }

    fn record_failure(&mut self, err: anyhow::Error) -> Result<FrameRead> {
        self.consecutive_failures += 1;
        self.pending_reads += 1;
        self.stream = None;
        let message = format!("{:#}", err);
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            return Err(anyhow!(
                "camera source unavailable after {} consecutive failures: {}",
                self.consecutive_failures,
                message
            ));
        }
        log::debug!("camera read failed (transient): {}", message);
        self.last_error = Some(message);
        Ok(FrameRead::Pending)
    }
}

impl FrameSource for HttpJpegSource {
    fn connect(&mut self) -> Result<()> {
        self.open_stream()?;
        self.connected_at = Some(Instant::now());
        log::info!("HttpJpegSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<FrameRead> {
        if self.connected_at.is_none() {
            return Err(anyhow!("camera source not connected; call connect() first"));
        }
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            if matches!(self.stream, Some(HttpStream::SingleJpeg) | None) {
                if let Some(last) = self.last_frame_at {
                    let elapsed = last.elapsed();
                    if elapsed < min_interval {
                        std::thread::sleep(min_interval - elapsed);
                    }
                }
            }

            let jpeg_bytes = match self.read_jpeg() {
                Ok(bytes) => bytes,
                Err(err) => return self.record_failure(err),
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = match Frame::decode_jpeg(&jpeg_bytes, Utc::now(), self.frame_count + 1) {
                Ok(frame) => frame,
                Err(err) => return self.record_failure(err),
            };
            self.frame_count += 1;
            self.consecutive_failures = 0;
            self.last_error = None;
            self.last_frame_at = Some(now);
            return Ok(FrameRead::Frame(frame));
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            pending_reads: self.pending_reads,
            source: self.config.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first complete SOI..EOI JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
