//! Frame container.
//!
//! - `Frame`: one captured RGB8 image plus capture metadata.
//!
//! Frames are ephemeral. They are handed to detectors by reference and only
//! leave memory when the evidence store encodes one as a JPEG snapshot.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView, ImageEncoder};

use crate::Timestamp;

/// JPEG quality used for evidence snapshots.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 85;

/// Upper bound on an encoded JPEG accepted from a source.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// One captured frame, tightly packed RGB8 (`width * height * 3` bytes).
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: Timestamp,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Timestamp,
        sequence: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer length {} does not match {}x{} rgb ({} bytes)",
                pixels.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        })
    }

    /// Decode a JPEG (or any format the `image` crate was built with) into a frame.
    pub fn decode_jpeg(bytes: &[u8], captured_at: Timestamp, sequence: u64) -> Result<Self> {
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!("jpeg payload exceeds {} bytes", MAX_JPEG_BYTES));
        }
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let (width, height) = image.dimensions();
        let rgb = image.into_rgb8();
        Self::new(rgb.into_raw(), width, height, captured_at, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Encode as a baseline JPEG at the given quality (1..=100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .write_image(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode jpeg snapshot")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_test_frame(width: u32, height: u32) -> Frame {
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        for (i, p) in pixels.iter_mut().enumerate() {
            *p = (i % 251) as u8;
        }
        Frame::new(pixels, width, height, Utc::now(), 1).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, Utc::now(), 0).is_err());
        assert!(Frame::new(vec![], 0, 0, Utc::now(), 0).is_err());
    }

    #[test]
    fn jpeg_encode_then_decode_keeps_dimensions() {
        let frame = make_test_frame(32, 24);
        let jpeg = frame.encode_jpeg(SNAPSHOT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = Frame::decode_jpeg(&jpeg, Utc::now(), 2).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 24));
        assert_eq!(decoded.sequence, 2);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Frame::decode_jpeg(b"not an image", Utc::now(), 0).is_err());
    }
}
