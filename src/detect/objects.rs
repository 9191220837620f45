use serde::{Deserialize, Serialize};

/// Detector label for a mobile phone (COCO class name).
pub const PHONE_LABEL: &str = "cell phone";

/// Normalized 0..1 box, origin top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectHit {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box", default)]
    pub bbox: BoundingBox,
}

impl ObjectHit {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn is_phone(&self) -> bool {
        self.label == PHONE_LABEL
    }
}
