//! Vision Layer
//!
//! Turns a still camera frame into a license plate string.
//! The work is split into:
//! - Plate region detection from contour geometry (`region`)
//! - OCR through a pluggable engine (`ocr`, `paddle`)
//! - Fusion of OCR fragments that belong to the same plate (`merge`)
//! - Plate grammar validation and result selection (`validate`, `pipeline`)

pub mod enhance;
pub mod geometry;
pub mod input;
pub mod merge;
pub mod models;
pub mod ocr;
pub mod paddle;
pub mod pipeline;
pub mod preprocess;
pub mod region;
pub mod validate;

use serde::{Deserialize, Serialize, Serializer};

pub use input::ImageInput;
pub use merge::TextBoxMerger;
pub use models::{ModelManager, ModelPaths, ModelType};
pub use ocr::{OcrEngine, OcrResult, SharedOcr};
pub use paddle::PaddleOcr;
pub use pipeline::{RecognitionError, RecognitionPipeline, RecognitionResult, RegionStrategy};
pub use region::{crop_region, RegionDetector};
pub use validate::PatternValidator;

/// Four corners of a text box: top-left, top-right, bottom-right, bottom-left
pub type Quad = [(f32, f32); 4];

/// One OCR fragment, either returned by the engine or synthesized by fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    /// Recognized text
    pub text: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Corner points in image pixel space
    #[serde(rename = "bbox")]
    pub quad: Quad,
    /// True when the box was produced by fusing several fragments
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merged: bool,
}

impl TextBox {
    /// Create a fragment as returned by the OCR engine
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_confidence(confidence),
            quad,
            merged: false,
        }
    }

    /// Create a fused candidate
    pub fn fused(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            merged: true,
            ..Self::new(quad, text, confidence)
        }
    }

    /// Number of characters (a Hangul syllable counts as one)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Candidate plate rectangle found by the region detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// width / height
    pub aspect_ratio: f32,
}

impl PlateRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        let aspect_ratio = if height == 0 {
            0.0
        } else {
            width as f32 / height as f32
        };
        Self {
            x,
            y,
            width,
            height,
            aspect_ratio,
        }
    }

    /// Get bounding box as (x, y, width, height)
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }
}

// Serialized as `[x, y, w, h]`
impl Serialize for PlateRegion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bounds().serialize(serializer)
    }
}

/// Clamp a confidence into [0, 1], mapping NaN to 0
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: Quad = [(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)];

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(TextBox::new(QUAD, "a", 1.7).confidence, 1.0);
        assert_eq!(TextBox::new(QUAD, "a", -0.2).confidence, 0.0);
        assert_eq!(TextBox::new(QUAD, "a", f32::NAN).confidence, 0.0);
        assert_eq!(TextBox::fused(QUAD, "a", 0.4).confidence, 0.4);
    }

    #[test]
    fn test_char_len_counts_syllables() {
        let text_box = TextBox::new(QUAD, "12가3456", 0.9);
        assert_eq!(text_box.char_len(), 7);
    }

    #[test]
    fn test_text_box_json_shape() {
        let original = serde_json::to_value(TextBox::new(QUAD, "12", 0.5)).unwrap();
        assert!(original.get("merged").is_none());
        assert_eq!(original["bbox"][2], serde_json::json!([10.0, 5.0]));

        let fused = serde_json::to_value(TextBox::fused(QUAD, "12", 0.5)).unwrap();
        assert_eq!(fused["merged"], serde_json::json!(true));
    }

    #[test]
    fn test_plate_region_serializes_as_array() {
        let region = PlateRegion::new(10, 20, 320, 100);
        assert!((region.aspect_ratio - 3.2).abs() < 1e-6);
        assert_eq!(
            serde_json::to_value(region).unwrap(),
            serde_json::json!([10, 20, 320, 100])
        );
    }
}
