//! Plate recognition pipeline
//!
//! decode -> (optional plate crop) -> OCR -> fragment fusion -> grammar
//! validation -> result selection. Failures never escape `recognize`: they
//! are attached to the result next to whatever was computed before them.

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize, Serializer};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::geometry::translate;
use super::input::ImageInput;
use super::merge::TextBoxMerger;
use super::ocr::SharedOcr;
use super::region::{crop_region, RegionDetector, DEFAULT_ROI_MARGIN};
use super::validate::PatternValidator;
use super::{PlateRegion, TextBox};
use crate::config::AppConfig;

/// Fallback candidates with at least this many characters count as success
const MIN_FALLBACK_CHARS: usize = 4;

/// Failure attached to a recognition result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    /// Bytes could not be decoded, or the bitmap is empty
    #[error("Invalid image")]
    InvalidImage,
    /// The OCR engine could not be constructed or failed while reading
    #[error("OCR engine failure: {0}")]
    OcrEngineFailure(String),
    /// Unexpected failure inside the pipeline
    #[error("Internal error: {0}")]
    InternalError(String),
}

// Serialized as its display message
impl Serialize for RecognitionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where OCR runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStrategy {
    /// OCR over the whole frame
    #[default]
    FullFrame,
    /// OCR over the detected plate region, falling back to the whole frame
    CropToRegion,
}

/// Outcome of one recognition call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// A plate was validated, or the fallback candidate is long enough
    pub success: bool,
    /// Validated plate, or the raw text of the fallback candidate
    pub plate_number: Option<String>,
    /// Confidence of the candidate that produced `plate_number`
    pub confidence: f32,
    /// OCR fragments followed by fused candidates
    pub all_texts: Vec<TextBox>,
    /// Detected plate rectangle (crop strategy only)
    pub plate_region: Option<PlateRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RecognitionError>,
}

/// Plate recognizer over a shared OCR engine
#[derive(Debug, Clone)]
pub struct RecognitionPipeline {
    ocr: Arc<SharedOcr>,
    detector: RegionDetector,
    merger: TextBoxMerger,
    validator: PatternValidator,
    strategy: RegionStrategy,
    roi_margin: u32,
}

impl RecognitionPipeline {
    /// Full-frame pipeline with the built-in plate grammars
    pub fn new(ocr: Arc<SharedOcr>) -> Self {
        Self {
            ocr,
            detector: RegionDetector::new(),
            merger: TextBoxMerger::new(),
            validator: PatternValidator::new(),
            strategy: RegionStrategy::default(),
            roi_margin: DEFAULT_ROI_MARGIN,
        }
    }

    /// Pipeline configured from the `[recognition]` and `[validation]` sections
    pub fn from_config(ocr: Arc<SharedOcr>, config: &AppConfig) -> Result<Self> {
        let validator = PatternValidator::with_extra_patterns(&config.validation.extra_patterns)?;

        Ok(Self {
            validator,
            strategy: config.recognition.region_strategy,
            roi_margin: config.recognition.roi_margin,
            ..Self::new(ocr)
        })
    }

    pub fn with_strategy(mut self, strategy: RegionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> RegionStrategy {
        self.strategy
    }

    /// Locate the plate rectangle only, without running OCR
    pub fn find_plate_region<'a>(
        &self,
        image: impl Into<ImageInput<'a>>,
    ) -> Result<Option<PlateRegion>, RecognitionError> {
        let decoded = decode(image.into())?;
        Ok(self.detector.find_plate_region(&decoded))
    }

    /// Recognize the plate in a still frame
    pub fn recognize<'a>(&self, image: impl Into<ImageInput<'a>>) -> RecognitionResult {
        let start = Instant::now();
        let input = image.into();
        let mut result = RecognitionResult::default();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(input, &mut result)));
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(RecognitionError::InternalError(panic_message(payload.as_ref()))),
        };

        if let Some(e) = error {
            warn!("Plate recognition failed: {}", e);
            result.error = Some(e);
        }

        debug!(
            "Recognition in {:?}: success={} plate={:?} candidates={}",
            start.elapsed(),
            result.success,
            result.plate_number,
            result.all_texts.len()
        );
        result
    }

    fn run(&self, input: ImageInput<'_>, result: &mut RecognitionResult) -> Result<(), RecognitionError> {
        let image = decode(input)?;

        let (frame, (dx, dy)) = match self.strategy {
            RegionStrategy::FullFrame => (image, (0, 0)),
            RegionStrategy::CropToRegion => match self.detector.find_plate_region(&image) {
                Some(region) => {
                    result.plate_region = Some(region);
                    let (roi, origin) = crop_region(&image, &region, self.roi_margin);
                    (Cow::Owned(roi), origin)
                }
                None => {
                    debug!("No plate region found, reading the full frame");
                    (image, (0, 0))
                }
            },
        };

        let engine = self
            .ocr
            .get()
            .map_err(|e| RecognitionError::OcrEngineFailure(format!("{:#}", e)))?;
        let fragments = engine
            .read_text(&frame)
            .map_err(|e| RecognitionError::OcrEngineFailure(format!("{:#}", e)))?;

        let mut boxes: Vec<TextBox> = fragments
            .into_iter()
            .map(|fragment| {
                TextBox::new(
                    translate(&fragment.polygon, dx as f32, dy as f32),
                    normalize_text(&fragment.text),
                    fragment.confidence,
                )
            })
            .collect();

        let fused = self.merger.merge_nearby(&boxes);
        boxes.extend(fused);
        result.all_texts = boxes;

        self.select(result);
        Ok(())
    }

    /// Pick the plate from `all_texts`: first validated candidate, else the
    /// most confident one
    fn select(&self, result: &mut RecognitionResult) {
        let validated = result.all_texts.iter().find_map(|candidate| {
            self.validator
                .validate(&candidate.text)
                .map(|plate| (plate, candidate.confidence))
        });

        if let Some((plate, confidence)) = validated {
            result.success = true;
            result.plate_number = Some(plate);
            result.confidence = confidence;
            return;
        }

        // First occurrence wins on ties
        let best = result.all_texts.iter().fold(None, |best: Option<&TextBox>, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        });

        match best {
            Some(candidate) => {
                result.success = candidate.char_len() >= MIN_FALLBACK_CHARS;
                result.plate_number = Some(candidate.text.clone());
                result.confidence = candidate.confidence;
            }
            None => {
                result.success = false;
                result.plate_number = None;
                result.confidence = 0.0;
            }
        }
    }
}

fn decode(input: ImageInput<'_>) -> Result<Cow<'_, DynamicImage>, RecognitionError> {
    let image = match input {
        ImageInput::Encoded(bytes) => {
            let decoded = image::load_from_memory(bytes).map_err(|e| {
                debug!("Image decode failed: {}", e);
                RecognitionError::InvalidImage
            })?;
            Cow::Owned(decoded)
        }
        ImageInput::Decoded(image) => Cow::Borrowed(image),
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(RecognitionError::InvalidImage);
    }
    Ok(image)
}

/// OCR text with spaces and hyphens removed
fn normalize_text(text: &str) -> String {
    text.chars().filter(|c| *c != ' ' && *c != '-').collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic during recognition".to_string()
    }
}
