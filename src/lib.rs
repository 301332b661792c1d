//! plate-recognizer - Korean license plate recognition from still frames
//!
//! A frame goes through optional plate-region detection, OCR, fusion of
//! fragmented OCR spans and validation against the Korean plate grammars.
//! The OCR engine is pluggable; PaddleOCR on ONNX Runtime is the default.

pub mod config;
pub mod storage;
pub mod vision;

pub use config::AppConfig;
pub use vision::{
    ImageInput, OcrEngine, OcrResult, PaddleOcr, PatternValidator, PlateRegion, RecognitionError,
    RecognitionPipeline, RecognitionResult, RegionDetector, RegionStrategy, SharedOcr, TextBox,
    TextBoxMerger,
};
