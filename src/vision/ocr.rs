//! OCR engine seam
//!
//! The recognition pipeline only needs `read_text`; the concrete engine
//! (PaddleOCR via ONNX Runtime by default) is built once on first use and
//! shared by every caller through `SharedOcr`.

use anyhow::Result;
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::info;

use super::Quad;

/// Text recognition backend
pub trait OcrEngine: Send + Sync {
    /// Detect and read every text span in the image, in engine order
    fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrResult>>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "ocr"
    }
}

/// Single OCR detection result
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    /// Recognized text
    pub text: String,
    /// Bounding quad (top-left, top-right, bottom-right, bottom-left)
    pub polygon: Quad,
    /// Recognition confidence
    pub confidence: f32,
}

impl OcrResult {
    pub fn new(polygon: Quad, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            polygon,
            confidence,
        }
    }
}

type EngineFactory = Box<dyn Fn() -> Result<Box<dyn OcrEngine>> + Send + Sync>;

/// Process-wide OCR engine handle, constructed at most once
///
/// Concurrent first callers serialize on the construction guard; the factory
/// runs until it succeeds once and the engine is never rebuilt afterwards.
/// Readiness checks never wait on a construction in progress.
pub struct SharedOcr {
    factory: Option<EngineFactory>,
    engine: OnceLock<Arc<dyn OcrEngine>>,
    init: Mutex<()>,
}

impl SharedOcr {
    /// Handle that builds the engine on first use
    pub fn lazy<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn OcrEngine>> + Send + Sync + 'static,
    {
        Self {
            factory: Some(Box::new(factory)),
            engine: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Handle around an engine that already exists
    pub fn from_engine(engine: impl OcrEngine + 'static) -> Self {
        let engine: Arc<dyn OcrEngine> = Arc::new(engine);
        Self {
            factory: None,
            engine: OnceLock::from(engine),
            init: Mutex::new(()),
        }
    }

    /// Whether the engine has been constructed
    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }

    /// Get the engine, constructing it if this is the first use
    pub fn get(&self) -> Result<Arc<dyn OcrEngine>> {
        if let Some(engine) = self.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let _guard = self.init.lock();
        if let Some(engine) = self.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let Some(factory) = &self.factory else {
            anyhow::bail!("No OCR engine configured");
        };

        info!("Initializing OCR engine... (this may take a moment)");
        let engine: Arc<dyn OcrEngine> = Arc::from(factory()?);
        info!("OCR engine '{}' initialized successfully", engine.name());

        Ok(Arc::clone(self.engine.get_or_init(|| engine)))
    }
}

impl std::fmt::Debug for SharedOcr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedOcr")
            .field("ready", &self.is_ready())
            .finish()
    }
}
