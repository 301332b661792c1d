//! Model management for ONNX Runtime
//!
//! Downloads, caches and loads the PaddleOCR models used for Korean plate
//! text: a DBNet detector, the Korean recognizer and its dictionary.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::OcrSettings;

/// Environment variable that disables model downloads
pub const OFFLINE_ENV: &str = "PLATE_RECOGNIZER_OFFLINE";

/// PaddleOCR component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Korean text recognition model
    Recognition,
    /// Korean character dictionary for recognition
    Dictionary,
}

impl ModelType {
    /// Every model the OCR engine needs
    pub const ALL: [ModelType; 3] = [ModelType::Detection, ModelType::Recognition, ModelType::Dictionary];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "korean_rec.onnx",
            ModelType::Dictionary => "korean_dict.txt",
        }
    }

    /// PaddleOCR ONNX exports on Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/korean/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/korean/dict.txt"
            }
        }
    }

    /// Plausible file size range in bytes, used to reject truncated downloads
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (1_000_000, 10_000_000),
            ModelType::Recognition => (2_000_000, 40_000_000),
            ModelType::Dictionary => (1_000, 200_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Korean Text Recognition",
            ModelType::Dictionary => "Korean Character Dictionary",
        }
    }
}

/// Resolved locations of every model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix timestamp in seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches ONNX models in a single directory
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Manager rooted at `<data dir>/models`
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Manager with a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Manager for the configured directory, or the default one
    pub fn for_settings(settings: &OcrSettings) -> Result<Self> {
        match &settings.models_dir {
            Some(dir) => Self::with_dir(dir.clone()),
            None => Self::new(),
        }
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Check if all required models are available
    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&model_type| self.is_model_available(model_type))
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", model_type);
        self.download_model(model_type)?;

        Ok(path)
    }

    /// Make sure every model is on disk and return their paths
    pub fn ensure_all_models(&self) -> Result<ModelPaths> {
        Ok(ModelPaths {
            detection: self.ensure_model(ModelType::Detection)?,
            recognition: self.ensure_model(ModelType::Recognition)?,
            dictionary: self.ensure_model(ModelType::Dictionary)?,
        })
    }

    /// Download a specific model (blocking)
    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if std::env::var_os(OFFLINE_ENV).is_some() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let hash = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "Downloaded {} has an unexpected size",
                model_type.filename()
            );
        }

        self.record_download(model_type, hash)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    /// Record a finished download in the manifest
    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = match self.load_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Replacing unreadable model manifest: {}", e);
                ModelManifest::default()
            }
        };

        let metadata = std::fs::metadata(self.model_path(model_type))?;
        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: unix_now(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {:?}", manifest_path))?;
        Ok(manifest)
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Stream `url` into `path` through a temp file; returns the SHA-256 hex digest
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes from {}", downloaded, url);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Build an ONNX Runtime session, trying CUDA first when `use_gpu` is set
pub fn load_session(model_path: &Path, use_gpu: bool, intra_threads: usize) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    if !model_path.exists() {
        anyhow::bail!("ONNX model not found: {}", model_path.display());
    }

    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?;

    let builder = if use_gpu {
        use ort::execution_providers::CUDAExecutionProvider;
        match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
            Ok(builder) => {
                info!("CUDA acceleration enabled");
                builder
            }
            Err(e) => {
                warn!("CUDA not available, using CPU: {}", e);
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(intra_threads.max(1))?
            }
        }
    } else {
        builder
    };

    let session = builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;

    let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    debug!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

    Ok(session)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Detection.filename(), "det.onnx");
        assert_eq!(ModelType::Recognition.filename(), "korean_rec.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "korean_dict.txt");
        assert!(ModelType::Recognition.download_url().contains("korean"));
    }

    #[test]
    fn test_missing_models_are_not_ready() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();

        assert!(manager.models_dir().exists());
        assert!(!manager.are_models_ready());
        assert!(!manager.is_model_available(ModelType::Detection));
    }

    #[test]
    fn test_size_check_rejects_truncated_files() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        std::fs::write(manager.model_path(ModelType::Dictionary), "가\n나\n").unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));

        std::fs::write(manager.model_path(ModelType::Dictionary), "가\n".repeat(1000)).unwrap();
        assert!(manager.is_model_available(ModelType::Dictionary));
    }

    #[test]
    fn test_ensure_model_skips_download_when_present() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        std::fs::write(manager.model_path(ModelType::Dictionary), "가\n".repeat(1000)).unwrap();

        let path = manager.ensure_model(ModelType::Dictionary).unwrap();
        assert_eq!(path, dir.path().join("korean_dict.txt"));
    }

    #[test]
    fn test_for_settings_uses_override() {
        let dir = TempDir::new().unwrap();
        let settings = OcrSettings {
            models_dir: Some(dir.path().join("custom")),
            ..OcrSettings::default()
        };

        let manager = ModelManager::for_settings(&settings).unwrap();
        assert_eq!(manager.models_dir(), dir.path().join("custom"));
    }

    #[test]
    fn test_manifest_records_downloads() {
        let dir = TempDir::new().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        std::fs::write(manager.model_path(ModelType::Dictionary), "가\n".repeat(1000)).unwrap();
        manager
            .record_download(ModelType::Dictionary, "abc".to_string())
            .unwrap();
        manager
            .record_download(ModelType::Dictionary, "def".to_string())
            .unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.models.len(), 1);
        assert_eq!(manifest.models[0].sha256, "def");
        assert_eq!(manifest.models[0].filename, "korean_dict.txt");
    }
}
