//! Application Configuration
//!
//! Recognizer settings stored in TOML format. Every section and key is
//! optional; missing values take their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::region::DEFAULT_ROI_MARGIN;
use crate::vision::RegionStrategy;

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Recognition pipeline settings
    pub recognition: RecognitionSettings,
    /// Plate grammar settings
    pub validation: ValidationSettings,
}

/// PaddleOCR engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Model directory; the platform data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
    /// Try CUDA before falling back to CPU
    pub use_gpu: bool,
    /// Longest side of the detection input
    pub det_limit_side: u32,
    /// Probability above which a map pixel counts as text
    pub det_threshold: f32,
    /// Minimum mean probability of a kept box
    pub box_threshold: f32,
    /// How far boxes are grown before recognition
    pub unclip_ratio: f32,
    /// Recognition input height
    pub rec_image_height: u32,
    /// Recognition input width cap
    pub rec_max_width: u32,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            use_gpu: false,
            det_limit_side: 960,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            rec_image_height: 48,
            rec_max_width: 640,
            intra_threads: 4,
        }
    }
}

/// Recognition pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Full-frame OCR, or OCR over the detected plate region
    pub region_strategy: RegionStrategy,
    /// Margin in pixels added around the detected region before cropping
    pub roi_margin: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            region_strategy: RegionStrategy::FullFrame,
            roi_margin: DEFAULT_ROI_MARGIN,
        }
    }
}

/// Plate grammar settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Extra regular expressions tried after the built-in plate grammars
    pub extra_patterns: Vec<String>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load `path` if it exists, otherwise the defaults
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    } else {
        info!("No configuration at {:?}, using defaults", path);
        Ok(AppConfig::default())
    }
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}
