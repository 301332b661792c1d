//! plate-recognizer - recognize Korean license plates in still images
//!
//! Prints the recognition result as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plate_recognizer::config::{self, AppConfig};
use plate_recognizer::vision::{ModelManager, PaddleOcr, RecognitionPipeline, RegionStrategy};

/// plate-recognizer - Korean license plate recognition
#[derive(Parser, Debug)]
#[command(name = "plate-recognizer")]
#[command(about = "Recognize Korean license plates in still images")]
struct Args {
    /// Image file (JPEG, PNG, ...)
    #[arg(required_unless_present = "download_models")]
    image: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run OCR on the detected plate region instead of the full frame
    #[arg(long)]
    crop: bool,

    /// Only locate the plate region, skip OCR
    #[arg(long)]
    region_only: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Download the OCR models and exit
    #[arg(long)]
    download_models: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = load_configuration(args.config.as_deref())?;

    if args.download_models {
        let manager = ModelManager::for_settings(&config.ocr)?;
        let paths = manager.ensure_all_models()?;
        info!("Models ready in {:?}", manager.models_dir());
        print_json(&paths_summary(&paths), args.pretty)?;
        if args.image.is_none() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let Some(image_path) = args.image else {
        return Ok(ExitCode::SUCCESS);
    };

    if !image_path.exists() {
        print_json(
            &serde_json::json!({ "success": false, "error": "Image file not found" }),
            args.pretty,
        )?;
        return Ok(ExitCode::FAILURE);
    }

    let bytes = std::fs::read(&image_path)
        .with_context(|| format!("Failed to read image {:?}", image_path))?;

    let ocr = Arc::new(PaddleOcr::shared(config.ocr.clone()));
    let mut pipeline = RecognitionPipeline::from_config(ocr, &config)?;
    if args.crop {
        pipeline = pipeline.with_strategy(RegionStrategy::CropToRegion);
    }
    info!("Reading {:?} ({:?})", image_path, pipeline.strategy());

    if args.region_only {
        let (output, found) = match pipeline.find_plate_region(&bytes) {
            Ok(region) => (
                serde_json::json!({ "success": region.is_some(), "plate_region": region }),
                region.is_some(),
            ),
            Err(e) => (
                serde_json::json!({ "success": false, "error": e }),
                false,
            ),
        };
        print_json(&output, args.pretty)?;
        return Ok(exit_code(found));
    }

    let result = pipeline.recognize(&bytes);
    print_json(&result, args.pretty)?;

    Ok(exit_code(result.success))
}

/// Log to stderr; `RUST_LOG` directives win over the `-v` default
fn init_logging(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Explicit config file, else the default location, else built-in defaults
fn load_configuration(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => config::load_config(path),
        None => match config::default_config_path() {
            Ok(path) => config::load_or_default(&path),
            Err(e) => {
                warn!("Could not resolve config directory, using defaults: {}", e);
                Ok(AppConfig::default())
            }
        },
    }
}

fn paths_summary(paths: &plate_recognizer::vision::ModelPaths) -> serde_json::Value {
    serde_json::json!({
        "detection": paths.detection,
        "recognition": paths.recognition,
        "dictionary": paths.dictionary,
    })
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
