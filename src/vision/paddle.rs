//! PaddleOCR engine on ONNX Runtime
//!
//! Two networks: a DBNet text detector producing a probability map, and a
//! CTC recognizer reading each detected box against the Korean dictionary.

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use ndarray::{ArrayView2, Axis, Ix3, Ix4};
use ort::{inputs, session::Session, value::TensorRef};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::geometry::{min_area_rect, order_corners, rect_sides, unclip};
use super::models::{load_session, ModelManager, ModelPaths};
use super::ocr::{OcrEngine, OcrResult, SharedOcr};
use super::preprocess::{
    crop_quad, resize_for_detection, resize_for_recognition, to_nchw, DET_MEAN, DET_STD, REC_MEAN,
    REC_STD,
};
use super::Quad;
use crate::config::OcrSettings;

/// Boxes with a short side below this many pixels are dropped
const MIN_BOX_SIDE: f32 = 3.0;
/// Upper bound on contours examined per frame
const MAX_CANDIDATES: usize = 1000;
/// Boxes whose top edges differ by less than this are treated as one row
const ROW_TOLERANCE: f32 = 10.0;

/// PaddleOCR detector + recognizer pair
pub struct PaddleOcr {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    /// Index 0 is the CTC blank
    dictionary: Vec<String>,
    settings: OcrSettings,
}

impl PaddleOcr {
    /// Load both networks and the dictionary from explicit paths
    pub fn new(paths: &ModelPaths, settings: &OcrSettings) -> Result<Self> {
        let dictionary = load_dictionary(&paths.dictionary)?;
        info!("Loaded character dictionary with {} entries", dictionary.len());

        let detector = load_session(&paths.detection, settings.use_gpu, settings.intra_threads)
            .context("Failed to load text detection model")?;
        let recognizer = load_session(&paths.recognition, settings.use_gpu, settings.intra_threads)
            .context("Failed to load text recognition model")?;

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            dictionary,
            settings: settings.clone(),
        })
    }

    /// Resolve (downloading if needed) the models for `settings`, then load them
    pub fn from_settings(settings: &OcrSettings) -> Result<Self> {
        let manager = ModelManager::for_settings(settings)?;
        let paths = manager.ensure_all_models()?;
        Self::new(&paths, settings)
    }

    /// Shared handle that loads the engine on first use
    pub fn shared(settings: OcrSettings) -> SharedOcr {
        SharedOcr::lazy(move || {
            let engine = PaddleOcr::from_settings(&settings)?;
            Ok(Box::new(engine) as Box<dyn OcrEngine>)
        })
    }

    /// Text quads in source image coordinates, in reading order
    fn detect(&self, image: &RgbImage) -> Result<Vec<Quad>> {
        let input = resize_for_detection(image, self.settings.det_limit_side);
        let tensor = to_nchw(&input.image, &DET_MEAN, &DET_STD);

        let input_ref: TensorRef<f32> = TensorRef::from_array_view(&tensor)?;
        let probability = {
            let mut session = self.detector.lock();
            let outputs = session
                .run(inputs![input_ref])
                .context("Detection inference failed")?;
            let output = outputs[0].try_extract_array::<f32>()?;
            output
                .into_owned()
                .into_dimensionality::<Ix4>()
                .context("Unexpected detection output shape")?
        };

        let map = probability.index_axis(Axis(0), 0);
        let map = map.index_axis(Axis(0), 0);
        Ok(db_postprocess(map, &self.settings, input.scale, image.dimensions()))
    }

    /// Read one text crop
    fn recognize(&self, crop: &RgbImage) -> Result<(String, f32)> {
        let resized = resize_for_recognition(
            crop,
            self.settings.rec_image_height,
            self.settings.rec_max_width,
        );
        let tensor = to_nchw(&resized, &REC_MEAN, &REC_STD);

        let input_ref: TensorRef<f32> = TensorRef::from_array_view(&tensor)?;
        let probabilities = {
            let mut session = self.recognizer.lock();
            let outputs = session
                .run(inputs![input_ref])
                .context("Recognition inference failed")?;
            let output = outputs[0].try_extract_array::<f32>()?;
            output
                .into_owned()
                .into_dimensionality::<Ix3>()
                .context("Unexpected recognition output shape")?
        };

        Ok(ctc_greedy_decode(
            probabilities.index_axis(Axis(0), 0),
            &self.dictionary,
        ))
    }
}

impl OcrEngine for PaddleOcr {
    fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrResult>> {
        let start = Instant::now();
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Ok(Vec::new());
        }

        let quads = self.detect(&rgb)?;
        let mut results = Vec::with_capacity(quads.len());

        for quad in quads {
            let Some(crop) = crop_quad(&rgb, &quad) else {
                continue;
            };

            let (text, confidence) = self.recognize(&crop)?;
            if text.is_empty() {
                continue;
            }
            results.push(OcrResult::new(quad, text, confidence));
        }

        debug!(
            "PaddleOCR read {} text spans in {:?}",
            results.len(),
            start.elapsed()
        );
        Ok(results)
    }

    fn name(&self) -> &str {
        "PaddleOCR"
    }
}

fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {}", path.display()))?;
    Ok(parse_dictionary(&content))
}

/// One entry per line behind the CTC blank, with a trailing space entry
fn parse_dictionary(content: &str) -> Vec<String> {
    let mut dictionary = vec![String::new()];
    dictionary.extend(content.lines().map(|line| line.trim_end_matches('\r').to_string()));
    dictionary.push(" ".to_string());
    dictionary
}

/// Greedy CTC decoding over a [time, classes] probability matrix
///
/// Repeated indices collapse and blanks (index 0) are dropped; the confidence
/// is the mean probability of the emitted characters.
fn ctc_greedy_decode(probabilities: ArrayView2<f32>, dictionary: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut total = 0.0;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for row in probabilities.rows() {
        let Some((index, &probability)) = row.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))
        else {
            continue;
        };

        if index != 0 && index != previous {
            if let Some(entry) = dictionary.get(index) {
                text.push_str(entry);
                total += probability;
                emitted += 1;
            }
        }
        previous = index;
    }

    let confidence = if emitted == 0 { 0.0 } else { total / emitted as f32 };
    (text, confidence)
}

/// Turn a DBNet probability map into text quads in source coordinates
fn db_postprocess(
    map: ArrayView2<f32>,
    settings: &OcrSettings,
    scale: (f32, f32),
    source: (u32, u32),
) -> Vec<Quad> {
    let (rows, cols) = map.dim();
    let binary = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        if map[[y as usize, x as usize]] > settings.det_threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let mut quads = Vec::new();
    for contour in find_contours::<i32>(&binary)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .take(MAX_CANDIDATES)
    {
        let points: Vec<(f32, f32)> = contour
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect();

        let Some(rect) = min_area_rect(&points) else {
            continue;
        };
        let (a, b) = rect_sides(&rect);
        if a.min(b) < MIN_BOX_SIDE {
            continue;
        }

        if box_score(map, &rect) < settings.box_threshold {
            continue;
        }

        let grown = unclip(&rect, settings.unclip_ratio);
        let (a, b) = rect_sides(&grown);
        if a.min(b) < MIN_BOX_SIDE + 2.0 {
            continue;
        }

        let (width, height) = (source.0 as f32, source.1 as f32);
        let mapped = grown.map(|(x, y)| {
            (
                (x / scale.0).clamp(0.0, width),
                (y / scale.1).clamp(0.0, height),
            )
        });
        quads.push(order_corners(mapped));
    }

    sort_boxes(&mut quads);
    quads
}

/// Mean probability of the map pixels covered by a rectangle
fn box_score(map: ArrayView2<f32>, rect: &Quad) -> f32 {
    let (rows, cols) = map.dim();
    if rows == 0 || cols == 0 {
        return 0.0;
    }

    let min_x = rect.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let max_x = rect.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = rect.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = rect.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    let x_range = (min_x.floor().max(0.0) as usize)..=(max_x.ceil().max(0.0) as usize).min(cols - 1);
    let y_range = (min_y.floor().max(0.0) as usize)..=(max_y.ceil().max(0.0) as usize).min(rows - 1);

    let mut sum = 0.0;
    let mut count = 0usize;
    for y in y_range {
        for x in x_range.clone() {
            if contains(rect, (x as f32, y as f32)) {
                sum += map[[y, x]];
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Point-in-convex-quad test, edges included
fn contains(quad: &Quad, (px, py): (f32, f32)) -> bool {
    const EPS: f32 = 1e-3;
    let mut positive = false;
    let mut negative = false;

    for i in 0..4 {
        let (ax, ay) = quad[i];
        let (bx, by) = quad[(i + 1) % 4];
        let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
        positive |= cross > EPS;
        negative |= cross < -EPS;
    }

    !(positive && negative)
}

/// Reading order: top to bottom, left to right within a row
fn sort_boxes(quads: &mut [Quad]) {
    quads.sort_by(|a, b| a[0].1.total_cmp(&b[0].1).then(a[0].0.total_cmp(&b[0].0)));

    for i in 0..quads.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (quads[j][0], quads[j + 1][0]);
            if (lower.1 - upper.1).abs() < ROW_TOLERANCE && lower.0 < upper.0 {
                quads.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    fn dictionary() -> Vec<String> {
        parse_dictionary("1\n2\n가\n")
    }

    #[test]
    fn test_parse_dictionary() {
        let dict = parse_dictionary("1\r\n2\r\n가");
        assert_eq!(dict, vec!["", "1", "2", "가", " "]);
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        // Classes: blank, '1', '2', '가', ' '
        let probs = arr2(&[
            [0.1, 0.8, 0.05, 0.05, 0.0],
            [0.1, 0.6, 0.1, 0.2, 0.0],
            [0.9, 0.05, 0.0, 0.05, 0.0],
            [0.1, 0.7, 0.1, 0.1, 0.0],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ]);

        let (text, confidence) = ctc_greedy_decode(probs.view(), &dictionary());
        assert_eq!(text, "11가");
        assert!((confidence - (0.8 + 0.7 + 1.0) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let probs = arr2(&[[0.9, 0.1, 0.0, 0.0, 0.0], [0.8, 0.2, 0.0, 0.0, 0.0]]);
        let (text, confidence) = ctc_greedy_decode(probs.view(), &dictionary());
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    fn settings() -> OcrSettings {
        OcrSettings::default()
    }

    fn map_with_block(value: f32, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Array2<f32> {
        let mut map = Array2::<f32>::zeros((64, 128));
        for y in rows {
            for x in cols.clone() {
                map[[y, x]] = value;
            }
        }
        map
    }

    #[test]
    fn test_db_postprocess_finds_text_block() {
        let map = map_with_block(0.9, 20..30, 10..70);
        let quads = db_postprocess(map.view(), &settings(), (0.5, 0.5), (200, 100));
        assert_eq!(quads.len(), 1);

        // Block spans 59 x 9 between pixel centers; unclip adds 531 * 1.5 / 136 per side
        let offset = 531.0 * 1.5 / 136.0;
        let [tl, _, br, _] = quads[0];
        assert!((tl.0 - (10.0 - offset) * 2.0).abs() < 1.0, "tl = {:?}", tl);
        assert!((tl.1 - (20.0 - offset) * 2.0).abs() < 1.0, "tl = {:?}", tl);
        assert!((br.0 - (69.0 + offset) * 2.0).abs() < 1.0, "br = {:?}", br);
        assert!((br.1 - (29.0 + offset) * 2.0).abs() < 1.0, "br = {:?}", br);
    }

    #[test]
    fn test_db_postprocess_drops_weak_and_tiny_boxes() {
        let weak = map_with_block(0.4, 20..30, 10..70);
        assert!(db_postprocess(weak.view(), &settings(), (1.0, 1.0), (128, 64)).is_empty());

        let tiny = map_with_block(0.9, 20..22, 10..12);
        assert!(db_postprocess(tiny.view(), &settings(), (1.0, 1.0), (128, 64)).is_empty());
    }

    #[test]
    fn test_sort_boxes_reading_order() {
        let at = |x: f32, y: f32| -> Quad { [(x, y), (x + 10.0, y), (x + 10.0, y + 5.0), (x, y + 5.0)] };
        let mut quads = vec![at(100.0, 50.0), at(10.0, 55.0), at(0.0, 0.0)];
        sort_boxes(&mut quads);

        let xs: Vec<f32> = quads.iter().map(|q| q[0].0).collect();
        assert_eq!(xs, vec![0.0, 10.0, 100.0]);
    }

    #[test]
    fn test_contains() {
        let quad: Quad = [(0.0, 0.0), (10.0, 0.0), (10.0, 4.0), (0.0, 4.0)];
        assert!(contains(&quad, (5.0, 2.0)));
        assert!(contains(&quad, (0.0, 0.0)));
        assert!(!contains(&quad, (11.0, 2.0)));
    }
}
