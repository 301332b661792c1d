//! Plate region detection
//!
//! Locates a rectangular plate candidate from edge contours: the largest
//! four-cornered contour with a plate-like aspect ratio wins.

use image::DynamicImage;
use imageproc::contours::find_contours;
use imageproc::edges::canny;
use imageproc::geometry::{arc_length, contour_area};
use imageproc::point::Point;
use std::time::Instant;
use tracing::debug;

use super::enhance::{enhance, EnhanceSettings};
use super::geometry::{approximate_polygon, bounding_rect, simplify_chain};
use super::PlateRegion;

/// Margin added around a detected region before cropping
pub const DEFAULT_ROI_MARGIN: u32 = 10;

/// Configuration for contour based plate detection
#[derive(Debug, Clone)]
pub struct RegionDetectorConfig {
    /// Denoise/equalize settings applied before edge detection
    pub enhance: EnhanceSettings,
    /// Canny hysteresis thresholds (low, high)
    pub canny_thresholds: (f32, f32),
    /// Number of largest contours considered
    pub max_candidates: usize,
    /// Polygon approximation tolerance as a fraction of the perimeter
    pub approx_epsilon: f64,
    /// Exclusive aspect ratio bounds (width / height)
    pub aspect_range: (f32, f32),
}

impl Default for RegionDetectorConfig {
    fn default() -> Self {
        Self {
            enhance: EnhanceSettings::default(),
            canny_thresholds: (30.0, 200.0),
            max_candidates: 10,
            approx_epsilon: 0.018,
            aspect_range: (1.5, 6.0),
        }
    }
}

/// Finds a candidate plate rectangle in a frame
#[derive(Debug, Clone, Default)]
pub struct RegionDetector {
    config: RegionDetectorConfig,
}

impl RegionDetector {
    /// Create a detector with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector with custom configuration
    pub fn with_config(config: RegionDetectorConfig) -> Self {
        Self { config }
    }

    /// Locate the plate rectangle, if any
    ///
    /// Returns `None` when none of the largest contours is a plate-shaped
    /// quadrilateral. The input image is never modified.
    pub fn find_plate_region(&self, image: &DynamicImage) -> Option<PlateRegion> {
        let start = Instant::now();

        let gray = image.to_luma8();
        let enhanced = enhance(&gray, &self.config.enhance);
        let (low, high) = self.config.canny_thresholds;
        let edges = canny(&enhanced, low, high);

        let mut contours: Vec<Vec<Point<i32>>> = find_contours::<i32>(&edges)
            .into_iter()
            .map(|contour| simplify_chain(&contour.points))
            .collect();

        // Largest enclosed area first; the sort is stable so ties keep discovery order
        contours.sort_by(|a, b| contour_area(b).total_cmp(&contour_area(a)));
        contours.truncate(self.config.max_candidates);

        let region = contours
            .iter()
            .find_map(|contour| self.plate_rectangle(contour));

        debug!(
            "Region detection in {:?}: {:?}",
            start.elapsed(),
            region.map(|r| r.bounds())
        );

        region
    }

    /// Bounding rectangle of a contour if it approximates a plate-shaped quadrilateral
    fn plate_rectangle(&self, contour: &[Point<i32>]) -> Option<PlateRegion> {
        if contour.len() < 3 {
            return None;
        }

        let length = arc_length(contour, true);
        if length <= 0.0 {
            return None;
        }

        let polygon = approximate_polygon(contour, self.config.approx_epsilon * length);
        if polygon.len() != 4 {
            return None;
        }

        let (x, y, width, height) = bounding_rect(&polygon);
        let region = PlateRegion::new(x, y, width, height);
        self.accepts_aspect_ratio(region.aspect_ratio).then_some(region)
    }

    /// Whether a width/height ratio lies strictly inside the plate range
    pub fn accepts_aspect_ratio(&self, ratio: f32) -> bool {
        let (min, max) = self.config.aspect_range;
        ratio > min && ratio < max
    }
}

/// Crop a region grown by `margin` pixels on every side, clamped to the image
///
/// Returns the cropped image and its top-left corner in the source frame.
pub fn crop_region(
    image: &DynamicImage,
    region: &PlateRegion,
    margin: u32,
) -> (DynamicImage, (u32, u32)) {
    let (image_width, image_height) = (image.width(), image.height());

    let x = region.x.saturating_sub(margin).min(image_width);
    let y = region.y.saturating_sub(margin).min(image_height);
    let right = region
        .x
        .saturating_add(region.width)
        .saturating_add(margin)
        .min(image_width);
    let bottom = region
        .y
        .saturating_add(region.height)
        .saturating_add(margin)
        .min(image_height);

    (
        image.crop_imm(x, y, right.saturating_sub(x), bottom.saturating_sub(y)),
        (x, y),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Black frame with one filled white rectangle
    fn frame_with_rect(width: u32, height: u32, rect: (u32, u32, u32, u32)) -> DynamicImage {
        let (rx, ry, rw, rh) = rect;
        let image = RgbImage::from_fn(width, height, |x, y| {
            if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn test_detects_plate_shaped_rectangle() {
        // 192 x 60 has aspect ratio 3.2
        let frame = frame_with_rect(400, 240, (100, 90, 192, 60));
        let region = RegionDetector::new()
            .find_plate_region(&frame)
            .expect("plate rectangle should be found");

        assert!(region.x.abs_diff(100) <= 3, "x = {}", region.x);
        assert!(region.y.abs_diff(90) <= 3, "y = {}", region.y);
        assert!(region.width.abs_diff(192) <= 6, "width = {}", region.width);
        assert!(region.height.abs_diff(60) <= 6, "height = {}", region.height);
        assert!(region.aspect_ratio > 2.8 && region.aspect_ratio < 3.6);
    }

    #[test]
    fn test_blank_frame_has_no_region() {
        let frame = frame_with_rect(200, 120, (0, 0, 0, 0));
        assert!(RegionDetector::new().find_plate_region(&frame).is_none());
    }

    #[test]
    fn test_square_is_not_a_plate() {
        let frame = frame_with_rect(240, 240, (70, 70, 100, 100));
        assert!(RegionDetector::new().find_plate_region(&frame).is_none());
    }

    #[test]
    fn test_custom_aspect_range() {
        let frame = frame_with_rect(240, 240, (70, 70, 100, 100));
        let detector = RegionDetector::with_config(RegionDetectorConfig {
            aspect_range: (0.8, 1.2),
            ..Default::default()
        });

        let region = detector
            .find_plate_region(&frame)
            .expect("square should pass a square-friendly range");
        assert!(region.aspect_ratio > 0.9 && region.aspect_ratio < 1.1);
    }

    #[test]
    fn test_shapes_without_four_corners_are_ignored() {
        // Disk on the left, flat triangle with a plate-like 4:1 bounding box on the right
        let inside_triangle = |x: f32, y: f32| {
            let (ax, ay, bx, by, cx, cy) = (180.0, 200.0, 380.0, 200.0, 280.0, 150.0);
            let side = |px: f32, py: f32, qx: f32, qy: f32| (qx - px) * (y - py) - (qy - py) * (x - px);
            let (d1, d2, d3) = (side(ax, ay, bx, by), side(bx, by, cx, cy), side(cx, cy, ax, ay));
            (d1 >= 0.0 && d2 >= 0.0 && d3 >= 0.0) || (d1 <= 0.0 && d2 <= 0.0 && d3 <= 0.0)
        };
        let image = RgbImage::from_fn(420, 260, |x, y| {
            let (fx, fy) = (x as f32, y as f32);
            let in_disk = (fx - 80.0).powi(2) + (fy - 120.0).powi(2) <= 40.0f32.powi(2);
            if in_disk || inside_triangle(fx, fy) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });

        let frame = DynamicImage::ImageRgb8(image);
        assert!(RegionDetector::new().find_plate_region(&frame).is_none());
    }

    #[test]
    fn test_aspect_ratio_bounds_are_exclusive() {
        let detector = RegionDetector::new();
        assert!(!detector.accepts_aspect_ratio(1.5));
        assert!(!detector.accepts_aspect_ratio(6.0));
        assert!(detector.accepts_aspect_ratio(1.51));
        assert!(detector.accepts_aspect_ratio(3.2));
        assert!(detector.accepts_aspect_ratio(5.99));
        assert!(!detector.accepts_aspect_ratio(0.5));
    }

    #[test]
    fn test_crop_region_adds_clamped_margin() {
        let frame = frame_with_rect(100, 80, (0, 0, 0, 0));

        let inner = PlateRegion::new(20, 30, 40, 10);
        let (roi, origin) = crop_region(&frame, &inner, DEFAULT_ROI_MARGIN);
        assert_eq!(origin, (10, 20));
        assert_eq!((roi.width(), roi.height()), (60, 30));

        let corner = PlateRegion::new(5, 70, 90, 10);
        let (roi, origin) = crop_region(&frame, &corner, DEFAULT_ROI_MARGIN);
        assert_eq!(origin, (0, 60));
        assert_eq!((roi.width(), roi.height()), (100, 20));
    }

    #[test]
    fn test_crop_region_huge_margin_covers_frame() {
        let frame = frame_with_rect(100, 80, (0, 0, 0, 0));
        let region = PlateRegion::new(20, 30, 40, 10);

        for margin in [3_000_000_000, u32::MAX] {
            let (roi, origin) = crop_region(&frame, &region, margin);
            assert_eq!(origin, (0, 0));
            assert_eq!((roi.width(), roi.height()), (100, 80));
        }
    }
}
