//! Image preprocessing for OCR models
//!
//! Handles resizing, normalization and tensor conversion for the PaddleOCR
//! detection and recognition networks.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

use super::Quad;

/// ImageNet statistics used by the detection network [R, G, B]
pub const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Recognition network expects pixel / 127.5 - 1.0, i.e. [-1, 1]
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Detection input sides must be multiples of this
const DET_STRIDE: u32 = 32;

/// Resized detection input and how it maps back to the source image
#[derive(Debug, Clone)]
pub struct DetectionInput {
    /// Resized image padded with black to a multiple of 32 on both sides
    pub image: RgbImage,
    /// Source-to-resized scale per axis
    pub scale: (f32, f32),
}

/// Convert an RGB image into a normalized NCHW tensor (batch size 1)
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

/// Scale so the long side is at most `limit_side`, then pad to multiples of 32
///
/// Images already within the limit keep their size apart from the padding.
pub fn resize_for_detection(image: &RgbImage, limit_side: u32) -> DetectionInput {
    let (width, height) = image.dimensions();
    let long_side = width.max(height).max(1);

    let ratio = if long_side > limit_side {
        limit_side as f32 / long_side as f32
    } else {
        1.0
    };

    let new_w = ((width as f32 * ratio).round() as u32).max(1);
    let new_h = ((height as f32 * ratio).round() as u32).max(1);

    let resized = if (new_w, new_h) == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, new_w, new_h, FilterType::Triangle)
    };

    let padded_w = new_w.div_ceil(DET_STRIDE) * DET_STRIDE;
    let padded_h = new_h.div_ceil(DET_STRIDE) * DET_STRIDE;
    let mut padded = RgbImage::from_pixel(padded_w, padded_h, Rgb([0, 0, 0]));
    imageops::replace(&mut padded, &resized, 0, 0);

    DetectionInput {
        image: padded,
        scale: (new_w as f32 / width.max(1) as f32, new_h as f32 / height.max(1) as f32),
    }
}

/// Resize a text crop to a fixed height, keeping aspect ratio up to `max_width`
pub fn resize_for_recognition(image: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let ratio = width as f32 / height.max(1) as f32;
    let new_w = ((target_height as f32 * ratio).ceil() as u32).clamp(1, max_width.max(1));

    imageops::resize(image, new_w, target_height, FilterType::Triangle)
}

/// Axis-aligned crop around a quad, clamped to the image
///
/// Returns `None` when the clamped crop is empty.
pub fn crop_quad(image: &RgbImage, quad: &Quad) -> Option<RgbImage> {
    let min_x = quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = quad.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = quad.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = quad.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    let (width, height) = image.dimensions();

    let x1 = (min_x.floor().max(0.0) as u32).min(width);
    let y1 = (min_y.floor().max(0.0) as u32).min(height);
    let x2 = (max_x.ceil().max(0.0) as u32).min(width);
    let y2 = (max_y.ceil().max(0.0) as u32).min(height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_nchw_layout_and_normalization() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(3, 1, Rgb([255, 0, 128]));

        let tensor = to_nchw(&image, &REC_MEAN, &REC_STD);
        assert_eq!(tensor.dim(), (1, 3, 2, 4));
        assert!((tensor[[0, 0, 1, 3]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 1, 3]] + 1.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 1, 3]].abs() < 0.01);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_imagenet_normalization() {
        let image = RgbImage::from_pixel(1, 1, Rgb([128, 128, 128]));
        let tensor = to_nchw(&image, &DET_MEAN, &DET_STD);

        let expected = (128.0 / 255.0 - 0.485) / 0.229;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_detection_resize_limits_long_side() {
        let image = RgbImage::new(1920, 1080);
        let input = resize_for_detection(&image, 960);

        assert_eq!(input.image.dimensions(), (960, 544));
        assert!((input.scale.0 - 0.5).abs() < 1e-6);
        assert!((input.scale.1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detection_resize_keeps_small_images() {
        let image = RgbImage::from_pixel(100, 50, Rgb([200, 200, 200]));
        let input = resize_for_detection(&image, 960);

        assert_eq!(input.image.dimensions(), (128, 64));
        assert_eq!(input.scale, (1.0, 1.0));
        assert_eq!(input.image.get_pixel(99, 49), &Rgb([200, 200, 200]));
        assert_eq!(input.image.get_pixel(100, 50), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_recognition_resize() {
        let image = RgbImage::new(200, 24);
        let resized = resize_for_recognition(&image, 48, 640);
        assert_eq!(resized.dimensions(), (400, 48));

        let wide = RgbImage::new(2000, 24);
        assert_eq!(resize_for_recognition(&wide, 48, 640).dimensions(), (640, 48));
    }

    #[test]
    fn test_crop_quad_is_clamped() {
        let image = RgbImage::new(100, 50);

        let quad = [(-10.0, 10.0), (30.0, 10.0), (30.0, 60.0), (-10.0, 60.0)];
        let crop = crop_quad(&image, &quad).unwrap();
        assert_eq!(crop.dimensions(), (30, 40));

        let outside = [(120.0, 0.0), (130.0, 0.0), (130.0, 10.0), (120.0, 10.0)];
        assert!(crop_quad(&image, &outside).is_none());
    }
}
