//! Frames handed to the recognition pipeline

use image::DynamicImage;

/// A still frame, either still encoded (JPEG/PNG bytes) or already decoded
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    /// Encoded image bytes as received from a camera or upload
    Encoded(&'a [u8]),
    /// Decoded bitmap
    Decoded(&'a DynamicImage),
}

impl<'a> From<&'a [u8]> for ImageInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ImageInput::Encoded(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for ImageInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        ImageInput::Encoded(bytes.as_slice())
    }
}

impl<'a> From<&'a DynamicImage> for ImageInput<'a> {
    fn from(image: &'a DynamicImage) -> Self {
        ImageInput::Decoded(image)
    }
}
