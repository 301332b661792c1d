//! OCR fragment fusion
//!
//! OCR engines often split one plate into several fragments ("12", "가",
//! "3456"). The merger pairs and triples fragments that sit on the same text
//! line close to each other and emits the concatenations as extra candidates.
//! Originals are never touched and duplicates are not filtered: validation
//! and confidence ranking downstream sort the noise out.

use tracing::debug;

use super::geometry::{center, height, left_edge, leftmost_x, right_edge, same_line, width};
use super::TextBox;

/// Number of following boxes (in reading order) examined for each box
const LOOK_AHEAD: usize = 3;
/// Floor for line height and box width, in pixels
const MIN_EXTENT: f32 = 30.0;
/// Maximum gap between a pair, in multiples of the reference width
const PAIR_GAP_FACTOR: f32 = 2.0;
/// Maximum span from the middle to the third box, in multiples of the reference width
const TRIPLE_SPAN_FACTOR: f32 = 3.0;
/// Minimum characters for a fused pair to be emitted
const MIN_PAIR_CHARS: usize = 5;
/// Minimum characters for a fused triple to be emitted
const MIN_TRIPLE_CHARS: usize = 7;

/// Produces fused candidates from spatially adjacent fragments
#[derive(Debug, Clone, Copy, Default)]
pub struct TextBoxMerger;

impl TextBoxMerger {
    pub fn new() -> Self {
        Self
    }

    /// Fused candidates for `boxes`, in discovery order
    ///
    /// Only new boxes are returned; the caller appends them after the originals.
    pub fn merge_nearby(&self, boxes: &[TextBox]) -> Vec<TextBox> {
        if boxes.len() < 2 {
            return Vec::new();
        }

        // Approximate reading order: top row first, left to right within a row
        let mut sorted: Vec<&TextBox> = boxes.iter().collect();
        sorted.sort_by(|a, b| {
            let (ax, ay) = center(&a.quad);
            let (bx, by) = center(&b.quad);
            ay.total_cmp(&by).then(ax.total_cmp(&bx))
        });

        let mut fused = Vec::new();
        for i in 0..sorted.len() {
            let first = sorted[i];

            for j in (i + 1)..(i + 1 + LOOK_AHEAD).min(sorted.len()) {
                let second = sorted[j];

                let line_height = height(&first.quad)
                    .max(height(&second.quad))
                    .max(MIN_EXTENT);
                if !same_line(&first.quad, &second.quad, line_height) {
                    continue;
                }

                let ref_width = width(&first.quad).max(width(&second.quad)).max(MIN_EXTENT);
                if left_edge(&second.quad) - right_edge(&first.quad) > PAIR_GAP_FACTOR * ref_width {
                    continue;
                }

                if let Some(pair) = fuse(&[first, second], MIN_PAIR_CHARS) {
                    fused.push(pair);
                }

                // At most one triple per pair: the first third box that lines up
                let third = sorted[(j + 1).min(sorted.len())..]
                    .iter()
                    .take(LOOK_AHEAD)
                    .find(|third| {
                        same_line(&second.quad, &third.quad, line_height)
                            && left_edge(&third.quad) - left_edge(&second.quad)
                                <= TRIPLE_SPAN_FACTOR * ref_width
                    });

                if let Some(&third) = third {
                    if let Some(triple) = fuse(&[first, second, third], MIN_TRIPLE_CHARS) {
                        fused.push(triple);
                    }
                }
            }
        }

        debug!("Fused {} candidates from {} fragments", fused.len(), boxes.len());
        fused
    }
}

/// Concatenate fragments left to right; `None` when shorter than `min_chars`
fn fuse(parts: &[&TextBox], min_chars: usize) -> Option<TextBox> {
    let mut ordered = parts.to_vec();
    ordered.sort_by(|a, b| leftmost_x(&a.quad).total_cmp(&leftmost_x(&b.quad)));

    let text: String = ordered.iter().map(|part| part.text.as_str()).collect();
    if text.chars().count() < min_chars {
        return None;
    }

    let confidence = ordered.iter().map(|part| part.confidence).sum::<f32>() / ordered.len() as f32;
    Some(TextBox::fused(ordered[0].quad, text, confidence))
}
