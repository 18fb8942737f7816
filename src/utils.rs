//! Utility functions for image processing and coordinate transformations.

pub mod image_conversion;
pub mod safe_cast;

use opencv::core::Rect;
use safe_cast::f32_to_i32_clamp;

/// Expand a detection box by `shift` of its size on every side, make it
/// square and keep it inside a `max_width` × `max_height` frame.
///
/// The square side is capped at the smaller frame dimension.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Precision loss acceptable for box dimensions
pub fn square_region(bbox: Rect, max_width: i32, max_height: i32, shift: f32) -> Rect {
    let x_shift = f32_to_i32_clamp(bbox.width as f32 * shift, 0, max_width);
    let y_shift = f32_to_i32_clamp(bbox.height as f32 * shift, 0, max_height);

    let x = (bbox.x - x_shift).max(0);
    let y = (bbox.y - y_shift).max(0);
    let width = (bbox.width + 2 * x_shift).min(max_width - x);
    let height = (bbox.height + 2 * y_shift).min(max_height - y);

    let side = width.max(height).min(max_width).min(max_height);
    let x = x.min(max_width - side).max(0);
    let y = y.min(max_height - side).max(0);

    Rect::new(x, y, side, side)
}
