// Single-slice contour measurements: area, perimeter and circularity of
// the largest bright region in one cross-section.

use crate::segmentation::{label_components, otsu_threshold};
use crate::volume::Slice;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceMeasurements {
    pub area_pixels: f64,
    pub perimeter_pixels: f64,
    /// 4π·area / perimeter², 1.0 for a perfect disc
    pub circularity: f64,
}

/// Count pixel edges separating `inside` pixels from the outside
/// (including the image border). Horizontal edges are weighted by `dx`,
/// vertical edges by `dy`.
pub fn boundary_length(width: usize, height: usize, inside: &[bool], dx: f64, dy: f64) -> f64 {
    let at = |x: isize, y: isize| -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && inside[x as usize + y as usize * width]
    };

    let mut length = 0.0;
    for y in 0..height as isize {
        for x in 0..width as isize {
            if !at(x, y) {
                continue;
            }
            // Left/right neighbours share an edge of length dy
            if !at(x - 1, y) { length += dy; }
            if !at(x + 1, y) { length += dy; }
            // Up/down neighbours share an edge of length dx
            if !at(x, y - 1) { length += dx; }
            if !at(x, y + 1) { length += dx; }
        }
    }
    length
}

/// Measure the largest Otsu-foreground region of a single slice.
/// A slice without foreground measures as all zeros.
pub fn analyze_slice(slice: &Slice) -> SliceMeasurements {
    let Some(threshold) = otsu_threshold(&slice.data) else {
        log::warn!("Slice analysis: no contrast, nothing to measure");
        return SliceMeasurements::default();
    };

    let foreground: Vec<bool> = slice.data.iter().map(|&v| v >= threshold).collect();
    let components = label_components((slice.width, slice.height, 1), &foreground);
    let Some(largest) = components.largest() else {
        return SliceMeasurements::default();
    };

    let region: Vec<bool> = components.labels.iter().map(|&l| l == largest).collect();
    let area = components.sizes[largest as usize - 1] as f64;
    let perimeter = boundary_length(slice.width, slice.height, &region, 1.0, 1.0);

    let circularity = if perimeter > 0.0 {
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    } else {
        0.0
    };

    log::info!("Slice analysis: area {}, perimeter {}, circularity {:.3}", area, perimeter, circularity);

    SliceMeasurements {
        area_pixels: area,
        perimeter_pixels: perimeter,
        circularity,
    }
}
