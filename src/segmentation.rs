// Foreground segmentation
//
// 1. Global Otsu threshold over all voxel intensities
// 2. 6-connected component labeling of the thresholded grid
// 3. Keep the component with the largest physical size

use crate::geometry::{Point3D, Spacing};
use crate::volume::Volume;
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Histogram resolution for Otsu's method
pub const HISTOGRAM_BINS: usize = 256;

/// Binary volume congruent to the volume it was derived from.
/// 1 = foreground, 0 = background.
///
/// `data` holds `width * height * depth` voxels, x fastest. Consumers check
/// [`Mask::is_well_formed`] before indexing a mask they did not build.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub data: Vec<u8>,
    pub spacing: Spacing,
    pub origin: Point3D,
}

impl Mask {
    /// Build a mask by evaluating `f(x, y, z)` at every voxel
    pub fn from_fn(
        dims: (usize, usize, usize),
        spacing: Spacing,
        f: impl Fn(usize, usize, usize) -> bool,
    ) -> Self {
        let (width, height, depth) = dims;
        let mut data = Vec::with_capacity(width * height * depth);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    data.push(f(x, y, z) as u8);
                }
            }
        }
        Self { width, height, depth, data, spacing, origin: Point3D::origin() }
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.width + z * self.width * self.height
    }

    /// The voxel buffer matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.depth))
            == Some(self.data.len())
    }

    pub fn is_foreground(&self, x: usize, y: usize, z: usize) -> bool {
        self.data[self.index(x, y, z)] != 0
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Voxel coordinates of every foreground voxel, in raster order
    pub fn foreground_voxels(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let (w, h) = (self.width, self.height);
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0)
            .map(move |(i, _)| (i % w, (i / w) % h, i / (w * h)))
    }

    /// Same dimensions, spacing and origin as `volume`
    pub fn is_congruent_with(&self, volume: &Volume) -> bool {
        self.dimensions() == volume.dimensions()
            && self.spacing == volume.spacing
            && self.origin == volume.origin
    }
}

/// Connected-component labels over a grid.
/// Label 0 is background; components are numbered from 1 in raster order
/// of their first voxel.
#[derive(Debug, Clone)]
pub struct LabeledComponents {
    pub labels: Vec<u32>,
    /// Voxel count per component, indexed by `label - 1`
    pub sizes: Vec<usize>,
}

impl LabeledComponents {
    pub fn num_components(&self) -> usize {
        self.sizes.len()
    }

    /// Label of the largest component. Ties go to the lowest label.
    pub fn largest(&self) -> Option<u32> {
        let mut best: Option<(u32, usize)> = None;
        for (i, &size) in self.sizes.iter().enumerate() {
            match best {
                Some((_, best_size)) if size <= best_size => {}
                _ => best = Some((i as u32 + 1, size)),
            }
        }
        best.map(|(label, _)| label)
    }
}

/// Otsu's threshold over `values`.
///
/// Returns the smallest intensity that belongs to the upper class, or `None`
/// when the values have no contrast at all. When several bins reach the
/// maximal between-class variance the split is placed at their midpoint.
pub fn otsu_threshold(values: &[f64]) -> Option<f64> {
    let finite = || values.iter().copied().filter(|v| v.is_finite());
    let min_val = finite().fold(f64::INFINITY, f64::min);
    let max_val = finite().fold(f64::NEG_INFINITY, f64::max);
    let range = max_val - min_val;

    if !range.is_finite() || range <= 0.0 {
        return None;
    }

    let scale = (HISTOGRAM_BINS - 1) as f64 / range;
    let mut histogram = [0u64; HISTOGRAM_BINS];
    for v in finite() {
        let bin = (((v - min_val) * scale) as usize).min(HISTOGRAM_BINS - 1);
        histogram[bin] += 1;
    }

    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut best_first = 0usize;
    let mut best_last = 0usize;
    let mut best_variance = 0.0f64;
    let mut background_count = 0.0f64;
    let mut background_sum = 0.0f64;

    for (t, &count) in histogram.iter().enumerate() {
        background_count += count as f64;
        if background_count == 0.0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0.0 {
            break;
        }

        background_sum += t as f64 * count as f64;
        let mean_bg = background_sum / background_count;
        let mean_fg = (total_sum - background_sum) / foreground_count;
        let diff = mean_bg - mean_fg;
        let variance = background_count * foreground_count * diff * diff;

        if variance > best_variance * (1.0 + 1e-12) {
            best_variance = variance;
            best_first = t;
            best_last = t;
        } else if (variance - best_variance).abs() <= best_variance * 1e-12 {
            best_last = t;
        }
    }

    let best = (best_first + best_last) / 2;
    Some(min_val + (best + 1) as f64 / scale)
}

/// Label 6-connected (face-adjacent) foreground components of a 3D grid.
/// A grid with `depth == 1` gives 4-connected 2D labeling.
pub fn label_components(dims: (usize, usize, usize), foreground: &[bool]) -> LabeledComponents {
    let (w, h, d) = dims;
    let mut labels = vec![0u32; foreground.len()];
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..foreground.len() {
        if !foreground[start] || labels[start] != 0 {
            continue;
        }

        let label = sizes.len() as u32 + 1;
        let mut size = 0usize;
        labels[start] = label;
        queue.push_back(start);

        while let Some(i) = queue.pop_front() {
            size += 1;
            let (x, y, z) = (i % w, (i / w) % h, i / (w * h));

            let mut visit = |j: usize| {
                if foreground[j] && labels[j] == 0 {
                    labels[j] = label;
                    queue.push_back(j);
                }
            };

            if x > 0 { visit(i - 1); }
            if x + 1 < w { visit(i + 1); }
            if y > 0 { visit(i - w); }
            if y + 1 < h { visit(i + w); }
            if z > 0 { visit(i - w * h); }
            if z + 1 < d { visit(i + w * h); }
        }

        sizes.push(size);
    }

    LabeledComponents { labels, sizes }
}

/// Isolates the dominant bright region of a volume
#[derive(Debug, Clone, Copy, Default)]
pub struct Segmenter;

impl Segmenter {
    pub fn new() -> Self {
        Self
    }

    /// Threshold, label and keep the largest component.
    ///
    /// Fails with [`Error::Segmentation`] when nothing survives thresholding.
    pub fn segment(&self, volume: &Volume) -> Result<Mask> {
        log::info!("Segmenting volume {}x{}x{}", volume.width, volume.height, volume.depth);
        if !volume.is_well_formed() {
            return Err(Error::Segmentation(format!(
                "volume holds {} voxels, expected {}x{}x{}",
                volume.data.len(), volume.width, volume.height, volume.depth
            )));
        }

        let threshold = otsu_threshold(&volume.data).ok_or_else(|| {
            Error::Segmentation("volume has uniform intensity, no foreground present".to_string())
        })?;
        log::info!("  Otsu threshold: {:.3}", threshold);

        let foreground: Vec<bool> = volume.data.par_iter().map(|&v| v >= threshold).collect();

        let components = label_components(volume.dimensions(), &foreground);
        let voxel_volume = volume.spacing.voxel_volume();
        log::info!("  {} connected components", components.num_components());
        for (i, &size) in components.sizes.iter().enumerate().take(10) {
            log::debug!("    label {}: {} voxels, {:.3} physical", i + 1, size, size as f64 * voxel_volume);
        }

        let largest = components.largest().ok_or_else(|| {
            Error::Segmentation("no foreground voxels after thresholding".to_string())
        })?;
        log::info!(
            "  Largest component: label {} ({} voxels)",
            largest,
            components.sizes[largest as usize - 1]
        );

        let data = components
            .labels
            .iter()
            .map(|&l| (l == largest) as u8)
            .collect();

        Ok(Mask {
            width: volume.width,
            height: volume.height,
            depth: volume.depth,
            data,
            spacing: volume.spacing,
            origin: volume.origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Slice, VolumeBuilder};

    fn volume_from_fn(dims: (usize, usize, usize), f: impl Fn(usize, usize, usize) -> f64) -> Volume {
        let slices: Vec<Slice> = (0..dims.2)
            .map(|z| Slice::from_fn(dims.0, dims.1, |x, y| f(x, y, z)))
            .collect();
        VolumeBuilder::default().build(&slices, (1.0, 1.0), 1.0).unwrap()
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut values = vec![10.0; 500];
        values.extend(vec![200.0; 300]);
        let t = otsu_threshold(&values).unwrap();
        assert!(t > 10.0 && t <= 200.0, "threshold {} should split the modes", t);
    }

    #[test]
    fn test_otsu_uniform_has_no_threshold() {
        assert!(otsu_threshold(&[42.0; 16]).is_none());
        assert!(otsu_threshold(&[]).is_none());
    }

    #[test]
    fn test_label_components_six_connectivity() {
        // Two voxels touching only along an edge are separate components
        let dims = (3, 3, 1);
        let mut fg = vec![false; 9];
        fg[0] = true; // (0,0)
        fg[4] = true; // (1,1)
        fg[5] = true; // (2,1)
        let labeled = label_components(dims, &fg);

        assert_eq!(labeled.num_components(), 2);
        assert_eq!(labeled.sizes, vec![1, 2]);
        assert_eq!(labeled.labels[4], labeled.labels[5]);
        assert_eq!(labeled.largest(), Some(2));
    }

    #[test]
    fn test_largest_tie_breaks_to_lowest_label() {
        let labeled = LabeledComponents { labels: vec![], sizes: vec![3, 5, 5] };
        assert_eq!(labeled.largest(), Some(2));
    }

    #[test]
    fn test_malformed_volume_fails() {
        let mut volume = volume_from_fn((8, 8, 4), |x, _, _| x as f64);
        volume.data.truncate(100);
        let err = Segmenter::new().segment(&volume).unwrap_err();
        assert!(matches!(err, Error::Segmentation(_)));
    }

    #[test]
    fn test_all_zero_volume_fails() {
        let volume = volume_from_fn((8, 8, 4), |_, _, _| 0.0);
        let err = Segmenter::new().segment(&volume).unwrap_err();
        assert!(matches!(err, Error::Segmentation(_)));
    }

    #[test]
    fn test_keeps_largest_blob() {
        // Big 4x4x3 block and a small isolated 1x1x1 speck
        let volume = volume_from_fn((12, 12, 4), |x, y, z| {
            let big = (2..6).contains(&x) && (2..6).contains(&y) && z < 3;
            let speck = x == 10 && y == 10 && z == 3;
            if big || speck { 250.0 } else { 5.0 }
        });

        let mask = Segmenter::new().segment(&volume).unwrap();
        assert!(mask.is_congruent_with(&volume));
        assert_eq!(mask.foreground_count(), 48);
        assert!(!mask.is_foreground(10, 10, 3));
        assert!(mask.is_foreground(3, 3, 1));
    }

    #[test]
    fn test_segment_is_repeatable() {
        let volume = volume_from_fn((10, 10, 5), |x, y, _| {
            if (3..7).contains(&x) && (3..7).contains(&y) { 180.0 } else { 20.0 }
        });
        let a = Segmenter::new().segment(&volume).unwrap();
        let b = Segmenter::new().segment(&volume).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_foreground_voxels_coordinates() {
        let mask = Mask::from_fn((3, 2, 2), Spacing::default(), |x, y, z| (x, y, z) == (2, 1, 1));
        let voxels: Vec<_> = mask.foreground_voxels().collect();
        assert_eq!(voxels, vec![(2, 1, 1)]);
    }
}
