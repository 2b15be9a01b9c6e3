// Volume assembly from an ordered stack of 2D slices.
//
// Slices are stacked along z; a single slice is replicated into a
// three-layer grid so the isosurface stage always sees depth >= 2.

use crate::geometry::{Point3D, Spacing};
use crate::{Error, Result};

/// Depth used when a single slice has to be expanded into a volume
pub const SINGLE_SLICE_DEPTH: usize = 3;

/// One 2D grayscale cross-section, row-major (x fastest)
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl Slice {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        let slice = Self { width, height, data };
        slice.validate()?;
        Ok(slice)
    }

    /// Check that the extent is non-zero and matches the pixel buffer
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Input(format!("slice has zero extent ({}x{})", self.width, self.height)));
        }
        if self.width.checked_mul(self.height) != Some(self.data.len()) {
            return Err(Error::Input(format!(
                "slice data length {} does not match {}x{}",
                self.data.len(), self.width, self.height
            )));
        }
        Ok(())
    }

    /// Build a slice by evaluating `f(x, y)` at every pixel
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    /// 8-bit grayscale pixels, as decoded from image files
    pub fn from_u8(width: usize, height: usize, pixels: &[u8]) -> Result<Self> {
        Self::new(width, height, pixels.iter().map(|&p| p as f64).collect())
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[x + y * self.width]
    }

    /// Linearly rescale intensities to [0, 255].
    /// A constant slice maps to all zeros.
    pub fn normalized(&self) -> Slice {
        let min = self.data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;

        let data = if range > 0.0 && range.is_finite() {
            self.data.iter().map(|v| ((v - min) / range * 255.0).floor()).collect()
        } else {
            vec![0.0; self.data.len()]
        };

        Slice { width: self.width, height: self.height, data }
    }
}

/// 3D scalar grid with physical spacing.
/// Index order is x fastest, then y, then z; `data` holds
/// `width * height * depth` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub data: Vec<f64>,
    pub spacing: Spacing,
    pub origin: Point3D,
}

impl Volume {
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.width + z * self.width * self.height
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f64 {
        self.data[self.index(x, y, z)]
    }

    /// The value buffer matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.depth))
            == Some(self.data.len())
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.depth)
    }

    pub fn num_voxels(&self) -> usize {
        self.data.len()
    }

    /// Copy of one z layer as a slice
    pub fn layer(&self, z: usize) -> Slice {
        let n = self.width * self.height;
        Slice {
            width: self.width,
            height: self.height,
            data: self.data[z * n..(z + 1) * n].to_vec(),
        }
    }
}

/// Stacks slices into a spaced volume
#[derive(Debug, Clone, Default)]
pub struct VolumeBuilder {
    /// Rescale every slice to [0, 255] before stacking
    pub normalize_intensity: bool,
}

impl VolumeBuilder {
    pub fn new(normalize_intensity: bool) -> Self {
        Self { normalize_intensity }
    }

    /// Stack `slices` along z.
    ///
    /// Spacing becomes `(pixel_spacing.0, pixel_spacing.1, slice_thickness)`.
    /// Fewer than two slices are expanded to [`SINGLE_SLICE_DEPTH`] identical layers.
    pub fn build(
        &self,
        slices: &[Slice],
        pixel_spacing: (f64, f64),
        slice_thickness: f64,
    ) -> Result<Volume> {
        let first = slices
            .first()
            .ok_or_else(|| Error::Input("no slices provided".to_string()))?;
        let (width, height) = (first.width, first.height);

        for (i, s) in slices.iter().enumerate() {
            if let Err(Error::Input(reason)) = s.validate() {
                return Err(Error::Input(format!("slice {}: {}", i, reason)));
            }
        }
        if let Some((i, s)) = slices
            .iter()
            .enumerate()
            .find(|(_, s)| s.width != width || s.height != height)
        {
            return Err(Error::Input(format!(
                "slice {} is {}x{}, expected {}x{}",
                i, s.width, s.height, width, height
            )));
        }

        let spacing = Spacing::new(pixel_spacing.0, pixel_spacing.1, slice_thickness);
        if !spacing.is_valid() {
            return Err(Error::Input(format!(
                "spacing must be finite and positive, got {:?}",
                spacing.to_array()
            )));
        }

        let prepared: Vec<Slice> = if self.normalize_intensity {
            slices.iter().map(Slice::normalized).collect()
        } else {
            slices.to_vec()
        };

        let layers: Vec<&Slice> = if prepared.len() < 2 {
            log::info!("Single slice detected - replicating into {} layers", SINGLE_SLICE_DEPTH);
            vec![&prepared[0]; SINGLE_SLICE_DEPTH]
        } else {
            prepared.iter().collect()
        };

        let depth = layers.len();
        let mut data = Vec::with_capacity(width * height * depth);
        for layer in &layers {
            data.extend_from_slice(&layer.data);
        }

        log::info!(
            "Built volume {}x{}x{}, spacing ({:.3}, {:.3}, {:.3})",
            width, height, depth, spacing.x, spacing.y, spacing.z
        );

        Ok(Volume {
            width,
            height,
            depth,
            data,
            spacing,
            origin: Point3D::origin(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_slice(w: usize, h: usize) -> Slice {
        Slice::from_fn(w, h, |x, y| (x * 3 + y * 7) as f64)
    }

    #[test]
    fn test_single_slice_replicated_to_three_layers() {
        let slice = gradient_slice(8, 6);
        let volume = VolumeBuilder::default()
            .build(&[slice.clone()], (1.0, 1.0), 3.0)
            .unwrap();

        assert_eq!(volume.depth, 3);
        for z in 0..3 {
            assert_eq!(volume.layer(z), slice);
        }
    }

    #[test]
    fn test_spacing_assignment() {
        let slices = vec![gradient_slice(4, 4); 5];
        let volume = VolumeBuilder::default().build(&slices, (0.5, 0.75), 2.5).unwrap();

        assert_eq!(volume.dimensions(), (4, 4, 5));
        assert_eq!(volume.spacing, Spacing::new(0.5, 0.75, 2.5));
        assert_eq!(volume.get(3, 2, 4), (3 * 3 + 2 * 7) as f64);
    }

    #[test]
    fn test_empty_stack_rejected() {
        let err = VolumeBuilder::default().build(&[], (1.0, 1.0), 1.0).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_mismatched_slices_rejected() {
        let slices = vec![gradient_slice(4, 4), gradient_slice(4, 5)];
        let err = VolumeBuilder::default().build(&slices, (1.0, 1.0), 1.0).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_malformed_slice_rejected() {
        // Fields are public, so a slice can bypass `Slice::new`
        let short = Slice { width: 8, height: 8, data: vec![0.0; 10] };
        let err = VolumeBuilder::default()
            .build(&[gradient_slice(8, 8), short], (1.0, 1.0), 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let flat = Slice { width: 0, height: 4, data: Vec::new() };
        let err = VolumeBuilder::default().build(&[flat], (1.0, 1.0), 1.0).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_non_positive_spacing_rejected() {
        let slices = vec![gradient_slice(4, 4); 2];
        let err = VolumeBuilder::default().build(&slices, (1.0, 0.0), 1.0).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_normalization() {
        let slice = Slice::new(2, 2, vec![10.0, 20.0, 30.0, 60.0]).unwrap();
        let n = slice.normalized();
        assert_eq!(n.data[0], 0.0);
        assert_eq!(n.data[3], 255.0);

        let flat = Slice::new(2, 1, vec![7.0, 7.0]).unwrap().normalized();
        assert_eq!(flat.data, vec![0.0, 0.0]);
    }

    #[test]
    fn test_slice_length_validation() {
        assert!(Slice::new(3, 3, vec![0.0; 8]).is_err());
        assert!(Slice::from_u8(2, 2, &[0, 1, 2, 3]).is_ok());
    }
}
