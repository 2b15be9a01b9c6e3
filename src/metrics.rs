use crate::segmentation::Mask;
use crate::slice_analysis::boundary_length;
use crate::{Error, Result};
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Labels (compared trimmed and lowercase) that mean "no structure present"
pub const DEFAULT_NO_STRUCTURE_LABELS: [&str; 3] = ["notumor", "notumor tumor", "no tumor"];

/// Range of the randomized depth placeholder, in mm
pub const RANDOM_DEPTH_RANGE: (f64, f64) = (1.0, 12.0);

/// Physical measurements of a segmented region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub volume_mm3: f64,
    pub surface_area_mm2: f64,
    pub depth_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
    pub num_slices: u32,
    pub slice_thickness_mm: f64,
    pub centroid_mm: [f64; 3],
    pub principal_moments_mm3: [f64; 3],
}

/// How `depth_mm` is produced
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DepthPolicy {
    /// Bounding-box z extent times the slice thickness
    #[default]
    Geometric,
    /// Uniform draw in [`RANDOM_DEPTH_RANGE`], rounded to 0.01
    Randomized { seed: Option<u64> },
}

/// Voxel-index bounding box, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelBounds {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl VoxelBounds {
    /// Number of voxels spanned along each axis
    pub fn extent(&self) -> [usize; 3] {
        [
            self.max[0] - self.min[0] + 1,
            self.max[1] - self.min[1] + 1,
            self.max[2] - self.min[2] + 1,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    pub depth_policy: DepthPolicy,
    pub no_structure_labels: Vec<String>,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self {
            depth_policy: DepthPolicy::Geometric,
            no_structure_labels: DEFAULT_NO_STRUCTURE_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MetricsCalculator {
    pub fn new(depth_policy: DepthPolicy, no_structure_labels: Vec<String>) -> Self {
        Self { depth_policy, no_structure_labels }
    }

    /// True when `label` names the no-structure class
    pub fn is_no_structure(&self, label: &str) -> bool {
        let label = label.trim().to_lowercase();
        self.no_structure_labels.iter().any(|l| l.trim().to_lowercase() == label)
    }

    /// Measure `mask` without a classification label
    pub fn measure(&self, mask: &Mask) -> Result<Metrics> {
        self.measure_labeled(mask, None)
    }

    /// Measure `mask`; a no-structure `label` forces `depth_mm` to 0.
    ///
    /// Surface area is the perimeter of the region's projection onto the
    /// xy plane times the slice thickness. It is a cheap approximation,
    /// not a surface integral.
    pub fn measure_labeled(&self, mask: &Mask, label: Option<&str>) -> Result<Metrics> {
        if !mask.is_well_formed() {
            return Err(Error::Metrics(format!(
                "mask holds {} voxels, expected {}x{}x{}",
                mask.data.len(), mask.width, mask.height, mask.depth
            )));
        }
        let spacing = mask.spacing;
        let bounds = foreground_bounds(mask)
            .ok_or_else(|| Error::Metrics("mask has no foreground voxels".to_string()))?;
        let count = mask.foreground_count();

        let extent = bounds.extent();
        let width_mm = extent[0] as f64 * spacing.x;
        let height_mm = extent[1] as f64 * spacing.y;
        let geometric_depth = extent[2] as f64 * spacing.z;

        let volume_mm3 = count as f64 * spacing.voxel_volume();

        let projection = project_xy(mask);
        let perimeter = boundary_length(mask.width, mask.height, &projection, spacing.x, spacing.y);
        let surface_area_mm2 = perimeter * spacing.z;

        let (centroid, moments) = centroid_and_principal_moments(mask, count);

        let depth_mm = match label {
            Some(l) if self.is_no_structure(l) => {
                log::info!("  Classification '{}' is no-structure, depth forced to 0", l);
                0.0
            }
            _ => match self.depth_policy {
                DepthPolicy::Geometric => geometric_depth,
                DepthPolicy::Randomized { seed } => {
                    let mut rng = match seed {
                        Some(s) => StdRng::seed_from_u64(s),
                        None => StdRng::from_entropy(),
                    };
                    let d: f64 = rng.gen_range(RANDOM_DEPTH_RANGE.0..=RANDOM_DEPTH_RANGE.1);
                    (d * 100.0).round() / 100.0
                }
            },
        };

        let metrics = Metrics {
            volume_mm3,
            surface_area_mm2,
            depth_mm,
            width_mm,
            height_mm,
            num_slices: extent[2] as u32,
            slice_thickness_mm: spacing.z,
            centroid_mm: [centroid.x, centroid.y, centroid.z],
            principal_moments_mm3: moments,
        };

        log::info!(
            "Metrics: volume {:.2} mm3, surface {:.2} mm2, {:.2}x{:.2}x{:.2} mm, {} slices",
            metrics.volume_mm3, metrics.surface_area_mm2,
            metrics.width_mm, metrics.height_mm, metrics.depth_mm, metrics.num_slices
        );

        Ok(metrics)
    }
}

/// Inclusive voxel bounding box of the foreground, `None` when empty
pub fn foreground_bounds(mask: &Mask) -> Option<VoxelBounds> {
    let mut voxels = mask.foreground_voxels();
    let (x, y, z) = voxels.next()?;
    let mut bounds = VoxelBounds { min: [x, y, z], max: [x, y, z] };

    for (x, y, z) in voxels {
        for (axis, v) in [x, y, z].into_iter().enumerate() {
            bounds.min[axis] = bounds.min[axis].min(v);
            bounds.max[axis] = bounds.max[axis].max(v);
        }
    }
    Some(bounds)
}

/// Union of all z layers of the mask
fn project_xy(mask: &Mask) -> Vec<bool> {
    let mut projection = vec![false; mask.width * mask.height];
    for (x, y, _) in mask.foreground_voxels() {
        projection[x + y * mask.width] = true;
    }
    projection
}

/// Physical centroid and ascending eigenvalues of the coordinate covariance
fn centroid_and_principal_moments(mask: &Mask, count: usize) -> (Vector3<f64>, [f64; 3]) {
    let to_physical = |(x, y, z): (usize, usize, usize)| {
        Vector3::new(
            mask.origin.x + x as f64 * mask.spacing.x,
            mask.origin.y + y as f64 * mask.spacing.y,
            mask.origin.z + z as f64 * mask.spacing.z,
        )
    };

    let n = count as f64;
    let mut sum = Vector3::zeros();
    for v in mask.foreground_voxels() {
        sum += to_physical(v);
    }
    let centroid = sum / n;

    let mut covariance = Matrix3::zeros();
    for v in mask.foreground_voxels() {
        let d = to_physical(v) - centroid;
        covariance += d * d.transpose();
    }
    covariance /= n;

    let eigen = SymmetricEigen::new(covariance);
    let mut moments = [eigen.eigenvalues[0], eigen.eigenvalues[1], eigen.eigenvalues[2]];
    moments.sort_by(|a, b| a.total_cmp(b));
    // Clamp round-off below zero
    for m in moments.iter_mut() {
        if *m < 0.0 && *m > -1e-9 {
            *m = 0.0;
        }
    }

    (centroid, moments)
}
