use crate::enhance::EnhancementConfig;
use crate::metrics::{DepthPolicy, DEFAULT_NO_STRUCTURE_LABELS};
use crate::processing::{ExtractionConfig, SmoothingParams};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for a whole reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// In-plane pixel spacing (mm), used when a request carries none
    pub pixel_spacing: [f64; 2],

    /// Distance between slices (mm), used when a request carries none
    pub slice_thickness: f64,

    /// Rescale every slice to 0..255 before stacking
    pub normalize_intensity: bool,

    pub isovalue: f64,
    pub fallback_isovalue: f64,

    /// Fraction of triangles removed by decimation, in [0, 1)
    pub target_reduction: f64,

    pub smoothing_iterations: u32,
    pub pass_band: f64,
    pub feature_angle_deg: f64,
    pub boundary_smoothing: bool,
    pub feature_edge_smoothing: bool,

    pub depth_policy: DepthPolicy,

    /// Classification labels that force `depth_mm` to zero
    pub no_structure_labels: Vec<String>,

    pub enhancement: EnhancementConfig,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 3.0,
            normalize_intensity: false,
            isovalue: 0.5,
            fallback_isovalue: 0.1,
            target_reduction: 0.5,
            smoothing_iterations: 15,
            pass_band: 0.1,
            feature_angle_deg: 57.0,
            boundary_smoothing: false,
            feature_edge_smoothing: false,
            depth_policy: DepthPolicy::Geometric,
            no_structure_labels: DEFAULT_NO_STRUCTURE_LABELS.iter().map(|s| s.to_string()).collect(),
            enhancement: EnhancementConfig::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !self.pixel_spacing.iter().all(|&s| positive(s)) || !positive(self.slice_thickness) {
            return Err(Error::Config(format!(
                "spacing must be positive, got pixel spacing {:?} and slice thickness {}",
                self.pixel_spacing, self.slice_thickness
            )));
        }
        if !(0.0..1.0).contains(&self.target_reduction) {
            return Err(Error::Config(format!(
                "target_reduction must be in [0, 1), got {}",
                self.target_reduction
            )));
        }
        if !(self.pass_band > 0.0 && self.pass_band <= 2.0) {
            return Err(Error::Config(format!("pass_band must be in (0, 2], got {}", self.pass_band)));
        }
        if !self.isovalue.is_finite() || !self.fallback_isovalue.is_finite() {
            return Err(Error::Config("isovalues must be finite".to_string()));
        }
        Ok(())
    }

    /// Surface extraction settings derived from this config
    pub fn extraction(&self) -> ExtractionConfig {
        ExtractionConfig {
            isovalue: self.isovalue,
            fallback_isovalue: self.fallback_isovalue,
            smoothing: SmoothingParams {
                iterations: self.smoothing_iterations,
                pass_band: self.pass_band,
                feature_angle_deg: self.feature_angle_deg,
                boundary_smoothing: self.boundary_smoothing,
                feature_edge_smoothing: self.feature_edge_smoothing,
            },
        }
    }
}

/// Read and validate a JSON config; missing fields take their defaults
pub fn load_config(path: &Path) -> Result<ReconstructionConfig> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;
    let config: ReconstructionConfig = serde_json::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
