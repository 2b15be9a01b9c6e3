// Reconstruction pipeline
// slices -> volume -> mask -> {metrics, surface mesh -> enhanced mesh}
//
// A `Reconstructor` holds only immutable settings and a processing backend.
// Every request builds its own volume and mask, so one instance can serve
// concurrent requests.

use crate::config::ReconstructionConfig;
use crate::enhance::MeshEnhancer;
use crate::geometry::Spacing;
use crate::mesh::{Mesh, MeshRecord};
use crate::metrics::{Metrics, MetricsCalculator};
use crate::processing::{MeshProcessor, NativeProcessor, SurfaceMeshExtractor};
use crate::segmentation::Segmenter;
use crate::slice_analysis::analyze_slice;
use crate::volume::{Slice, VolumeBuilder};
use crate::{Error, Result, Stage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One reconstruction job
#[derive(Debug, Clone, Default)]
pub struct ReconstructionRequest {
    /// Ordered, equally sized grayscale slices
    pub slices: Vec<Slice>,

    /// In-plane spacing (mm); config default when `None`
    pub pixel_spacing: Option<(f64, f64)>,

    /// Slice distance (mm); config default when `None`
    pub slice_thickness: Option<f64>,

    /// Externally determined class label, only used to gate the depth metric
    pub classification: Option<String>,
}

impl ReconstructionRequest {
    pub fn new(slices: Vec<Slice>) -> Self {
        Self { slices, ..Default::default() }
    }
}

/// Successful reconstruction: the wire record plus the in-memory mesh
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    pub metrics: Metrics,
    pub mesh: Mesh,
    pub spacing: Spacing,
}

impl ReconstructionResult {
    pub fn mesh_record(&self) -> MeshRecord {
        self.mesh.to_record(self.spacing)
    }
}

/// Boundary record: success with data, or the failing stage and its cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReconstructionOutcome {
    Success {
        success: SuccessFlag<true>,
        metrics: Metrics,
        mesh: MeshRecord,
    },
    Failure {
        success: SuccessFlag<false>,
        stage: Stage,
        error: String,
    },
}

/// Serializes as the boolean `B` and only deserializes from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuccessFlag<const B: bool>;

impl<const B: bool> Serialize for SuccessFlag<B> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bool(B)
    }
}

impl<'de, const B: bool> Deserialize<'de> for SuccessFlag<B> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = bool::deserialize(deserializer)?;
        if value == B {
            Ok(SuccessFlag)
        } else {
            Err(serde::de::Error::custom(format!("expected success = {}", B)))
        }
    }
}

impl ReconstructionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReconstructionOutcome::Success { .. })
    }

    pub fn failure(error: &Error) -> Self {
        ReconstructionOutcome::Failure {
            success: SuccessFlag,
            stage: error.stage(),
            error: error.to_string(),
        }
    }
}

impl From<Result<ReconstructionResult>> for ReconstructionOutcome {
    fn from(result: Result<ReconstructionResult>) -> Self {
        match result {
            Ok(r) => ReconstructionOutcome::Success {
                success: SuccessFlag,
                mesh: r.mesh_record(),
                metrics: r.metrics,
            },
            Err(e) => ReconstructionOutcome::failure(&e),
        }
    }
}

/// Runs the full pipeline for independent requests
#[derive(Debug, Clone, Default)]
pub struct Reconstructor<P: MeshProcessor = NativeProcessor> {
    config: ReconstructionConfig,
    extractor: SurfaceMeshExtractor<P>,
}

impl Reconstructor<NativeProcessor> {
    pub fn new(config: ReconstructionConfig) -> Result<Self> {
        Self::with_processor(config, NativeProcessor)
    }
}

impl<P: MeshProcessor> Reconstructor<P> {
    pub fn with_processor(config: ReconstructionConfig, processor: P) -> Result<Self> {
        config.validate()?;
        let extractor = SurfaceMeshExtractor::with_processor(processor, config.extraction());
        Ok(Self { config, extractor })
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Run every stage for `request`, stopping at the first failure
    pub fn reconstruct(&self, request: &ReconstructionRequest) -> Result<ReconstructionResult> {
        let cfg = &self.config;
        let pixel_spacing = request
            .pixel_spacing
            .unwrap_or((cfg.pixel_spacing[0], cfg.pixel_spacing[1]));
        let slice_thickness = request.slice_thickness.unwrap_or(cfg.slice_thickness);

        log::info!("=== Reconstruction Started ({} slices) ===", request.slices.len());

        log::info!("Step 1/5: Building volume...");
        let volume = VolumeBuilder::new(cfg.normalize_intensity).build(
            &request.slices,
            pixel_spacing,
            slice_thickness,
        )?;

        let middle = &request.slices[request.slices.len() / 2];
        let contour = analyze_slice(middle);
        log::info!(
            "  Middle slice contour: area {} px, perimeter {} px, circularity {:.3}",
            contour.area_pixels, contour.perimeter_pixels, contour.circularity
        );

        log::info!("Step 2/5: Segmenting...");
        let mask = Segmenter::new().segment(&volume)?;

        log::info!("Step 3/5: Measuring...");
        let calculator = MetricsCalculator::new(cfg.depth_policy, cfg.no_structure_labels.clone());
        let metrics = calculator.measure_labeled(&mask, request.classification.as_deref())?;

        log::info!("Step 4/5: Extracting surface mesh...");
        let mesh = self.extractor.extract(&mask, cfg.target_reduction, cfg.smoothing_iterations)?;

        let mesh = if cfg.enhancement.enabled {
            log::info!("Step 5/5: Enhancing mesh...");
            MeshEnhancer::new(cfg.enhancement.clone()).enhance(&mesh, cfg.enhancement.base_intensity)?
        } else {
            log::info!("Step 5/5: Enhancement disabled");
            mesh
        };

        log::info!("=== Reconstruction Complete ===");
        log::info!("  Volume: {:.2} mm3, mesh: {} vertices / {} faces",
            metrics.volume_mm3, mesh.num_vertices(), mesh.num_faces());

        Ok(ReconstructionResult { metrics, mesh, spacing: volume.spacing })
    }

    /// Like [`Self::reconstruct`], but always returns a boundary record
    pub fn run(&self, request: &ReconstructionRequest) -> ReconstructionOutcome {
        let result = self.reconstruct(request);
        if let Err(e) = &result {
            log::error!("Reconstruction failed at {:?}: {}", e.stage(), e);
        }
        result.into()
    }

    /// Run independent requests in parallel; outcomes keep the input order
    pub fn run_batch(&self, requests: &[ReconstructionRequest]) -> Vec<ReconstructionOutcome> {
        log::info!("Running batch of {} reconstructions", requests.len());
        requests.par_iter().map(|r| self.run(r)).collect()
    }
}
