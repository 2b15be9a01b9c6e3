// Surface mesh processing
//
// Mask -> isosurface -> decimation -> smoothing -> triangulation.
// Each geometric step goes through the `MeshProcessor` capability so the
// backend can be swapped (or faked in tests) without touching the driver.

pub mod decimate;
pub mod marching;
pub mod smooth;
pub mod triangulate;

pub use smooth::SmoothingParams;

use crate::mesh::{Mesh, PolyMesh};
use crate::segmentation::Mask;
use crate::{Error, Result};

/// Polygon mesh processing capability
pub trait MeshProcessor: Send + Sync {
    /// Surface where the mask's scalar field crosses `isovalue`
    fn extract_isosurface(&self, mask: &Mask, isovalue: f64) -> PolyMesh;

    /// Topology-preserving simplification by the fraction `target_reduction`
    fn decimate(&self, mesh: &PolyMesh, target_reduction: f64) -> PolyMesh;

    /// Low-pass, non-shrinking smoothing
    fn smooth(&self, mesh: &PolyMesh, params: &SmoothingParams) -> PolyMesh;

    /// Split every polygon into triangles
    fn triangulate(&self, mesh: &PolyMesh) -> PolyMesh;
}

/// Pure-Rust backend: marching tetrahedra, quadric edge collapse,
/// windowed-sinc smoothing and fan triangulation
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProcessor;

impl MeshProcessor for NativeProcessor {
    fn extract_isosurface(&self, mask: &Mask, isovalue: f64) -> PolyMesh {
        marching::marching_tetrahedra(mask, isovalue)
    }

    fn decimate(&self, mesh: &PolyMesh, target_reduction: f64) -> PolyMesh {
        decimate::decimate(mesh, target_reduction)
    }

    fn smooth(&self, mesh: &PolyMesh, params: &SmoothingParams) -> PolyMesh {
        smooth::windowed_sinc(mesh, params)
    }

    fn triangulate(&self, mesh: &PolyMesh) -> PolyMesh {
        triangulate::triangulate(mesh)
    }
}

/// Configuration for surface extraction
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Primary isovalue (binary midpoint)
    pub isovalue: f64,

    /// Isovalue for the single retry when the primary pass is empty
    pub fallback_isovalue: f64,

    /// Smoothing settings; `iterations` is overridden per call
    pub smoothing: SmoothingParams,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            isovalue: 0.5,
            fallback_isovalue: 0.1,
            smoothing: SmoothingParams::default(),
        }
    }
}

/// Drives a [`MeshProcessor`] from a segmented mask to a triangle mesh
#[derive(Debug, Clone, Default)]
pub struct SurfaceMeshExtractor<P: MeshProcessor = NativeProcessor> {
    pub processor: P,
    pub config: ExtractionConfig,
}

impl SurfaceMeshExtractor<NativeProcessor> {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { processor: NativeProcessor, config }
    }
}

impl<P: MeshProcessor> SurfaceMeshExtractor<P> {
    pub fn with_processor(processor: P, config: ExtractionConfig) -> Self {
        Self { processor, config }
    }

    /// Extract, decimate, smooth and triangulate the surface of `mask`.
    ///
    /// Output vertices are in physical coordinates. Fails with
    /// [`Error::MeshExtraction`] when any stage leaves an empty mesh, after
    /// one retry of the isosurface at the fallback isovalue.
    pub fn extract(&self, mask: &Mask, target_reduction: f64, smoothing_iterations: u32) -> Result<Mesh> {
        if !(0.0..1.0).contains(&target_reduction) {
            return Err(Error::MeshExtraction(format!(
                "target reduction {} outside [0, 1)",
                target_reduction
            )));
        }

        if !mask.is_well_formed() {
            return Err(Error::MeshExtraction(format!(
                "mask holds {} voxels, expected {}x{}x{}",
                mask.data.len(), mask.width, mask.height, mask.depth
            )));
        }

        log::info!(
            "Extracting surface mesh (reduction {:.2}, {} smoothing iterations)",
            target_reduction, smoothing_iterations
        );

        let mut surface = self.processor.extract_isosurface(mask, self.config.isovalue);
        if surface.num_points() == 0 {
            log::warn!(
                "  Isosurface at {} is empty, retrying at {}",
                self.config.isovalue, self.config.fallback_isovalue
            );
            surface = self.processor.extract_isosurface(mask, self.config.fallback_isovalue);
        }
        non_empty(&surface, "isosurface extraction")?;

        let decimated = self.processor.decimate(&surface, target_reduction);
        non_empty(&decimated, "decimation")?;

        let params = SmoothingParams { iterations: smoothing_iterations, ..self.config.smoothing.clone() };
        let smoothed = self.processor.smooth(&decimated, &params);
        non_empty(&smoothed, "smoothing")?;

        let triangulated = self.processor.triangulate(&smoothed);
        non_empty(&triangulated, "triangulation")?;

        let mesh = triangulated
            .to_mesh()
            .map_err(|e| Error::MeshExtraction(format!("triangulation left an invalid mesh: {}", e)))?;
        log::info!("  Surface mesh: {} vertices, {} faces", mesh.num_vertices(), mesh.num_faces());
        Ok(mesh)
    }
}

fn non_empty(mesh: &PolyMesh, stage: &str) -> Result<()> {
    if mesh.is_empty() {
        return Err(Error::MeshExtraction(format!("{} produced an empty mesh", stage)));
    }
    Ok(())
}
