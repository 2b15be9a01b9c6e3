// Slice-stack reconstruction: volume, segmentation, metrics and surface mesh
pub mod geometry;
pub mod volume;
pub mod segmentation;
pub mod slice_analysis;
pub mod metrics;
pub mod mesh;
pub mod processing;
pub mod enhance;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use geometry::{Point3D, Vector3D, Spacing, Triangle};
pub use volume::{Slice, Volume, VolumeBuilder};
pub use segmentation::{Mask, Segmenter};
pub use metrics::{DepthPolicy, Metrics, MetricsCalculator};
pub use mesh::{Mesh, MeshError, MeshRecord, PolyMesh};
pub use processing::{MeshProcessor, NativeProcessor, SmoothingParams, SurfaceMeshExtractor};
pub use enhance::{EnhancementConfig, MeshEnhancer};
pub use config::{load_config, ReconstructionConfig};
pub use pipeline::{ReconstructionOutcome, ReconstructionRequest, ReconstructionResult, Reconstructor};

use serde::{Deserialize, Serialize};

/// Main result type for reconstruction
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    VolumeBuilder,
    Segmenter,
    MetricsCalculator,
    SurfaceMeshExtractor,
    MeshEnhancer,
    Config,
    Export,
}

/// Error types for reconstruction
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Segmentation failed: {0}")]
    Segmentation(String),

    #[error("Measurement failed: {0}")]
    Metrics(String),

    #[error("Mesh extraction failed: {0}")]
    MeshExtraction(String),

    #[error("Enhancement failed: {0}")]
    Enhancement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stage that raised this error
    pub fn stage(&self) -> Stage {
        match self {
            Error::Input(_) => Stage::VolumeBuilder,
            Error::Segmentation(_) => Stage::Segmenter,
            Error::Metrics(_) => Stage::MetricsCalculator,
            Error::MeshExtraction(_) => Stage::SurfaceMeshExtractor,
            Error::Enhancement(_) => Stage::MeshEnhancer,
            Error::Config(_) => Stage::Config,
            Error::Mesh(MeshError::WriteError(_)) | Error::Io(_) => Stage::Export,
            Error::Mesh(_) => Stage::SurfaceMeshExtractor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attribution() {
        assert_eq!(Error::Input("x".into()).stage(), Stage::VolumeBuilder);
        assert_eq!(Error::Segmentation("x".into()).stage(), Stage::Segmenter);
        assert_eq!(Error::Mesh(MeshError::DegeneratePolygon(0)).stage(), Stage::SurfaceMeshExtractor);
        assert_eq!(Error::Mesh(MeshError::WriteError("disk".into())).stage(), Stage::Export);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::SurfaceMeshExtractor).unwrap();
        assert_eq!(json, "\"surface_mesh_extractor\"");
    }
}
