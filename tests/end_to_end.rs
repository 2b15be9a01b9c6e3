use slice_recon::geometry::Spacing;
use slice_recon::{
    EnhancementConfig, MeshEnhancer, ReconstructionConfig, ReconstructionOutcome, ReconstructionRequest,
    Reconstructor, Segmenter, Slice, Stage, SurfaceMeshExtractor, VolumeBuilder,
};
use slice_recon::processing::ExtractionConfig;
use slice_recon::segmentation::Mask;

fn seeded_config() -> ReconstructionConfig {
    ReconstructionConfig {
        enhancement: EnhancementConfig { seed: Some(11), ..EnhancementConfig::default() },
        ..ReconstructionConfig::default()
    }
}

fn centered_square(size: usize, half: usize) -> Slice {
    let c = size / 2;
    Slice::from_fn(size, size, |x, y| {
        let inside = x + half >= c && x < c + half && y + half >= c && y < c + half;
        if inside { 230.0 } else { 15.0 }
    })
}

#[test]
fn test_blank_slices_fail_at_segmenter() {
    let reconstructor = Reconstructor::new(seeded_config()).unwrap();
    let request = ReconstructionRequest::new(vec![Slice::from_fn(64, 64, |_, _| 0.0); 5]);

    match reconstructor.run(&request) {
        ReconstructionOutcome::Failure { stage, error, .. } => {
            assert_eq!(stage, Stage::Segmenter);
            assert!(!error.is_empty());
        }
        other => panic!("expected segmentation failure, got {:?}", other),
    }
}

#[test]
fn test_malformed_slice_fails_at_volume_builder() {
    let reconstructor = Reconstructor::new(seeded_config()).unwrap();
    let short = Slice { width: 8, height: 8, data: vec![0.0; 10] };
    let request = ReconstructionRequest::new(vec![centered_square(8, 2), short]);

    match reconstructor.run(&request) {
        ReconstructionOutcome::Failure { stage, .. } => assert_eq!(stage, Stage::VolumeBuilder),
        other => panic!("expected input failure, got {:?}", other),
    }
}

#[test]
fn test_centered_squares_reconstruct() {
    let reconstructor = Reconstructor::new(seeded_config()).unwrap();
    let request = ReconstructionRequest::new(vec![centered_square(64, 10); 5]);

    let result = reconstructor.reconstruct(&request).unwrap();
    assert_eq!(result.metrics.num_slices, 5);
    assert!(result.metrics.volume_mm3 > 0.0);
    // 20x20 px square, 5 slices of 3 mm
    assert!((result.metrics.volume_mm3 - 400.0 * 5.0 * 3.0).abs() < 1e-9);
    assert!(!result.mesh.is_empty());
    let nv = result.mesh.num_vertices();
    assert!(result.mesh.faces.iter().flatten().all(|&i| i < nv));
}

#[test]
fn test_single_slice_replicated() {
    let slice = centered_square(32, 6);
    let volume = VolumeBuilder::default().build(&[slice.clone()], (1.0, 1.0), 3.0).unwrap();
    assert_eq!(volume.depth, 3);
    for z in 0..3 {
        assert_eq!(volume.layer(z), slice);
    }

    let mask = Segmenter::new().segment(&volume).unwrap();
    assert!(mask.is_congruent_with(&volume));
}

#[test]
fn test_sphere_decimation_monotone() {
    let n = 24;
    let radius = 8.0;
    let c = n as f64 / 2.0;
    let mask = Mask::from_fn((n, n, n), Spacing::default(), |x, y, z| {
        let (dx, dy, dz) = (x as f64 - c, y as f64 - c, z as f64 - c);
        (dx * dx + dy * dy + dz * dz).sqrt() <= radius
    });
    let extractor = SurfaceMeshExtractor::new(ExtractionConfig::default());

    let mut previous = usize::MAX;
    for reduction in [0.0, 0.3, 0.6, 0.9] {
        let mesh = extractor.extract(&mask, reduction, 15).unwrap();
        let nv = mesh.num_vertices();
        assert!(nv > 0);
        assert!(nv <= previous, "reduction {}: {} vertices after {}", reduction, nv, previous);
        assert!(mesh.faces.iter().flatten().all(|&i| i < nv));
        previous = nv;
    }
}

#[test]
fn test_enhancement_preserves_faces() {
    let reconstructor = Reconstructor::new(ReconstructionConfig {
        enhancement: EnhancementConfig { enabled: false, ..EnhancementConfig::default() },
        ..ReconstructionConfig::default()
    })
    .unwrap();
    let plain = reconstructor
        .reconstruct(&ReconstructionRequest::new(vec![centered_square(32, 6); 4]))
        .unwrap()
        .mesh;

    for intensity in [0.5, 5.0, 20.0] {
        let enhanced = MeshEnhancer::new(EnhancementConfig { seed: Some(2), ..EnhancementConfig::default() })
            .enhance(&plain, intensity)
            .unwrap();
        assert_eq!(enhanced.faces, plain.faces);
        assert_ne!(enhanced.vertices, plain.vertices);
    }
}

#[test]
fn test_stl_export_of_result() {
    let reconstructor = Reconstructor::new(seeded_config()).unwrap();
    let result = reconstructor
        .reconstruct(&ReconstructionRequest::new(vec![centered_square(32, 6); 3]))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.stl");
    result.mesh.write_stl(&path).unwrap();
    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, 84 + 50 * result.mesh.num_faces() as u64);
}
