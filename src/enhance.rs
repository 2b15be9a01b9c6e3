// Stylized mesh enhancement for visualization
//
// 1. Randomly weighted vertex normals
// 2. Per-vertex spike factor from height, azimuth and a random draw
// 3. Displacement along the normals
// 4. Gaussian jitter
// 5. Power-law exaggeration away from the centroid
//
// Face topology is never touched. Output is not meant for measurement.

use crate::geometry::{Point3D, Vector3D};
use crate::mesh::Mesh;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Parameters of the enhancement, defaults give the stock look
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    /// Apply enhancement in the pipeline at all
    pub enabled: bool,

    /// Displacement scale (applied twice: to the spike factor and the displacement)
    pub base_intensity: f64,

    /// Uniform range of the per face-vertex normal weight
    pub face_weight_range: [f64; 2],

    /// Angular frequency of the height pattern along y
    pub height_frequency: f64,

    pub height_amplitude: f64,

    /// Number of azimuthal lobes around the y axis
    pub radial_harmonic: f64,

    /// Uniform range of the per-vertex random spike term
    pub random_factor_range: [f64; 2],

    /// Standard deviation of the per-axis Gaussian jitter
    pub jitter_sigma: f64,

    pub exaggeration_exponent: f64,

    pub exaggeration_multiplier: f64,

    /// Fixed RNG seed; entropy when `None`
    pub seed: Option<u64>,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_intensity: 5.0,
            face_weight_range: [1.5, 3.0],
            height_frequency: 0.3,
            height_amplitude: 2.0,
            radial_harmonic: 3.0,
            random_factor_range: [0.8, 2.0],
            jitter_sigma: 0.3,
            exaggeration_exponent: 0.3,
            exaggeration_multiplier: 2.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshEnhancer {
    pub config: EnhancementConfig,
}

/// Uniform draw that tolerates a collapsed range
fn uniform(rng: &mut StdRng, range: [f64; 2]) -> f64 {
    let (lo, hi) = (range[0].min(range[1]), range[0].max(range[1]));
    if hi > lo { rng.gen_range(lo..=hi) } else { lo }
}

impl MeshEnhancer {
    pub fn new(config: EnhancementConfig) -> Self {
        Self { config }
    }

    /// Displace the vertices of `mesh`; faces are returned unchanged.
    ///
    /// Fails with [`Error::Enhancement`] only for an empty mesh.
    pub fn enhance(&self, mesh: &Mesh, base_intensity: f64) -> Result<Mesh> {
        if mesh.is_empty() {
            return Err(Error::Enhancement("cannot enhance an empty mesh".to_string()));
        }
        mesh.validate().map_err(|e| Error::Enhancement(e.to_string()))?;

        let cfg = &self.config;
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        log::info!(
            "Enhancing mesh: {} vertices, {} faces, intensity {:.2}",
            mesh.num_vertices(), mesh.num_faces(), base_intensity
        );

        let normals = self.weighted_normals(mesh, &mut rng);

        let mut vertices: Vec<Point3D> = mesh
            .vertices
            .iter()
            .zip(&normals)
            .map(|(v, n)| {
                let height = (v.y * cfg.height_frequency).cos() * cfg.height_amplitude;
                let radial = (v.x.atan2(v.z) * cfg.radial_harmonic).sin();
                let random = uniform(&mut rng, cfg.random_factor_range);
                let spike = (height + radial + random) * base_intensity;
                v + n * spike * base_intensity
            })
            .collect();

        if cfg.jitter_sigma > 0.0 {
            let noise = Normal::new(0.0, cfg.jitter_sigma)
                .map_err(|e| Error::Enhancement(format!("invalid jitter sigma: {}", e)))?;
            for v in vertices.iter_mut() {
                v.x += noise.sample(&mut rng);
                v.y += noise.sample(&mut rng);
                v.z += noise.sample(&mut rng);
            }
        }

        self.exaggerate(&mut vertices);

        let enhanced = Mesh { vertices, faces: mesh.faces.clone() };
        if let Some((min, max)) = enhanced.bounds() {
            log::info!("  Enhanced extent: {:.2} x {:.2} x {:.2}", max.x - min.x, max.y - min.y, max.z - min.z);
        }
        Ok(enhanced)
    }

    /// Per-vertex normals from face normals, each face-vertex incidence
    /// weighted by its own random draw. Degenerate faces contribute nothing.
    fn weighted_normals(&self, mesh: &Mesh, rng: &mut StdRng) -> Vec<Vector3D> {
        let face_normals: Vec<Option<Vector3D>> = (0..mesh.num_faces())
            .into_par_iter()
            .map(|fi| mesh.triangle(fi).unit_normal())
            .collect();

        let mut sums = vec![Vector3D::zeros(); mesh.num_vertices()];
        let mut weights = vec![0.0; mesh.num_vertices()];
        let mut skipped = 0usize;

        for (face, normal) in mesh.faces.iter().zip(&face_normals) {
            let Some(n) = normal else {
                skipped += 1;
                continue;
            };
            for &v in face {
                let w = uniform(rng, self.config.face_weight_range);
                sums[v] += n * w;
                weights[v] += w;
            }
        }

        if skipped > 0 {
            log::warn!("  Skipped {} degenerate faces in normal estimation", skipped);
        }

        sums.iter()
            .zip(&weights)
            .map(|(s, &w)| if w > 0.0 { s / w } else { Vector3D::zeros() })
            .collect()
    }

    /// Scale each vertex offset from the centroid by
    /// (distance / max distance)^exponent * multiplier
    fn exaggerate(&self, vertices: &mut [Point3D]) {
        let centre: Vector3D = vertices.iter().map(|p| p.coords).sum::<Vector3D>() / vertices.len() as f64;
        let max_distance = vertices
            .iter()
            .map(|p| (p.coords - centre).norm())
            .fold(0.0, f64::max);

        if max_distance <= 0.0 || !max_distance.is_finite() {
            log::warn!("  All vertices at the centroid, skipping exaggeration");
            return;
        }

        for v in vertices.iter_mut() {
            let offset = v.coords - centre;
            let factor = (offset.norm() / max_distance).powf(self.config.exaggeration_exponent);
            *v = Point3D::from(centre + offset * factor * self.config.exaggeration_multiplier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::unit_cube;

    fn seeded(seed: u64) -> MeshEnhancer {
        MeshEnhancer::new(EnhancementConfig { seed: Some(seed), ..EnhancementConfig::default() })
    }

    #[test]
    fn test_faces_unchanged() {
        let cube = unit_cube();
        for intensity in [0.0, 1.0, 5.0, -3.0] {
            let enhanced = seeded(1).enhance(&cube, intensity).unwrap();
            assert_eq!(enhanced.faces, cube.faces);
            assert_eq!(enhanced.num_vertices(), cube.num_vertices());
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let cube = unit_cube();
        let a = seeded(42).enhance(&cube, 5.0).unwrap();
        let b = seeded(42).enhance(&cube, 5.0).unwrap();
        let c = seeded(43).enhance(&cube, 5.0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_mesh_fails() {
        let err = MeshEnhancer::default().enhance(&Mesh::default(), 5.0).unwrap_err();
        assert!(matches!(err, Error::Enhancement(_)));
    }

    #[test]
    fn test_out_of_range_face_fails() {
        let mut mesh = unit_cube();
        mesh.faces.push([0, 1, 42]);
        let err = seeded(3).enhance(&mesh, 2.0).unwrap_err();
        assert!(matches!(err, Error::Enhancement(_)));
    }

    #[test]
    fn test_degenerate_faces_do_not_abort() {
        let mut mesh = unit_cube();
        // Collapsed triangle reusing one vertex position
        mesh.vertices.push(mesh.vertices[0]);
        mesh.faces.push([0, 8, 8]);
        let enhanced = seeded(3).enhance(&mesh, 2.0).unwrap();
        assert_eq!(enhanced.faces, mesh.faces);
        assert!(enhanced.vertices.iter().all(|v| v.coords.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn test_exaggeration_without_randomness() {
        let config = EnhancementConfig {
            seed: Some(0),
            face_weight_range: [1.0, 1.0],
            random_factor_range: [0.0, 0.0],
            height_amplitude: 0.0,
            radial_harmonic: 0.0,
            jitter_sigma: 0.0,
            ..EnhancementConfig::default()
        };
        let cube = unit_cube();
        let enhanced = MeshEnhancer::new(config).enhance(&cube, 0.0).unwrap();

        // Every cube corner is at the max distance, so each offset doubles
        let centre = Point3D::new(0.5, 0.5, 0.5);
        for (orig, new) in cube.vertices.iter().zip(&enhanced.vertices) {
            let expected = centre + (orig - centre) * 2.0;
            assert!((new - expected).norm() < 1e-9);
        }
    }
}
