// Windowed-sinc mesh smoothing
//
// A low-pass filter on vertex positions built from a Chebyshev expansion of
// the umbrella operator. The pass band is a normalized frequency in (0, 2].
// Coefficients carry a Hamming window; the response is calibrated to 1 at the
// pass band and at zero frequency, so the overall shape does not shrink.

use super::triangulate::fan_triangles;
use crate::geometry::{Point3D, Triangle, Vector3D};
use crate::mesh::PolyMesh;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Windowed-sinc smoothing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParams {
    /// Number of filter terms; 0 disables smoothing
    pub iterations: u32,

    /// Pass band in (0, 2]; smaller values smooth more
    pub pass_band: f64,

    /// Dihedral angle (degrees) above which an edge counts as a feature edge.
    /// Voxel staircases bend by 45, 54.7, 60 or 90 degrees; the default keeps
    /// the first two smooth and the last two sharp.
    pub feature_angle_deg: f64,

    /// Move vertices on open boundaries
    pub boundary_smoothing: bool,

    /// Move vertices on feature edges freely instead of only along creases
    pub feature_edge_smoothing: bool,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            iterations: 15,
            pass_band: 0.1,
            feature_angle_deg: 57.0,
            boundary_smoothing: false,
            feature_edge_smoothing: false,
        }
    }
}

fn windowed_terms(iterations: usize, theta: f64) -> Vec<f64> {
    let n = iterations as f64;
    (0..=iterations)
        .map(|i| {
            let i = i as f64;
            let window = 0.54 + 0.46 * (i * PI / (n + 1.0)).cos();
            let sinc = if i == 0.0 { theta / PI } else { 2.0 * (i * theta).sin() / (i * PI) };
            sinc * window
        })
        .collect()
}

/// Filter response at normalized frequency `k` in [0, 2]
fn response(coefficients: &[f64], k: f64) -> f64 {
    let t = (1.0 - 0.5 * k).clamp(-1.0, 1.0).acos();
    coefficients.iter().enumerate().map(|(i, c)| c * (i as f64 * t).cos()).sum()
}

/// Hamming-windowed Chebyshev coefficients, summing to 1.
///
/// The cutoff angle is widened until the windowed response reaches 1 at the
/// pass band, so frequencies below it pass almost unattenuated.
fn filter_coefficients(iterations: usize, pass_band: f64) -> Vec<f64> {
    let theta_pb = (1.0 - 0.5 * pass_band).clamp(-1.0, 1.0).acos();

    let (mut lo, mut hi) = (theta_pb, PI);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if response(&windowed_terms(iterations, mid), pass_band) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let mut coefficients = windowed_terms(iterations, lo);
    let sum: f64 = coefficients.iter().sum();
    if sum.abs() > 1e-12 {
        for c in coefficients.iter_mut() {
            *c /= sum;
        }
    }
    coefficients
}

/// How a vertex takes part in smoothing
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stencil {
    /// Averages over all of its neighbours
    Free,
    /// Slides along the crease through these two feature neighbours
    Crease([usize; 2]),
    /// Stays put: corners, open boundaries, non-manifold fans
    Fixed,
}

/// Classify every vertex from boundary and feature-edge detection.
///
/// A vertex on exactly two feature edges lies on a crease and may only move
/// along it. One or three-plus feature edges make it a corner.
fn vertex_stencils(mesh: &PolyMesh, triangles: &[[usize; 3]], params: &SmoothingParams) -> Vec<Stencil> {
    let n = mesh.vertices.len();

    let mut edge_faces: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (fi, tri) in triangles.iter().enumerate() {
        for e in 0..3 {
            let (u, v) = (tri[e], tri[(e + 1) % 3]);
            edge_faces.entry((u.min(v), u.max(v))).or_default().push(fi);
        }
    }

    let normals: Vec<Option<Vector3D>> = triangles
        .iter()
        .map(|t| Triangle::new(mesh.vertices[t[0]], mesh.vertices[t[1]], mesh.vertices[t[2]]).unit_normal())
        .collect();
    let cos_feature = params.feature_angle_deg.to_radians().cos();

    let mut pinned = vec![false; n];
    let mut feature_neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut boundary_count = 0usize;
    let mut feature_count = 0usize;
    for (&(u, v), faces) in &edge_faces {
        match faces.as_slice() {
            [f0, f1] => {
                // Feature edge when the face normals differ by more than the feature angle
                let sharp = match (normals[*f0], normals[*f1]) {
                    (Some(n0), Some(n1)) => n0.dot(&n1) < cos_feature,
                    _ => false,
                };
                if sharp {
                    feature_count += 1;
                    if !params.feature_edge_smoothing {
                        feature_neighbors[u].push(v);
                        feature_neighbors[v].push(u);
                    }
                }
            }
            _ => {
                // Open boundary (one face) or non-manifold (three or more)
                boundary_count += 1;
                if !params.boundary_smoothing {
                    pinned[u] = true;
                    pinned[v] = true;
                }
            }
        }
    }

    let stencils: Vec<Stencil> = (0..n)
        .map(|i| {
            if pinned[i] {
                return Stencil::Fixed;
            }
            match feature_neighbors[i].as_slice() {
                [] => Stencil::Free,
                &[a, b] => Stencil::Crease([a, b]),
                _ => Stencil::Fixed,
            }
        })
        .collect();

    log::debug!(
        "    Smoothing: {} boundary edges, {} feature edges, {} crease and {} fixed vertices",
        boundary_count,
        feature_count,
        stencils.iter().filter(|s| matches!(s, Stencil::Crease(_))).count(),
        stencils.iter().filter(|s| **s == Stencil::Fixed).count()
    );
    stencils
}

/// Row-normalized umbrella matrix over each vertex's stencil; fixed and
/// isolated vertices map to themselves
fn umbrella_matrix(triangles: &[[usize; 3]], stencils: &[Stencil]) -> CsMat<f64> {
    let n = stencils.len();
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for tri in triangles {
        for e in 0..3 {
            let (u, v) = (tri[e], tri[(e + 1) % 3]);
            neighbors[u].push(v);
            neighbors[v].push(u);
        }
    }

    let mut triplets = TriMat::new((n, n));
    for (i, nbrs) in neighbors.iter_mut().enumerate() {
        nbrs.sort_unstable();
        nbrs.dedup();
        let row: &[usize] = match &stencils[i] {
            Stencil::Free => nbrs.as_slice(),
            Stencil::Crease(ends) => ends.as_slice(),
            Stencil::Fixed => &[],
        };
        if row.is_empty() {
            triplets.add_triplet(i, i, 1.0);
            continue;
        }
        let w = 1.0 / row.len() as f64;
        for &j in row {
            triplets.add_triplet(i, j, w);
        }
    }
    triplets.to_csr()
}

/// Half-step relaxation: 0.5 * (x + W x)
fn relax(w: &CsMat<f64>, x: &[Vector3D]) -> Vec<Vector3D> {
    (0..x.len())
        .map(|i| {
            let mut avg = Vector3D::zeros();
            if let Some(row) = w.outer_view(i) {
                for (j, &val) in row.iter() {
                    avg += x[j] * val;
                }
            }
            (x[i] + avg) * 0.5
        })
        .collect()
}

/// Smooth vertex positions with a windowed-sinc filter. Connectivity is
/// unchanged; polygons are treated as fans for adjacency.
pub fn windowed_sinc(mesh: &PolyMesh, params: &SmoothingParams) -> PolyMesh {
    if params.iterations == 0 || mesh.is_empty() {
        return mesh.clone();
    }

    let n = mesh.vertices.len();
    let triangles: Vec<[usize; 3]> = mesh.polygons.iter().flat_map(|p| fan_triangles(p)).collect();
    let stencils = vertex_stencils(mesh, &triangles, params);
    let w = umbrella_matrix(&triangles, &stencils);
    let coefficients = filter_coefficients(params.iterations as usize, params.pass_band);

    // Chebyshev recursion: x_j = 2 M x_{j-1} - x_{j-2}, with M = (I + W) / 2
    let x0: Vec<Vector3D> = mesh.vertices.iter().map(|p| p.coords).collect();
    let mut previous = x0.clone();
    let mut current = relax(&w, &x0);

    let mut result: Vec<Vector3D> = x0.iter().map(|x| x * coefficients[0]).collect();
    for (r, c) in result.iter_mut().zip(&current) {
        *r += c * coefficients[1];
    }

    for &coefficient in &coefficients[2..] {
        let relaxed = relax(&w, &current);
        let next: Vec<Vector3D> = relaxed
            .iter()
            .zip(&previous)
            .map(|(m, p)| m * 2.0 - p)
            .collect();
        for (r, x) in result.iter_mut().zip(&next) {
            *r += x * coefficient;
        }
        previous = std::mem::replace(&mut current, next);
    }

    let vertices = result
        .iter()
        .zip(&mesh.vertices)
        .zip(&stencils)
        .map(|((r, original), stencil)| {
            let pinned = *stencil == Stencil::Fixed;
            if pinned || !r.iter().all(|c| c.is_finite()) { *original } else { Point3D::from(*r) }
        })
        .collect();

    log::info!(
        "  Windowed-sinc smoothing: {} terms, pass band {:.3}, {} vertices",
        params.iterations, params.pass_band, n
    );

    PolyMesh::new(vertices, mesh.polygons.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::unit_cube;

    /// Open square grid in the xy plane with z perturbed on interior vertices
    fn noisy_grid(n: usize) -> PolyMesh {
        let mut vertices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let interior = x > 0 && y > 0 && x + 1 < n && y + 1 < n;
                let z = if interior && (x + y) % 2 == 0 { 0.3 } else { 0.0 };
                vertices.push(Point3D::new(x as f64, y as f64, z));
            }
        }
        let mut polygons = Vec::new();
        for y in 0..n - 1 {
            for x in 0..n - 1 {
                let i = x + y * n;
                polygons.push(vec![i, i + 1, i + n + 1]);
                polygons.push(vec![i, i + n + 1, i + n]);
            }
        }
        PolyMesh::new(vertices, polygons)
    }

    /// Open square grid folded upward along the column x = `fold`
    fn folded_grid(n: usize, fold: usize) -> PolyMesh {
        let mut grid = noisy_grid(n);
        for v in grid.vertices.iter_mut() {
            v.z = if v.x > fold as f64 { 2.0 * (v.x - fold as f64) } else { 0.0 };
        }
        grid
    }

    fn params_without_features() -> SmoothingParams {
        SmoothingParams { feature_angle_deg: 180.0, ..SmoothingParams::default() }
    }

    #[test]
    fn test_coefficients_sum_to_one() {
        let c = filter_coefficients(15, 0.1);
        assert_eq!(c.len(), 16);
        assert!((c.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_pass_band_and_stop_band() {
        let c = filter_coefficients(15, 0.1);
        for k in [0.0, 0.01, 0.05, 0.1] {
            assert!((response(&c, k) - 1.0).abs() < 0.01, "k = {}: {}", k, response(&c, k));
        }
        for k in [1.0, 1.5, 2.0] {
            assert!(response(&c, k).abs() < 0.01, "k = {}: {}", k, response(&c, k));
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let grid = noisy_grid(6);
        let params = SmoothingParams { iterations: 0, ..SmoothingParams::default() };
        assert_eq!(windowed_sinc(&grid, &params), grid);
    }

    #[test]
    fn test_reduces_noise_and_pins_boundary() {
        let grid = noisy_grid(8);
        let smoothed = windowed_sinc(&grid, &params_without_features());

        let roughness = |m: &PolyMesh| m.vertices.iter().map(|v| v.z.abs()).sum::<f64>();
        assert!(roughness(&smoothed) < roughness(&grid));

        // Boundary vertices untouched
        for y in 0..8 {
            for x in 0..8 {
                if x == 0 || y == 0 || x == 7 || y == 7 {
                    assert_eq!(smoothed.vertices[x + y * 8], grid.vertices[x + y * 8]);
                }
            }
        }
        assert_eq!(smoothed.polygons, grid.polygons);
    }

    #[test]
    fn test_cube_edges_are_features() {
        // Every cube vertex is a corner of three 90 degree edges, so nothing moves
        let cube = PolyMesh::from(&unit_cube());
        let smoothed = windowed_sinc(&cube, &SmoothingParams::default());
        assert_eq!(smoothed.vertices, cube.vertices);
    }

    #[test]
    fn test_does_not_shrink_closed_surface() {
        use crate::geometry::Spacing;
        use crate::processing::marching::marching_tetrahedra;
        use crate::segmentation::Mask;

        let mask = Mask::from_fn((16, 16, 16), Spacing::default(), |x, y, z| {
            let d = |c: usize| c as f64 - 8.0;
            (d(x).powi(2) + d(y).powi(2) + d(z).powi(2)).sqrt() <= 6.0
        });
        let surface = marching_tetrahedra(&mask, 0.5);
        let before = surface.to_mesh().unwrap().volume();
        let after = windowed_sinc(&surface, &params_without_features()).to_mesh().unwrap().volume();

        assert!(after > 0.8 * before, "volume {} -> {}", before, after);
        assert!(after < 1.2 * before, "volume {} -> {}", before, after);
    }

    #[test]
    fn test_fold_vertices_slide_along_crease() {
        let (n, fold) = (7, 3);
        let grid = folded_grid(n, fold);
        let triangles: Vec<[usize; 3]> = grid.polygons.iter().flat_map(|p| fan_triangles(p)).collect();
        let stencils = vertex_stencils(&grid, &triangles, &SmoothingParams::default());

        for y in 1..n - 1 {
            match stencils[fold + y * n] {
                Stencil::Crease(mut ends) => {
                    ends.sort_unstable();
                    assert_eq!(ends, [fold + (y - 1) * n, fold + (y + 1) * n]);
                }
                other => panic!("vertex on fold row {} is {:?}", y, other),
            }
        }
        assert_eq!(stencils[fold], Stencil::Fixed);
        assert_eq!(stencils[1 + 3 * n], Stencil::Free);

        let smoothed = windowed_sinc(&grid, &SmoothingParams::default());
        for y in 0..n {
            let v = smoothed.vertices[fold + y * n];
            assert!((v.x - fold as f64).abs() < 1e-9 && v.z.abs() < 1e-9, "crease vertex left the fold: {:?}", v);
        }
    }

    #[test]
    fn test_default_params_smooth_decimated_voxel_surface() {
        use crate::geometry::Spacing;
        use crate::processing::decimate::decimate;
        use crate::processing::marching::marching_tetrahedra;
        use crate::segmentation::Mask;

        let mask = Mask::from_fn((24, 24, 24), Spacing::default(), |x, y, z| {
            let d = |c: usize| c as f64 - 12.0;
            (d(x).powi(2) + d(y).powi(2) + d(z).powi(2)).sqrt() <= 8.0
        });
        let surface = decimate(&marching_tetrahedra(&mask, 0.5), 0.5);
        let smoothed = windowed_sinc(&surface, &SmoothingParams::default());

        let moved = smoothed
            .vertices
            .iter()
            .zip(&surface.vertices)
            .filter(|(a, b)| (*a - *b).norm() > 1e-3)
            .count();
        assert!(moved * 2 > surface.num_points(), "only {} of {} vertices moved", moved, surface.num_points());

        let before = surface.to_mesh().unwrap().volume();
        let after = smoothed.to_mesh().unwrap().volume();
        assert!((after - before).abs() < 0.1 * before, "volume {} -> {}", before, after);
    }
}
