use crate::geometry::Point3D;
use crate::mesh::PolyMesh;

/// Fan-split a polygon around its first vertex. Polygons with fewer than
/// 3 vertices yield nothing.
pub fn fan_triangles(polygon: &[usize]) -> impl Iterator<Item = [usize; 3]> + '_ {
    let n = polygon.len();
    (1..n.saturating_sub(1)).map(move |i| [polygon[0], polygon[i], polygon[i + 1]])
}

/// Keep only vertices referenced by `faces`, preserving their original order,
/// and remap the face indices.
pub fn compact(vertices: &[Point3D], faces: &[[usize; 3]]) -> PolyMesh {
    let mut remap = vec![usize::MAX; vertices.len()];
    for face in faces {
        for &v in face {
            remap[v] = 0;
        }
    }

    let mut kept = Vec::new();
    for (vi, slot) in remap.iter_mut().enumerate() {
        if *slot == 0 {
            *slot = kept.len();
            kept.push(vertices[vi]);
        }
    }

    let polygons = faces
        .iter()
        .map(|f| vec![remap[f[0]], remap[f[1]], remap[f[2]]])
        .collect();

    PolyMesh::new(kept, polygons)
}

/// Normalize every polygon to triangles.
///
/// Faces that repeat a vertex index are dropped and vertices no longer
/// referenced by any face are removed.
pub fn triangulate(mesh: &PolyMesh) -> PolyMesh {
    let mut faces = Vec::with_capacity(mesh.polygons.len());
    let mut dropped = 0usize;

    for poly in &mesh.polygons {
        if poly.len() < 3 {
            dropped += 1;
            continue;
        }
        for [a, b, c] in fan_triangles(poly) {
            if a == b || b == c || a == c {
                dropped += 1;
                continue;
            }
            faces.push([a, b, c]);
        }
    }

    if dropped > 0 {
        log::debug!("    Triangulation dropped {} degenerate faces", dropped);
    }

    compact(&mesh.vertices, &faces)
}
