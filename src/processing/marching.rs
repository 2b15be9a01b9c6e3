// Marching tetrahedra over a voxel mask
//
// Every grid cell (8 voxel centres) is split into 6 tetrahedra around its
// main diagonal. Neighbouring cells split their shared faces along the same
// diagonal, so crossings on shared edges weld into a watertight surface.
//
// Per tetrahedron, with "inside" meaning value >= isovalue:
// - 0 or 4 inside: no surface
// - 1 or 3 inside: one triangle (3 edge crossings)
// - 2 inside: a quad (4 edge crossings) emitted as 2 triangles
//
// The mask is padded with one layer of background on every side, so regions
// touching the grid border still produce closed surfaces.

use crate::geometry::{Point3D, Triangle, Vector3D};
use crate::mesh::PolyMesh;
use crate::segmentation::Mask;
use std::collections::HashMap;

/// Cell corners, bit-encoded: index = x | (y << 1) | (z << 2)
const CORNERS: [(usize, usize, usize); 8] = [
    (0, 0, 0), (1, 0, 0), (0, 1, 0), (1, 1, 0),
    (0, 0, 1), (1, 0, 1), (0, 1, 1), (1, 1, 1),
];

/// Kuhn decomposition: 6 tetrahedra sharing the diagonal 0-7
const TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

/// Padded scalar field view of a mask
struct PaddedField<'a> {
    mask: &'a Mask,
    nx: usize,
    ny: usize,
    nz: usize,
}

impl<'a> PaddedField<'a> {
    fn new(mask: &'a Mask) -> Self {
        Self {
            mask,
            nx: mask.width + 2,
            ny: mask.height + 2,
            nz: mask.depth + 2,
        }
    }

    /// Value at padded grid point (px, py, pz); voxel index is p - 1
    fn value(&self, px: usize, py: usize, pz: usize) -> f64 {
        if px == 0 || py == 0 || pz == 0
            || px > self.mask.width || py > self.mask.height || pz > self.mask.depth
        {
            return 0.0;
        }
        if self.mask.is_foreground(px - 1, py - 1, pz - 1) { 1.0 } else { 0.0 }
    }

    fn point_id(&self, px: usize, py: usize, pz: usize) -> usize {
        px + py * self.nx + pz * self.nx * self.ny
    }

    fn position(&self, px: usize, py: usize, pz: usize) -> Point3D {
        let s = self.mask.spacing;
        let o = self.mask.origin;
        Point3D::new(
            o.x + (px as f64 - 1.0) * s.x,
            o.y + (py as f64 - 1.0) * s.y,
            o.z + (pz as f64 - 1.0) * s.z,
        )
    }
}

/// A tetrahedron corner resolved to the grid
#[derive(Clone, Copy)]
struct Corner {
    id: usize,
    position: Point3D,
    value: f64,
}

/// Accumulates welded vertices and oriented triangles
struct SurfaceBuilder {
    isovalue: f64,
    vertices: Vec<Point3D>,
    edge_vertex: HashMap<(usize, usize), usize>,
    polygons: Vec<Vec<usize>>,
}

impl SurfaceBuilder {
    /// Vertex on the grid edge (a, b), shared by every tet touching that edge
    fn crossing(&mut self, a: &Corner, b: &Corner) -> usize {
        let key = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        if let Some(&vi) = self.edge_vertex.get(&key) {
            return vi;
        }

        let ds = b.value - a.value;
        let t = if ds.abs() < 1e-12 { 0.5 } else { ((self.isovalue - a.value) / ds).clamp(0.0, 1.0) };
        let p = Point3D::from(a.position.coords + (b.position - a.position) * t);

        let vi = self.vertices.len();
        self.vertices.push(p);
        self.edge_vertex.insert(key, vi);
        vi
    }

    /// Push triangle (i, j, k) with its normal pointing along `outward`
    fn push_oriented(&mut self, i: usize, j: usize, k: usize, outward: &Vector3D) {
        if i == j || j == k || i == k {
            return;
        }
        let tri = Triangle::new(self.vertices[i], self.vertices[j], self.vertices[k]);
        if tri.cross().dot(outward) >= 0.0 {
            self.polygons.push(vec![i, j, k]);
        } else {
            self.polygons.push(vec![i, k, j]);
        }
    }

    fn march_tet(&mut self, corners: [Corner; 4]) {
        let (inside, outside): (Vec<Corner>, Vec<Corner>) =
            corners.iter().partition(|c| c.value >= self.isovalue);

        if inside.is_empty() || outside.is_empty() {
            return;
        }

        // Surface normal points from the inside corners towards the outside ones
        let centre = |cs: &[Corner]| -> Vector3D {
            cs.iter().map(|c| c.position.coords).sum::<Vector3D>() / cs.len() as f64
        };
        let outward = centre(&outside) - centre(&inside);

        match inside.len() {
            1 | 3 => {
                let (lone, others) = if inside.len() == 1 { (&inside, &outside) } else { (&outside, &inside) };
                let a = self.crossing(&lone[0], &others[0]);
                let b = self.crossing(&lone[0], &others[1]);
                let c = self.crossing(&lone[0], &others[2]);
                self.push_oriented(a, b, c, &outward);
            }
            2 => {
                // Crossings in cyclic order around the quad
                let p0 = self.crossing(&inside[0], &outside[0]);
                let p1 = self.crossing(&inside[0], &outside[1]);
                let p2 = self.crossing(&inside[1], &outside[1]);
                let p3 = self.crossing(&inside[1], &outside[0]);
                self.push_oriented(p0, p1, p2, &outward);
                self.push_oriented(p0, p2, p3, &outward);
            }
            _ => unreachable!(),
        }
    }
}

/// Extract the `isovalue` surface of a binary mask as a triangle mesh in
/// physical coordinates.
///
/// `mask` must be well formed ([`Mask::is_well_formed`]).
pub fn marching_tetrahedra(mask: &Mask, isovalue: f64) -> PolyMesh {
    let field = PaddedField::new(mask);
    let mut builder = SurfaceBuilder {
        isovalue,
        vertices: Vec::new(),
        edge_vertex: HashMap::new(),
        polygons: Vec::new(),
    };

    let mut active_cells = 0usize;
    for cz in 0..field.nz - 1 {
        for cy in 0..field.ny - 1 {
            for cx in 0..field.nx - 1 {
                let corners: [Corner; 8] = std::array::from_fn(|i| {
                    let (dx, dy, dz) = CORNERS[i];
                    let (px, py, pz) = (cx + dx, cy + dy, cz + dz);
                    Corner {
                        id: field.point_id(px, py, pz),
                        position: field.position(px, py, pz),
                        value: field.value(px, py, pz),
                    }
                });

                let inside = corners.iter().filter(|c| c.value >= isovalue).count();
                if inside == 0 || inside == 8 {
                    continue;
                }
                active_cells += 1;

                for tet in &TETS {
                    builder.march_tet([corners[tet[0]], corners[tet[1]], corners[tet[2]], corners[tet[3]]]);
                }
            }
        }
    }

    log::info!(
        "  Marching tetrahedra (iso {:.2}): {} active cells, {} vertices, {} triangles",
        isovalue, active_cells, builder.vertices.len(), builder.polygons.len()
    );

    PolyMesh::new(builder.vertices, builder.polygons)
}
