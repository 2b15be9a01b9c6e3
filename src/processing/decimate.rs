// Topology-preserving edge-collapse decimation
//
// Quadric error metrics drive the collapse order. An edge (a, b) is only
// collapsed when the result stays a manifold of the same topology:
// - neither endpoint lies on a boundary or non-manifold fan
// - the link condition holds (a and b share exactly the two opposite vertices)
// - no vertex drops below degree 3
// - no surviving face flips or degenerates
//
// The collapse order does not depend on the requested reduction, so a larger
// reduction always continues the sequence of a smaller one.

use super::triangulate::{compact, fan_triangles};
use crate::geometry::{Point3D, Triangle};
use crate::mesh::PolyMesh;
use nalgebra::{Matrix4, Vector4};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

type Quadric = Matrix4<f64>;

/// Heap entry: cost, edge endpoints and the endpoint versions it was computed for
type Candidate = Reverse<(OrderedFloat<f64>, usize, usize, u32, u32)>;

struct DecimationMesh {
    vertices: Vec<Point3D>,
    faces: Vec<[usize; 3]>,
    face_alive: Vec<bool>,
    vertex_alive: Vec<bool>,
    vertex_faces: Vec<Vec<usize>>,
    quadrics: Vec<Quadric>,
    versions: Vec<u32>,
    alive_faces: usize,
}

impl DecimationMesh {
    fn from_poly(mesh: &PolyMesh) -> Self {
        let faces: Vec<[usize; 3]> = mesh
            .polygons
            .iter()
            .flat_map(|p| fan_triangles(p))
            .filter(|&[a, b, c]| a != b && b != c && a != c)
            .collect();

        let nv = mesh.vertices.len();
        let mut vertex_faces = vec![Vec::new(); nv];
        let mut quadrics = vec![Quadric::zeros(); nv];

        for (fi, face) in faces.iter().enumerate() {
            let tri = Triangle::new(mesh.vertices[face[0]], mesh.vertices[face[1]], mesh.vertices[face[2]]);
            let plane_quadric = tri.unit_normal().map(|n| {
                let d = -n.dot(&tri.v0.coords);
                let p = Vector4::new(n.x, n.y, n.z, d);
                p * p.transpose()
            });
            for &v in face {
                vertex_faces[v].push(fi);
                if let Some(q) = plane_quadric {
                    quadrics[v] += q;
                }
            }
        }

        let nf = faces.len();
        Self {
            vertices: mesh.vertices.clone(),
            faces,
            face_alive: vec![true; nf],
            vertex_alive: vec![true; nv],
            vertex_faces,
            quadrics,
            versions: vec![0; nv],
            alive_faces: nf,
        }
    }

    /// Neighbour vertex -> number of alive incident faces shared with `v`
    fn fan(&self, v: usize) -> BTreeMap<usize, usize> {
        let mut fan = BTreeMap::new();
        for &fi in &self.vertex_faces[v] {
            if !self.face_alive[fi] { continue; }
            for &u in &self.faces[fi] {
                if u != v {
                    *fan.entry(u).or_insert(0) += 1;
                }
            }
        }
        fan
    }

    /// Interior manifold vertex: every neighbour is shared by exactly two faces
    fn is_interior(fan: &BTreeMap<usize, usize>) -> bool {
        !fan.is_empty() && fan.values().all(|&c| c == 2)
    }

    /// Cheapest placement for the merged vertex among the optimal quadric
    /// point, the endpoints and the midpoint
    fn placement(&self, a: usize, b: usize) -> (Point3D, f64) {
        let q = self.quadrics[a] + self.quadrics[b];
        let cost = |p: &Point3D| {
            let h = Vector4::new(p.x, p.y, p.z, 1.0);
            h.dot(&(q * h)).max(0.0)
        };

        let pa = self.vertices[a];
        let pb = self.vertices[b];
        let mid = nalgebra::center(&pa, &pb);
        let mut candidates = vec![pa, pb, mid];

        // Solve the 3x3 system for the quadric minimum, if well conditioned
        let mut system = q;
        system.set_row(3, &nalgebra::RowVector4::new(0.0, 0.0, 0.0, 1.0));
        if system.determinant().abs() > 1e-10 {
            if let Some(inv) = system.try_inverse() {
                let h = inv * Vector4::new(0.0, 0.0, 0.0, 1.0);
                let optimal = Point3D::new(h.x, h.y, h.z);
                if (optimal - mid).norm() <= (pb - pa).norm() && optimal.coords.iter().all(|c| c.is_finite()) {
                    candidates.insert(0, optimal);
                }
            }
        }

        candidates
            .into_iter()
            .map(|p| (p, cost(&p)))
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .unwrap_or((mid, cost(&mid)))
    }

    fn candidate(&self, a: usize, b: usize) -> Candidate {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let (_, cost) = self.placement(a, b);
        Reverse((OrderedFloat(cost), a, b, self.versions[a], self.versions[b]))
    }

    fn can_collapse(&self, a: usize, b: usize, target: &Point3D) -> bool {
        let fan_a = self.fan(a);
        let fan_b = self.fan(b);

        if !fan_a.contains_key(&b) {
            return false;
        }
        if !Self::is_interior(&fan_a) || !Self::is_interior(&fan_b) {
            return false;
        }

        // Link condition
        let opposite: BTreeSet<usize> = self.vertex_faces[a]
            .iter()
            .filter(|&&fi| self.face_alive[fi] && self.faces[fi].contains(&b))
            .flat_map(|&fi| self.faces[fi].iter().copied())
            .filter(|&v| v != a && v != b)
            .collect();
        let common: BTreeSet<usize> = fan_a.keys().filter(|v| fan_b.contains_key(v)).copied().collect();
        if opposite.len() != 2 || common != opposite {
            return false;
        }

        // Degrees after the merge
        if fan_a.len() + fan_b.len() - 4 < 3 {
            return false;
        }
        if opposite.iter().any(|&o| self.fan(o).len() <= 3) {
            return false;
        }

        // Surviving faces must keep their orientation
        for &fi in self.vertex_faces[a].iter().chain(self.vertex_faces[b].iter()) {
            if !self.face_alive[fi] { continue; }
            let face = self.faces[fi];
            let has_a = face.contains(&a);
            let has_b = face.contains(&b);
            if has_a && has_b { continue; }

            let old = Triangle::new(self.vertices[face[0]], self.vertices[face[1]], self.vertices[face[2]]);
            let moved = |v: usize| if v == a || v == b { *target } else { self.vertices[v] };
            let new = Triangle::new(moved(face[0]), moved(face[1]), moved(face[2]));

            let new_normal = new.cross();
            if old.cross().dot(&new_normal) <= 0.0 {
                return false;
            }
            if new_normal.norm() < 1e-12 {
                return false;
            }
        }

        true
    }

    /// Merge b into a, placing a at `target`
    fn collapse_edge(&mut self, a: usize, b: usize, target: Point3D) {
        self.vertices[a] = target;
        self.vertex_alive[b] = false;
        self.quadrics[a] = self.quadrics[a] + self.quadrics[b];

        let b_faces = std::mem::take(&mut self.vertex_faces[b]);
        for fi in b_faces {
            if !self.face_alive[fi] { continue; }
            if self.faces[fi].contains(&a) {
                self.face_alive[fi] = false;
                self.alive_faces -= 1;
            } else {
                for v in self.faces[fi].iter_mut() {
                    if *v == b { *v = a; }
                }
                self.vertex_faces[a].push(fi);
            }
        }

        let alive = &self.face_alive;
        self.vertex_faces[a].retain(|&fi| alive[fi]);
        self.versions[a] += 1;
        self.versions[b] += 1;
    }

    fn alive_triangles(&self) -> Vec<[usize; 3]> {
        self.faces
            .iter()
            .enumerate()
            .filter(|(fi, _)| self.face_alive[*fi])
            .map(|(_, f)| *f)
            .collect()
    }
}

/// Reduce the triangle count of `mesh` by the fraction `target_reduction`
/// while keeping its topology.
///
/// The target is approached greedily; when no further legal collapse
/// exists the reduction stops short of it.
pub fn decimate(mesh: &PolyMesh, target_reduction: f64) -> PolyMesh {
    let mut dm = DecimationMesh::from_poly(mesh);
    let initial = dm.alive_faces;
    let reduction = target_reduction.clamp(0.0, 1.0);
    let target_faces = ((1.0 - reduction) * initial as f64).ceil() as usize;

    if target_faces >= initial {
        return compact(&dm.vertices, &dm.alive_triangles());
    }

    let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut edges = BTreeSet::new();
    for face in &dm.faces {
        for e in 0..3 {
            let (u, v) = (face[e], face[(e + 1) % 3]);
            edges.insert((u.min(v), u.max(v)));
        }
    }
    for &(a, b) in &edges {
        heap.push(dm.candidate(a, b));
    }

    let mut collapses = 0usize;
    let mut rejected = 0usize;
    while dm.alive_faces > target_faces {
        let Some(Reverse((_, a, b, ver_a, ver_b))) = heap.pop() else { break };
        if !dm.vertex_alive[a] || !dm.vertex_alive[b] { continue; }
        if dm.versions[a] != ver_a || dm.versions[b] != ver_b { continue; }

        let (target, _) = dm.placement(a, b);
        if !dm.can_collapse(a, b, &target) {
            rejected += 1;
            continue;
        }

        dm.collapse_edge(a, b, target);
        collapses += 1;

        for &n in dm.fan(a).keys() {
            heap.push(dm.candidate(a, n));
        }
    }

    log::info!(
        "  Decimation: {} -> {} triangles ({} collapses, {} rejected, target {})",
        initial, dm.alive_faces, collapses, rejected, target_faces
    );
    if dm.alive_faces > target_faces {
        log::debug!("    No legal collapse left before reaching the target");
    }

    compact(&dm.vertices, &dm.alive_triangles())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Spacing;
    use crate::mesh::tests::unit_cube;
    use crate::processing::marching::marching_tetrahedra;
    use crate::segmentation::Mask;

    fn sphere_surface(radius: f64) -> PolyMesh {
        let n = (2.0 * radius) as usize + 4;
        let c = n as f64 / 2.0;
        let mask = Mask::from_fn((n, n, n), Spacing::default(), |x, y, z| {
            let (dx, dy, dz) = (x as f64 - c, y as f64 - c, z as f64 - c);
            (dx * dx + dy * dy + dz * dz).sqrt() <= radius
        });
        marching_tetrahedra(&mask, 0.5)
    }

    fn euler_characteristic(mesh: &PolyMesh) -> i64 {
        let mut edges = BTreeSet::new();
        for p in &mesh.polygons {
            for e in 0..p.len() {
                let (u, v) = (p[e], p[(e + 1) % p.len()]);
                edges.insert((u.min(v), u.max(v)));
            }
        }
        mesh.num_points() as i64 - edges.len() as i64 + mesh.polygons.len() as i64
    }

    #[test]
    fn test_zero_reduction_keeps_mesh() {
        let surface = sphere_surface(4.0);
        let out = decimate(&surface, 0.0);
        assert_eq!(out.polygons.len(), surface.polygons.len());
        assert_eq!(out.num_points(), surface.num_points());
    }

    #[test]
    fn test_half_reduction_preserves_topology() {
        let surface = sphere_surface(5.0);
        let out = decimate(&surface, 0.5);

        assert!(out.polygons.len() < surface.polygons.len());
        assert!(out.polygons.len() * 2 <= surface.polygons.len() + 2);
        // Closed sphere: V - E + F = 2
        assert_eq!(euler_characteristic(&surface), 2);
        assert_eq!(euler_characteristic(&out), 2);
        let nv = out.num_points();
        assert!(out.polygons.iter().flatten().all(|&i| i < nv));
    }

    #[test]
    fn test_vertex_count_monotone_in_reduction() {
        let surface = sphere_surface(5.0);
        let mut previous = usize::MAX;
        for r in [0.0, 0.2, 0.4, 0.6, 0.8, 0.95] {
            let out = decimate(&surface, r);
            assert!(out.num_points() <= previous, "reduction {} grew the mesh", r);
            previous = out.num_points();
        }
        assert!(previous < surface.num_points());
    }

    #[test]
    fn test_minimal_closed_mesh_cannot_collapse_below_tetrahedron() {
        // The cube has vertices of degree 4 and 5; heavy reduction stops at a legal minimum
        let cube = PolyMesh::from(&unit_cube());
        let out = decimate(&cube, 0.99);
        assert!(out.polygons.len() >= 4);
        assert_eq!(euler_characteristic(&out), 2);
    }
}
