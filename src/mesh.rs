use crate::geometry::{Point3D, Spacing, Triangle, Vector3D};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Face {face} references vertex {index}, mesh has {num_vertices} vertices")]
    InvalidFaceIndex { face: usize, index: usize, num_vertices: usize },

    #[error("Polygon {0} has fewer than 3 vertices")]
    DegeneratePolygon(usize),

    #[error("Failed to write mesh: {0}")]
    WriteError(String),
}

/// Indexed triangle mesh. Every face index is a valid vertex index.
///
/// The fields are public. A mesh filled in by hand must keep the index
/// invariant: build it with [`Mesh::new`] or check it with [`Mesh::validate`],
/// since the geometry methods index without bounds checks of their own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3D>,
    pub faces: Vec<[usize; 3]>,
}

impl Mesh {
    /// Create a mesh, validating face indices
    pub fn new(vertices: Vec<Point3D>, faces: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        let mesh = Self { vertices, faces };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Check that every face index refers to an existing vertex
    pub fn validate(&self) -> Result<(), MeshError> {
        let num_vertices = self.vertices.len();
        for (fi, face) in self.faces.iter().enumerate() {
            if let Some(&index) = face.iter().find(|&&i| i >= num_vertices) {
                return Err(MeshError::InvalidFaceIndex { face: fi, index, num_vertices });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn triangle(&self, face: usize) -> Triangle {
        let [a, b, c] = self.faces[face];
        Triangle::new(self.vertices[a], self.vertices[b], self.vertices[c])
    }

    /// Axis-aligned bounds, `None` for a mesh without vertices
    pub fn bounds(&self) -> Option<(Point3D, Point3D)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            min.z = min.z.min(v.z);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
            max.z = max.z.max(v.z);
        }
        Some((min, max))
    }

    /// Mean vertex position
    pub fn centroid(&self) -> Point3D {
        if self.vertices.is_empty() {
            return Point3D::origin();
        }
        let sum: Vector3D = self.vertices.iter().map(|p| p.coords).sum();
        Point3D::from(sum / self.vertices.len() as f64)
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len()).map(|fi| self.triangle(fi).area()).sum()
    }

    /// Enclosed volume from signed tetrahedra (meaningful for closed meshes)
    pub fn volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|&[a, b, c]| {
                let v0 = self.vertices[a].coords;
                let v1 = self.vertices[b].coords;
                let v2 = self.vertices[c].coords;
                v0.dot(&v1.cross(&v2)) / 6.0
            })
            .sum::<f64>()
            .abs()
    }

    /// Wire representation with the spacing of the source grid
    pub fn to_record(&self, spacing: Spacing) -> MeshRecord {
        MeshRecord {
            vertices: self.vertices.iter().map(|p| [p.x, p.y, p.z]).collect(),
            faces: self.faces.clone(),
            spacing: spacing.to_array(),
        }
    }

    /// Write binary STL
    pub fn write_stl<P: AsRef<Path>>(&self, path: P) -> Result<(), MeshError> {
        let to_f32 = |p: &Point3D| stl_io::Vertex::new([p.x as f32, p.y as f32, p.z as f32]);

        let triangles: Vec<stl_io::Triangle> = (0..self.faces.len())
            .map(|fi| {
                let tri = self.triangle(fi);
                let n = tri.unit_normal().unwrap_or_else(Vector3D::zeros);
                stl_io::Triangle {
                    normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                    vertices: [to_f32(&tri.v0), to_f32(&tri.v1), to_f32(&tri.v2)],
                }
            })
            .collect();

        let mut file = std::fs::File::create(path)
            .map_err(|e| MeshError::WriteError(e.to_string()))?;
        stl_io::write_stl(&mut file, triangles.iter())
            .map_err(|e| MeshError::WriteError(e.to_string()))?;

        log::info!("Wrote STL with {} triangles", triangles.len());
        Ok(())
    }
}

/// Mesh with arbitrary polygon faces, the currency between processing stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyMesh {
    pub vertices: Vec<Point3D>,
    pub polygons: Vec<Vec<usize>>,
}

impl PolyMesh {
    pub fn new(vertices: Vec<Point3D>, polygons: Vec<Vec<usize>>) -> Self {
        Self { vertices, polygons }
    }

    pub fn num_points(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.polygons.is_empty()
    }

    pub fn is_triangulated(&self) -> bool {
        self.polygons.iter().all(|p| p.len() == 3)
    }

    /// Convert to a triangle mesh; fails if any polygon is not a triangle
    /// or references a missing vertex.
    pub fn to_mesh(&self) -> Result<Mesh, MeshError> {
        let mut faces = Vec::with_capacity(self.polygons.len());
        for (pi, poly) in self.polygons.iter().enumerate() {
            match poly.as_slice() {
                &[a, b, c] => faces.push([a, b, c]),
                _ => return Err(MeshError::DegeneratePolygon(pi)),
            }
        }
        Mesh::new(self.vertices.clone(), faces)
    }
}

impl From<&Mesh> for PolyMesh {
    fn from(mesh: &Mesh) -> Self {
        Self {
            vertices: mesh.vertices.clone(),
            polygons: mesh.faces.iter().map(|f| f.to_vec()).collect(),
        }
    }
}

/// The `mesh` object of the reconstruction result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRecord {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
    pub spacing: [f64; 3],
}
