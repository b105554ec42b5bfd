//! Geometry primitives shared by every evaluation stage
use std::sync::OnceLock;

use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::error::FormatError;

/// Most triangles a mesh may hold. Soup meshes give every triangle three
/// vertices, so this keeps every vertex index and the binary STL count
/// within `u32`.
pub const MAX_TRIANGLES: u64 = (u32::MAX / 3) as u64;

/// A mesh vertex. Only the position matters for evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Point3<f64>,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
        }
    }

    pub fn from_point(position: Point3<f64>) -> Self {
        Self { position }
    }
}

/// A triangle face: three indices into the mesh's vertex table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub indices: [u32; 3],
    /// Unit face normal as stored in the source file, if it carried a usable one.
    pub normal: Option<Vector3<f64>>,
}

impl Triangle {
    pub fn new(indices: [u32; 3]) -> Self {
        Self {
            indices,
            normal: None,
        }
    }

    /// Attach a stored normal. Zero-length or non-finite normals are dropped
    /// so that the right-hand rule is used instead.
    pub fn with_normal(mut self, normal: Vector3<f64>) -> Self {
        self.normal = normal
            .try_normalize(f64::EPSILON)
            .filter(|n| n.iter().all(|c| c.is_finite()));
        self
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl BoundingBox {
    /// The box of an empty point set: a single point at the origin.
    pub fn empty() -> Self {
        Self {
            min: Point3::origin(),
            max: Point3::origin(),
        }
    }

    /// One linear pass tracking componentwise min/max.
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::empty();
        };

        let (mut min, mut max) = (first, first);
        for p in points {
            min = min.inf(&p);
            max = max.sup(&p);
        }
        Self { min, max }
    }

    /// Size along X, Y and Z.
    pub fn extents(&self) -> Vector3<f64> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn diagonal(&self) -> f64 {
        self.extents().norm()
    }

    pub fn volume(&self) -> f64 {
        let e = self.extents();
        e.x * e.y * e.z
    }
}

/// An immutable triangle mesh.
///
/// Vertices keep parse order and their index is their identity. Every
/// triangle index is guaranteed to be valid: meshes are only built through
/// [`MeshBuilder`] or [`Mesh::from_indexed`].
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    triangles: Vec<Triangle>,
    bounds: OnceLock<BoundingBox>,
    centroid: OnceLock<Point3<f64>>,
}

impl Mesh {
    /// A mesh with no geometry.
    pub fn empty() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
            bounds: OnceLock::new(),
            centroid: OnceLock::new(),
        }
    }

    /// Build a mesh from an indexed vertex/face list.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidIndex`] if any face references a vertex
    /// outside `vertices`, and [`FormatError::TooManyTriangles`] for more
    /// than [`MAX_TRIANGLES`] faces.
    pub fn from_indexed(vertices: Vec<Vertex>, faces: &[[u32; 3]]) -> Result<Self, FormatError> {
        let count = faces.len() as u64;
        if count > MAX_TRIANGLES {
            return Err(FormatError::TooManyTriangles {
                count,
                limit: MAX_TRIANGLES,
            });
        }
        let mut triangles = Vec::with_capacity(faces.len());
        for (triangle, face) in faces.iter().enumerate() {
            if let Some(&index) = face.iter().find(|&&i| i as usize >= vertices.len()) {
                return Err(FormatError::InvalidIndex {
                    triangle,
                    index,
                    vertex_count: vertices.len(),
                });
            }
            triangles.push(Triangle::new(*face));
        }

        Ok(Self {
            vertices,
            triangles,
            bounds: OnceLock::new(),
            centroid: OnceLock::new(),
        })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Corner positions of a triangle.
    pub fn triangle_positions(&self, triangle: &Triangle) -> [Point3<f64>; 3] {
        triangle.indices.map(|i| self.vertices[i as usize].position)
    }

    /// Iterate over the corner positions of every triangle.
    pub fn faces(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + '_ {
        self.triangles.iter().map(|t| self.triangle_positions(t))
    }

    /// Face normal: the stored one, or the right-hand rule on vertex order.
    ///
    /// Returns `None` for degenerate triangles without a stored normal.
    pub fn face_normal(&self, triangle: &Triangle) -> Option<Vector3<f64>> {
        if let Some(n) = triangle.normal {
            return Some(n);
        }
        let [v0, v1, v2] = self.triangle_positions(triangle);
        (v1 - v0).cross(&(v2 - v0)).try_normalize(f64::EPSILON)
    }

    /// Bounding box, computed on first access and cached.
    pub fn bounding_box(&self) -> &BoundingBox {
        self.bounds
            .get_or_init(|| BoundingBox::from_points(self.vertices.iter().map(|v| v.position)))
    }

    /// Area-weighted centroid of the surface, computed on first access and
    /// cached.
    ///
    /// Shared and duplicated vertices weigh the same, so a triangle soup and
    /// an indexed mesh of one shape agree. Meshes without surface area fall
    /// back to the bounding-box center.
    pub fn centroid(&self) -> Point3<f64> {
        *self.centroid.get_or_init(|| {
            let origin = self.bounding_box().center();
            let (area, moment) = self.faces().fold(
                (0.0, Vector3::zeros()),
                |(area, moment), [a, b, c]| {
                    let w = (b - a).cross(&(c - a)).norm() / 2.0;
                    let sum = (a - origin) + (b - origin) + (c - origin);
                    (area + w, moment + sum * (w / 3.0))
                },
            );
            if area > 0.0 {
                origin + moment / area
            } else {
                origin
            }
        })
    }

    /// A new mesh with every vertex mapped through `f`.
    ///
    /// Stored normals are dropped since an arbitrary map does not carry them
    /// along; they are re-derived from winding when needed.
    pub fn map_positions(&self, f: impl Fn(&Point3<f64>) -> Point3<f64>) -> Self {
        Self {
            vertices: self
                .vertices
                .iter()
                .map(|v| Vertex::from_point(f(&v.position)))
                .collect(),
            triangles: self
                .triangles
                .iter()
                .map(|t| Triangle::new(t.indices))
                .collect(),
            bounds: OnceLock::new(),
            centroid: OnceLock::new(),
        }
    }

    /// An axis-aligned cube centred on the origin, 8 shared vertices and
    /// 12 outward-wound triangles.
    pub fn cube(size: f64) -> Self {
        let h = size / 2.0;
        let vertices = vec![
            Vertex::new(-h, -h, -h),
            Vertex::new(h, -h, -h),
            Vertex::new(h, h, -h),
            Vertex::new(-h, h, -h),
            Vertex::new(-h, -h, h),
            Vertex::new(h, -h, h),
            Vertex::new(h, h, h),
            Vertex::new(-h, h, h),
        ];
        let faces = [
            // Front (+Z)
            [4, 5, 6],
            [4, 6, 7],
            // Back (-Z)
            [0, 3, 2],
            [0, 2, 1],
            // Top (+Y)
            [3, 7, 6],
            [3, 6, 2],
            // Bottom (-Y)
            [0, 1, 5],
            [0, 5, 4],
            // Right (+X)
            [1, 2, 6],
            [1, 6, 5],
            // Left (-X)
            [0, 4, 7],
            [0, 7, 3],
        ];

        let triangles = faces.iter().map(|&f| Triangle::new(f)).collect();
        Self {
            vertices,
            triangles,
            bounds: OnceLock::new(),
            centroid: OnceLock::new(),
        }
    }

    /// An axis-aligned box with the given extents, centred on the origin.
    pub fn cuboid(x: f64, y: f64, z: f64) -> Self {
        Self::cube(1.0).map_positions(|p| Point3::new(p.x * x, p.y * y, p.z * z))
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::empty()
    }
}

/// Incremental construction of a [`Mesh`] in triangle-soup form.
///
/// Each facet gets three fresh vertex slots; vertices are never shared.
#[derive(Debug)]
pub struct MeshBuilder {
    vertices: Vec<Vertex>,
    triangles: Vec<Triangle>,
    limit: u64,
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
            limit: MAX_TRIANGLES,
        }
    }
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(triangles: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(triangles * 3),
            triangles: Vec::with_capacity(triangles),
            ..Self::default()
        }
    }

    /// Refuse facets beyond `limit`, itself capped at [`MAX_TRIANGLES`].
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit.min(MAX_TRIANGLES);
        self
    }

    /// Append a facet with its own three vertices.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TooManyTriangles`] once the builder holds its
    /// limit of triangles.
    pub fn push_facet(
        &mut self,
        corners: [Point3<f64>; 3],
        normal: Option<Vector3<f64>>,
    ) -> Result<(), FormatError> {
        let count = self.triangles.len() as u64 + 1;
        let too_many = FormatError::TooManyTriangles {
            count,
            limit: self.limit,
        };
        if count > self.limit {
            return Err(too_many);
        }
        let base = u32::try_from(self.vertices.len()).map_err(|_| too_many)?;
        self.vertices
            .extend(corners.iter().map(|&p| Vertex::from_point(p)));

        let triangle = Triangle::new([base, base + 1, base + 2]);
        self.triangles.push(match normal {
            Some(n) => triangle.with_normal(n),
            None => triangle,
        });
        Ok(())
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn build(self) -> Mesh {
        Mesh {
            vertices: self.vertices,
            triangles: self.triangles,
            bounds: OnceLock::new(),
            centroid: OnceLock::new(),
        }
    }
}
