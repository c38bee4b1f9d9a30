//! Mesh geometry and immutable mesh snapshots.

use crate::geometry::{TriangleMesh, Vec3};
use crate::scene::Scene;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MeshError {
    #[error("mesh '{0}' not found in scene")]
    NotFound(String),
    #[error("face data inconsistent: counts sum to {counts} but {connects} connects stored")]
    FaceCountMismatch { counts: usize, connects: usize },
    #[error("face {face} has {size} vertices; at least 3 required")]
    DegenerateFace { face: usize, size: u32 },
    #[error("vertex index {index} out of range for {vertex_count} points")]
    IndexOutOfRange { index: u32, vertex_count: usize },
}

// ---------------------------------------------------------------------------
// Axis
// ---------------------------------------------------------------------------

/// World axis used for geometric mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// MeshData
// ---------------------------------------------------------------------------

/// Polygon connectivity plus vertex positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    /// Vertices per face, in face order.
    pub polygon_counts: Vec<u32>,
    /// Face → vertex indices, flattened.
    pub polygon_connects: Vec<u32>,
    pub points: Vec<Vec3>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.points.len()
    }

    pub fn face_count(&self) -> usize {
        self.polygon_counts.len()
    }

    /// Check that face data is self-consistent and indexes valid points.
    pub fn validate(&self) -> Result<(), MeshError> {
        let counts: usize = self.polygon_counts.iter().map(|&c| c as usize).sum();
        if counts != self.polygon_connects.len() {
            return Err(MeshError::FaceCountMismatch {
                counts,
                connects: self.polygon_connects.len(),
            });
        }
        if let Some((face, &size)) = self
            .polygon_counts
            .iter()
            .enumerate()
            .find(|&(_, &c)| c < 3)
        {
            return Err(MeshError::DegenerateFace { face, size });
        }
        if let Some(&index) = self
            .polygon_connects
            .iter()
            .find(|&&i| i as usize >= self.points.len())
        {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count: self.points.len(),
            });
        }
        Ok(())
    }

    /// Iterate faces as slices of vertex indices.
    pub fn faces(&self) -> impl Iterator<Item = &[u32]> {
        let connects = &self.polygon_connects;
        self.polygon_counts.iter().scan(0usize, move |offset, &count| {
            let start = *offset;
            *offset += count as usize;
            Some(&connects[start..*offset])
        })
    }

    /// Fan-triangulate every face.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let mut tris = Vec::with_capacity(self.polygon_connects.len());
        for face in self.faces() {
            for i in 1..face.len().saturating_sub(1) {
                tris.push([face[0], face[i], face[i + 1]]);
            }
        }
        tris
    }

    /// Negate one coordinate of every point and reverse face winding so
    /// normals keep pointing outwards.
    pub fn mirror(&mut self, axis: Axis) {
        let a = axis.index();
        for p in &mut self.points {
            p[a] = -p[a];
        }
        let mut offset = 0;
        for &count in &self.polygon_counts {
            let end = offset + count as usize;
            self.polygon_connects[offset..end].reverse();
            offset = end;
        }
    }

    pub fn mirrored(&self, axis: Axis) -> Self {
        let mut copy = self.clone();
        copy.mirror(axis);
        copy
    }
}

// ---------------------------------------------------------------------------
// MeshSnapshot
// ---------------------------------------------------------------------------

/// Geometry of one named mesh as it was at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    pub name: String,
    #[serde(flatten)]
    pub geometry: MeshData,
}

impl MeshSnapshot {
    pub fn new(name: &str, geometry: MeshData) -> Self {
        Self {
            name: name.to_string(),
            geometry,
        }
    }

    /// Capture a live mesh by name.
    pub fn capture(scene: &dyn Scene, name: &str) -> Result<Self, MeshError> {
        let geometry = scene
            .mesh(name)
            .ok_or_else(|| MeshError::NotFound(name.to_string()))?;
        geometry.validate()?;
        Ok(Self::new(name, geometry))
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.vertex_count()
    }

    /// Detached, query-ready copy of the captured surface.
    pub fn reconstruct(&self) -> Result<TriangleMesh, MeshError> {
        self.geometry.validate()?;
        Ok(TriangleMesh::new(
            self.geometry.points.clone(),
            self.geometry.triangles(),
        ))
    }

    pub fn mirror(&mut self, axis: Axis) {
        self.geometry.mirror(axis);
    }
}
