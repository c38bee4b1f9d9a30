//! Per-vertex weight maps and topology-robust interpolation.

use crate::mesh::{MeshData, MeshError, MeshSnapshot};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MapError {
    #[error("map '{map}' has {values} values but mesh '{mesh}' has {vertices} vertices")]
    LengthMismatch {
        map: String,
        mesh: String,
        values: usize,
        vertices: usize,
    },
    #[error("attribute '{attr}' on '{node}' is not a weight array")]
    NotAnArray { node: String, attr: String },
    #[error("source mesh '{0}' has no faces to interpolate from")]
    EmptySource(String),
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

// ---------------------------------------------------------------------------
// InterpMode
// ---------------------------------------------------------------------------

/// When a captured map is interpolated onto the live mesh during build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpMode {
    /// Always interpolate.
    On,
    /// Never interpolate; a vertex-count mismatch is an error.
    Off,
    /// Interpolate only when vertex counts differ.
    #[default]
    Auto,
}

impl<'de> Deserialize<'de> for InterpMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(InterpMode::On),
            Raw::Flag(false) => Ok(InterpMode::Off),
            Raw::Name(name) => match name.to_ascii_lowercase().as_str() {
                "on" | "true" => Ok(InterpMode::On),
                "off" | "false" => Ok(InterpMode::Off),
                "auto" => Ok(InterpMode::Auto),
                other => Err(serde::de::Error::unknown_variant(
                    other,
                    &["on", "off", "auto"],
                )),
            },
        }
    }
}

impl InterpMode {
    /// Decide whether a map captured against `source_vertices` must be
    /// interpolated before applying to a mesh with `target_vertices`.
    ///
    /// `Auto` compares counts only: two meshes with equal counts but
    /// different vertex order are not detected here.
    pub fn should_interpolate(self, source_vertices: usize, target_vertices: usize) -> bool {
        match self {
            InterpMode::On => true,
            InterpMode::Off => false,
            InterpMode::Auto => source_vertices != target_vertices,
        }
    }
}

// ---------------------------------------------------------------------------
// WeightMap
// ---------------------------------------------------------------------------

/// A named array of per-vertex weights bound to one mesh by name.
///
/// The name is `"<node>.<attribute>"`: the scene item that owns the map and
/// the array attribute the values live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMap {
    pub name: String,
    /// Name of the mesh snapshot the values index into.
    pub mesh: String,
    pub values: Vec<f64>,
}

impl WeightMap {
    pub fn new(node: &str, attr: &str, mesh: &str, values: Vec<f64>) -> Self {
        Self {
            name: format!("{node}.{attr}"),
            mesh: mesh.to_string(),
            values,
        }
    }

    /// Split the name into owning node and attribute.
    pub fn node_and_attr(&self) -> Option<(&str, &str)> {
        self.name.rsplit_once('.')
    }

    /// The attribute part of the name (whole name when there is no dot).
    pub fn attr(&self) -> &str {
        self.node_and_attr().map_or(self.name.as_str(), |(_, attr)| attr)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every weight `w` with `1 - w`.
    pub fn invert(&mut self) {
        for v in &mut self.values {
            *v = 1.0 - *v;
        }
    }

    /// Replace the values wholesale. The name and mesh binding are kept.
    pub fn paste(&mut self, values: Vec<f64>) {
        self.values = values;
    }

    /// Transfer the weights from `source` (the mesh they were captured on)
    /// to every vertex of `target`.
    ///
    /// Each target vertex is projected onto the closest point of a detached
    /// reconstruction of `source`; the new weight is the barycentric blend
    /// of the three source weights of the triangle hit. No clamping is
    /// applied.
    pub fn interpolate(&self, source: &MeshSnapshot, target: &MeshData) -> Result<Vec<f64>, MapError> {
        if self.values.len() != source.vertex_count() {
            return Err(MapError::LengthMismatch {
                map: self.name.clone(),
                mesh: source.name.clone(),
                values: self.values.len(),
                vertices: source.vertex_count(),
            });
        }
        let surface = source.reconstruct()?;
        if surface.triangle_count() == 0 {
            return Err(MapError::EmptySource(source.name.clone()));
        }

        let mut out = Vec::with_capacity(target.vertex_count());
        for &p in &target.points {
            // A non-empty surface always yields a hit.
            let weight = surface
                .closest_point(p)
                .map_or(0.0, |hit| hit.blend(&self.values));
            out.push(weight);
        }
        Ok(out)
    }
}
