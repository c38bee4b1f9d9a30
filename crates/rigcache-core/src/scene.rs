//! The host scene seen through the operations the engine consumes.
//!
//! Everything the builder, serializer and merge operator need from a live
//! scene goes through [`Scene`]. [`crate::memory::MemoryScene`] is the
//! headless implementation used for tests and offline processing.

use crate::attribute::{AttrValue, Attribute};
use crate::id::{Connection, EntityId, Plug};
use crate::mesh::{MeshData, MeshError};
use std::ops::{Deref, DerefMut};

/// Attribute toggled by scoped deactivation.
pub const ENABLE_ATTR: &str = "enable";

/// Entity type tag of plain geometry.
pub const MESH_TYPE: &str = "mesh";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SceneError {
    #[error("entity '{0}' not found")]
    NotFound(String),
    #[error("entity handle is stale")]
    DeadEntity,
    #[error("name '{0}' is already taken")]
    NameTaken(String),
    #[error("entity '{0}' is read-only or externally referenced and cannot be deleted")]
    ReadOnly(String),
    #[error("attribute '{attr}' on '{entity}' is locked")]
    Locked { entity: String, attr: String },
    #[error("plug {0} already has an incoming connection")]
    PlugOccupied(String),
    #[error("no connection from {src} to {dst}")]
    NotConnected { src: String, dst: String },
    #[error("'{0}' is not a mesh")]
    NotAMesh(String),
    #[error(transparent)]
    InvalidMesh(#[from] MeshError),
}

// ---------------------------------------------------------------------------
// Scene trait
// ---------------------------------------------------------------------------

/// Live scene operations consumed by capture, build and merge.
pub trait Scene {
    /// Fingerprint of the host application, recorded in archives.
    fn host_info(&self) -> String {
        "headless".to_string()
    }

    fn find(&self, name: &str) -> Option<EntityId>;

    fn is_alive(&self, id: EntityId) -> bool;

    fn name_of(&self, id: EntityId) -> Option<&str>;

    fn type_of(&self, id: EntityId) -> Option<&str>;

    fn entities_of_type(&self, type_tag: &str) -> Vec<EntityId>;

    /// Current selection, in selection order.
    fn selection(&self) -> Vec<EntityId>;

    /// Whether the entity is referenced from outside the scene and may not
    /// be deleted.
    fn is_read_only(&self, id: EntityId) -> bool;

    fn attribute_names(&self, id: EntityId) -> Vec<String>;

    fn attribute(&self, id: EntityId, attr: &str) -> Option<Attribute>;

    fn create_entity(&mut self, type_tag: &str, name: &str) -> Result<EntityId, SceneError>;

    fn delete_entity(&mut self, id: EntityId) -> Result<(), SceneError>;

    /// Set a value, creating the attribute when it does not exist yet.
    fn set_attribute(&mut self, id: EntityId, attr: &str, value: AttrValue) -> Result<(), SceneError>;

    /// Every connection with an endpoint on `id`.
    fn connections(&self, id: EntityId) -> Vec<Connection>;

    fn connect(&mut self, src: &Plug, dst: &Plug) -> Result<(), SceneError>;

    fn disconnect(&mut self, src: &Plug, dst: &Plug) -> Result<(), SceneError>;

    fn mesh(&self, name: &str) -> Option<MeshData>;

    fn create_mesh(&mut self, name: &str, data: &MeshData) -> Result<EntityId, SceneError>;

    // -- Provided helpers --

    fn is_connected(&self, src: &Plug, dst: &Plug) -> bool {
        self.connections(dst.entity)
            .iter()
            .any(|c| &c.src == src && &c.dst == dst)
    }

    /// Connections arriving at `attr` on `id`, sorted by index.
    fn incoming(&self, id: EntityId, attr: &str) -> Vec<Connection> {
        let mut conns: Vec<Connection> = self
            .connections(id)
            .into_iter()
            .filter(|c| c.dst.entity == id && c.dst.attr == attr)
            .collect();
        conns.sort_by_key(|c| c.dst.index);
        conns
    }

    /// Connections leaving `attr` on `id`.
    fn outgoing(&self, id: EntityId, attr: &str) -> Vec<Connection> {
        self.connections(id)
            .into_iter()
            .filter(|c| c.src.entity == id && c.src.attr == attr)
            .collect()
    }

    /// Lowest array index on `attr` of `id` with no incoming connection.
    fn next_free_index(&self, id: EntityId, attr: &str) -> u32 {
        let used: Vec<u32> = self
            .incoming(id, attr)
            .iter()
            .filter_map(|c| c.dst.index)
            .collect();
        (0..).find(|i| !used.contains(i)).unwrap_or(0)
    }

    /// Name of an entity or a placeholder for error messages.
    fn describe(&self, id: EntityId) -> String {
        self.name_of(id)
            .map_or_else(|| format!("{id:?}"), str::to_string)
    }
}

// ---------------------------------------------------------------------------
// Scoped deactivation
// ---------------------------------------------------------------------------

/// Disables a set of root entities for as long as the guard lives.
///
/// Each entity's prior `enable` value is recorded and written back when the
/// guard drops, including on early return or unwinding. Entities without an
/// `enable` attribute are ignored; entities deleted while the guard was held
/// are skipped on restore.
pub struct Deactivated<'a, S: Scene + ?Sized> {
    scene: &'a mut S,
    restore: Vec<(EntityId, AttrValue)>,
}

impl<'a, S: Scene + ?Sized> Deactivated<'a, S> {
    pub fn new(scene: &'a mut S, roots: &[EntityId]) -> Self {
        let mut restore = Vec::new();
        for &id in roots {
            if restore.iter().any(|(seen, _)| *seen == id) {
                continue;
            }
            let Some(prior) = scene.attribute(id, ENABLE_ATTR) else {
                continue;
            };
            match scene.set_attribute(id, ENABLE_ATTR, AttrValue::Bool(false)) {
                Ok(()) => restore.push((id, prior.value)),
                Err(e) => tracing::warn!(
                    entity = %scene.describe(id),
                    error = %e,
                    "could not deactivate root"
                ),
            }
        }
        Self { scene, restore }
    }

    /// Entities currently held disabled.
    pub fn held(&self) -> Vec<EntityId> {
        self.restore.iter().map(|(id, _)| *id).collect()
    }
}

impl<S: Scene + ?Sized> Deref for Deactivated<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.scene
    }
}

impl<S: Scene + ?Sized> DerefMut for Deactivated<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.scene
    }
}

impl<S: Scene + ?Sized> Drop for Deactivated<'_, S> {
    fn drop(&mut self) {
        for (id, prior) in self.restore.drain(..).rev() {
            if !self.scene.is_alive(id) {
                continue;
            }
            if let Err(e) = self.scene.set_attribute(id, ENABLE_ATTR, prior) {
                tracing::warn!(
                    entity = %self.scene.describe(id),
                    error = %e,
                    "could not restore root enable state"
                );
            }
        }
    }
}
