//! Headless in-memory scene.
//!
//! Entities live in a `SlotMap` with a name index alongside; connections
//! are kept in an ordered set so iteration and fingerprints are
//! deterministic.

use crate::attribute::{AttrValue, Attribute, AttributeTable};
use crate::id::{Connection, EntityId, Plug};
use crate::mesh::MeshData;
use crate::scene::{MESH_TYPE, Scene, SceneError};
use serde::Serialize;
use slotmap::SlotMap;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Serialize)]
struct Entity {
    name: String,
    type_tag: String,
    attributes: AttributeTable,
    read_only: bool,
    geometry: Option<MeshData>,
}

/// A scene held entirely in memory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryScene {
    entities: SlotMap<EntityId, Entity>,
    #[serde(skip)]
    names: HashMap<String, EntityId>,
    connections: BTreeSet<Connection>,
    selection: Vec<EntityId>,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Add an entity. A taken name is an error.
    pub fn add_entity(&mut self, type_tag: &str, name: &str) -> Result<EntityId, SceneError> {
        self.create_entity(type_tag, name)
    }

    /// Set several attributes at once.
    pub fn set_attributes<'a>(
        &mut self,
        id: EntityId,
        values: impl IntoIterator<Item = (&'a str, AttrValue)>,
    ) -> Result<(), SceneError> {
        for (attr, value) in values {
            self.set_attribute(id, attr, value)?;
        }
        Ok(())
    }

    pub fn lock_attribute(&mut self, id: EntityId, attr: &str) -> Result<(), SceneError> {
        let entity = self.entities.get_mut(id).ok_or(SceneError::DeadEntity)?;
        let slot = entity
            .attributes
            .get_mut(attr)
            .ok_or_else(|| SceneError::NotFound(format!("{}.{attr}", entity.name)))?;
        slot.locked = true;
        Ok(())
    }

    pub fn set_read_only(&mut self, id: EntityId, read_only: bool) -> Result<(), SceneError> {
        let entity = self.entities.get_mut(id).ok_or(SceneError::DeadEntity)?;
        entity.read_only = read_only;
        Ok(())
    }

    /// Replace the selection with the named entities, skipping unknown ones.
    pub fn select(&mut self, names: &[&str]) {
        self.selection = names.iter().filter_map(|n| self.find(n)).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Replace the geometry of an existing mesh, keeping its connections.
    pub fn replace_mesh(&mut self, name: &str, data: &MeshData) -> Result<(), SceneError> {
        data.validate()?;
        let id = self
            .find(name)
            .ok_or_else(|| SceneError::NotFound(name.to_string()))?;
        let entity = self.entities.get_mut(id).ok_or(SceneError::DeadEntity)?;
        if entity.geometry.is_none() {
            return Err(SceneError::NotAMesh(name.to_string()));
        }
        entity.geometry = Some(data.clone());
        Ok(())
    }

    /// Binary fingerprint of the whole scene state via bitcode. Two scenes
    /// with identical entities, attributes and connections produce
    /// identical bytes.
    pub fn fingerprint(&self) -> Result<Vec<u8>, bitcode::Error> {
        bitcode::serialize(self)
    }

    fn entity(&self, id: EntityId) -> Result<&Entity, SceneError> {
        self.entities.get(id).ok_or(SceneError::DeadEntity)
    }
}

impl Scene for MemoryScene {
    fn host_info(&self) -> String {
        format!("rigcache-memory/{}", env!("CARGO_PKG_VERSION"))
    }

    fn find(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    fn is_alive(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    fn name_of(&self, id: EntityId) -> Option<&str> {
        self.entities.get(id).map(|e| e.name.as_str())
    }

    fn type_of(&self, id: EntityId) -> Option<&str> {
        self.entities.get(id).map(|e| e.type_tag.as_str())
    }

    fn entities_of_type(&self, type_tag: &str) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| e.type_tag == type_tag)
            .map(|(id, _)| id)
            .collect()
    }

    fn selection(&self) -> Vec<EntityId> {
        self.selection
            .iter()
            .copied()
            .filter(|&id| self.is_alive(id))
            .collect()
    }

    fn is_read_only(&self, id: EntityId) -> bool {
        self.entities.get(id).is_some_and(|e| e.read_only)
    }

    fn attribute_names(&self, id: EntityId) -> Vec<String> {
        self.entities
            .get(id)
            .map(|e| e.attributes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn attribute(&self, id: EntityId, attr: &str) -> Option<Attribute> {
        self.entities.get(id)?.attributes.get(attr).cloned()
    }

    fn create_entity(&mut self, type_tag: &str, name: &str) -> Result<EntityId, SceneError> {
        if self.names.contains_key(name) {
            return Err(SceneError::NameTaken(name.to_string()));
        }
        let id = self.entities.insert(Entity {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            attributes: AttributeTable::new(),
            read_only: false,
            geometry: None,
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn delete_entity(&mut self, id: EntityId) -> Result<(), SceneError> {
        let entity = self.entity(id)?;
        if entity.read_only {
            return Err(SceneError::ReadOnly(entity.name.clone()));
        }
        let name = entity.name.clone();
        self.connections.retain(|c| !c.touches(id));
        self.selection.retain(|&s| s != id);
        self.names.remove(&name);
        self.entities.remove(id);
        Ok(())
    }

    fn set_attribute(&mut self, id: EntityId, attr: &str, value: AttrValue) -> Result<(), SceneError> {
        let entity = self.entities.get_mut(id).ok_or(SceneError::DeadEntity)?;
        match entity.attributes.get_mut(attr) {
            Some(slot) if slot.locked => Err(SceneError::Locked {
                entity: entity.name.clone(),
                attr: attr.to_string(),
            }),
            Some(slot) => {
                slot.value = value;
                Ok(())
            }
            None => {
                entity
                    .attributes
                    .insert(attr.to_string(), Attribute::new(value));
                Ok(())
            }
        }
    }

    fn connections(&self, id: EntityId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.touches(id))
            .cloned()
            .collect()
    }

    fn connect(&mut self, src: &Plug, dst: &Plug) -> Result<(), SceneError> {
        self.entity(src.entity)?;
        self.entity(dst.entity)?;
        let conn = Connection::new(src.clone(), dst.clone());
        if self.connections.contains(&conn) {
            return Ok(());
        }
        if self.connections.iter().any(|c| &c.dst == dst) {
            let name = self.describe(dst.entity);
            let plug = match dst.index {
                Some(i) => format!("{name}.{}[{i}]", dst.attr),
                None => format!("{name}.{}", dst.attr),
            };
            return Err(SceneError::PlugOccupied(plug));
        }
        self.connections.insert(conn);
        Ok(())
    }

    fn disconnect(&mut self, src: &Plug, dst: &Plug) -> Result<(), SceneError> {
        let conn = Connection::new(src.clone(), dst.clone());
        if self.connections.remove(&conn) {
            Ok(())
        } else {
            Err(SceneError::NotConnected {
                src: format!("{}.{}", self.describe(src.entity), src.attr),
                dst: format!("{}.{}", self.describe(dst.entity), dst.attr),
            })
        }
    }

    fn mesh(&self, name: &str) -> Option<MeshData> {
        let id = self.find(name)?;
        self.entities.get(id)?.geometry.clone()
    }

    fn create_mesh(&mut self, name: &str, data: &MeshData) -> Result<EntityId, SceneError> {
        data.validate()?;
        let id = self.create_entity(MESH_TYPE, name)?;
        if let Some(entity) = self.entities.get_mut(id) {
            entity.geometry = Some(data.clone());
        }
        Ok(id)
    }

    fn incoming(&self, id: EntityId, attr: &str) -> Vec<Connection> {
        // BTreeSet order sorts by source first; re-sort by destination index.
        let mut conns: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| c.dst.entity == id && c.dst.attr == attr)
            .cloned()
            .collect();
        conns.sort_by_key(|c| c.dst.index);
        conns
    }
}
