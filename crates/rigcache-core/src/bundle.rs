//! Ordered, name-keyed collection of scene items plus the weight maps and
//! mesh snapshots they own.

use crate::item::{NameRef, ParamKind, SceneItem};
use crate::map::WeightMap;
use crate::mesh::{Axis, MeshSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BundleError {
    #[error("no item named '{0}' in bundle")]
    NotFound(String),
    #[error("item '{old}' cannot be renamed to '{new}': name already present")]
    NameCollision { old: String, new: String },
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// Weight maps and mesh snapshots keyed by name, in insertion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParameterStore {
    maps: Vec<WeightMap>,
    meshes: Vec<MeshSnapshot>,
    #[serde(skip)]
    map_index: HashMap<String, usize>,
    #[serde(skip)]
    mesh_index: HashMap<String, usize>,
}

impl<'de> Deserialize<'de> for ParameterStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct StoreData {
            #[serde(default)]
            maps: Vec<WeightMap>,
            #[serde(default)]
            meshes: Vec<MeshSnapshot>,
        }

        let data = StoreData::deserialize(deserializer)?;
        let mut store = ParameterStore::default();
        for map in data.maps {
            store.upsert_map(map);
        }
        for mesh in data.meshes {
            store.upsert_mesh(mesh);
        }
        Ok(store)
    }
}

impl PartialEq for ParameterStore {
    fn eq(&self, other: &Self) -> bool {
        self.maps == other.maps && self.meshes == other.meshes
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maps(&self) -> &[WeightMap] {
        &self.maps
    }

    pub fn meshes(&self) -> &[MeshSnapshot] {
        &self.meshes
    }

    pub fn map(&self, name: &str) -> Option<&WeightMap> {
        self.map_index.get(name).map(|&i| &self.maps[i])
    }

    pub fn map_mut(&mut self, name: &str) -> Option<&mut WeightMap> {
        self.map_index.get(name).map(|&i| &mut self.maps[i])
    }

    pub fn mesh(&self, name: &str) -> Option<&MeshSnapshot> {
        self.mesh_index.get(name).map(|&i| &self.meshes[i])
    }

    /// Insert or replace a map by name.
    pub fn upsert_map(&mut self, map: WeightMap) {
        match self.map_index.get(&map.name) {
            Some(&i) => self.maps[i] = map,
            None => {
                self.map_index.insert(map.name.clone(), self.maps.len());
                self.maps.push(map);
            }
        }
    }

    /// Insert or replace a mesh snapshot by name.
    pub fn upsert_mesh(&mut self, mesh: MeshSnapshot) {
        match self.mesh_index.get(&mesh.name) {
            Some(&i) => self.meshes[i] = mesh,
            None => {
                self.mesh_index.insert(mesh.name.clone(), self.meshes.len());
                self.meshes.push(mesh);
            }
        }
    }

    /// Merge another store into this one, replacing on name match.
    pub fn absorb(&mut self, other: ParameterStore) {
        for map in other.maps {
            self.upsert_map(map);
        }
        for mesh in other.meshes {
            self.upsert_mesh(mesh);
        }
    }

    /// Drop every parameter not named in `keep`.
    pub fn retain(&mut self, keep: &HashSet<String>) {
        self.maps.retain(|m| keep.contains(&m.name));
        self.meshes.retain(|m| keep.contains(&m.name));
        self.reindex();
    }

    /// Rename every map, its mesh binding and every mesh snapshot.
    pub fn rename_with(&mut self, rename: &dyn Fn(&str) -> String) {
        for map in &mut self.maps {
            map.name = rename(&map.name);
            map.mesh = rename(&map.mesh);
        }
        for mesh in &mut self.meshes {
            mesh.name = rename(&mesh.name);
        }
        self.reindex();
    }

    pub fn mirror_meshes(&mut self, axis: Axis) {
        for mesh in &mut self.meshes {
            mesh.mirror(axis);
        }
    }

    fn reindex(&mut self) {
        // Renames can fold two names into one; the later entry wins.
        let maps = std::mem::take(&mut self.maps);
        let meshes = std::mem::take(&mut self.meshes);
        self.map_index.clear();
        self.mesh_index.clear();
        for map in maps {
            self.upsert_map(map);
        }
        for mesh in meshes {
            self.upsert_mesh(mesh);
        }
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Ordered scene items with at most one item per name.
///
/// `Clone` is a full deep copy: items refer to each other by name and
/// position only, so a clone never aliases the original.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    items: Vec<SceneItem>,
    index: HashMap<String, usize>,
    pub parameters: ParameterStore,
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items && self.parameters == other.parameters
    }
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = SceneItem>) -> Self {
        let mut bundle = Self::new();
        bundle.extend(items);
        bundle
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[SceneItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneItem> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&SceneItem> {
        self.position(name).map(|i| &self.items[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Mutate one item in place. Renames go through [`Bundle::rename`].
    pub fn update<F>(&mut self, name: &str, f: F) -> Result<(), BundleError>
    where
        F: FnOnce(&mut SceneItem),
    {
        let i = self
            .position(name)
            .ok_or_else(|| BundleError::NotFound(name.to_string()))?;
        let item = &mut self.items[i];
        f(item);
        // Keep the index authoritative even if the closure touched the name.
        item.name = name.to_string();
        Ok(())
    }

    /// Rename one item, leaving references to it untouched.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), BundleError> {
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(BundleError::NameCollision {
                old: old.to_string(),
                new: new.to_string(),
            });
        }
        let i = self
            .index
            .remove(old)
            .ok_or_else(|| BundleError::NotFound(old.to_string()))?;
        self.items[i].name = new.to_string();
        self.index.insert(new.to_string(), i);
        Ok(())
    }

    /// Upsert by name: a name already present is replaced in place, new
    /// names are appended in the order supplied.
    pub fn extend(&mut self, items: impl IntoIterator<Item = SceneItem>) {
        for item in items {
            match self.index.get(&item.name) {
                Some(&i) => self.items[i] = item,
                None => {
                    self.index.insert(item.name.clone(), self.items.len());
                    self.items.push(item);
                }
            }
        }
    }

    pub fn push(&mut self, item: SceneItem) {
        self.extend(std::iter::once(item));
    }

    /// Remove an item by name. Parameters no other item refers to go with it.
    pub fn remove(&mut self, name: &str) -> Option<SceneItem> {
        let i = self.position(name)?;
        let item = self.items.remove(i);
        self.reindex();
        self.prune_parameters();
        Some(item)
    }

    /// Look up the target of a reference, using the cached slot when it is
    /// still valid.
    pub fn resolve(&self, target: &NameRef) -> Option<&SceneItem> {
        target
            .slot
            .and_then(|slot| self.items.get(slot))
            .filter(|item| item.name == target.name)
            .or_else(|| self.get(&target.name))
    }

    /// Restoration pass: bind every stored reference to its target.
    ///
    /// References to items get their slot refreshed. References to mesh
    /// snapshots are kept without a slot. Any other name is dropped from its
    /// field with a warning. Returns the number of dropped references.
    pub fn restore_references(&mut self) -> usize {
        let mut dropped = 0;
        let index = &self.index;
        let parameters = &self.parameters;
        for item in &mut self.items {
            for (field, link) in item.relationships.iter_mut() {
                link.retain(|target| {
                    if let Some(&slot) = index.get(&target.name) {
                        target.slot = Some(slot);
                        true
                    } else if parameters.mesh(&target.name).is_some() {
                        target.slot = None;
                        true
                    } else {
                        tracing::warn!(
                            item = %item.name,
                            field = %field,
                            target = %target.name,
                            "dropping unresolved reference"
                        );
                        dropped += 1;
                        false
                    }
                });
            }
        }
        dropped
    }

    /// Rewrite every name in the bundle (items, references, parameters)
    /// through `rename`, rebuilding the indices afterwards. Returns the
    /// original names of items replaced by a later item that was renamed
    /// to the same name.
    pub fn rename_all(&mut self, rename: &dyn Fn(&str) -> String) -> Vec<String> {
        let originals = self.owned_names();
        for item in &mut self.items {
            item.rename_with(rename);
        }
        self.parameters.rename_with(rename);
        let folded = self.reinsert(originals);
        self.restore_references();
        folded
    }

    /// Apply `f` to every item, then rebuild the name index. Returns the
    /// original names of items folded away as in [`Bundle::rename_all`].
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut SceneItem)) -> Vec<String> {
        let originals = self.owned_names();
        for item in &mut self.items {
            f(item);
        }
        self.reinsert(originals)
    }

    fn owned_names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }

    fn reinsert(&mut self, originals: Vec<String>) -> Vec<String> {
        let items = std::mem::take(&mut self.items);
        self.index.clear();
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut folded = Vec::new();
        for (item, original) in items.into_iter().zip(originals) {
            if let Some(first) = claimed.insert(item.name.clone(), original.clone()) {
                tracing::warn!(
                    name = %item.name,
                    first = %first,
                    second = %original,
                    "two items renamed to the same name; keeping the second"
                );
                folded.push(first);
            }
            self.push(item);
        }
        folded
    }

    pub fn into_items(self) -> Vec<SceneItem> {
        self.items
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.name.clone(), i))
            .collect();
    }

    fn prune_parameters(&mut self) {
        let mut keep: HashSet<String> = self
            .items
            .iter()
            .flat_map(|item| {
                item.params(ParamKind::Map)
                    .iter()
                    .chain(item.params(ParamKind::Mesh))
                    .cloned()
            })
            .collect();
        // A kept map keeps its mesh even if no item lists the mesh.
        let bound: Vec<String> = self
            .parameters
            .maps()
            .iter()
            .filter(|m| keep.contains(&m.name))
            .map(|m| m.mesh.clone())
            .collect();
        keep.extend(bound);
        self.parameters.retain(&keep);
    }
}
