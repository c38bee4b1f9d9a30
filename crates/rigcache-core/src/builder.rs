//! Capture a live rig into a [`Bundle`], persist it, and rebuild it.
//!
//! Capture runs in two passes over the traversed entities. The first
//! populates one item per entity in type-priority order; the second
//! captures owned meshes and maps and wires relationships, once every item
//! that could be a relationship target exists. Build walks the bundle in
//! the same order: roots first, then everything else while the roots are
//! held deactivated.

use crate::attribute::AttrValue;
use crate::behavior::{BuildContext, ItemError, apply_attribute};
use crate::bundle::{Bundle, ParameterStore};
use crate::id::EntityId;
use crate::item::SceneItem;
use crate::map::InterpMode;
use crate::mesh::Axis;
use crate::query::ItemFilter;
use crate::registry::TypeRegistry;
use crate::remap::{RemapError, Remapper};
use crate::scene::{Deactivated, ENABLE_ATTR, MESH_TYPE, Scene};
use crate::serialize::{self, ArchiveError, ArchiveOptions};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to build '{name}': {source}")]
    Item {
        name: String,
        #[source]
        source: ItemError,
    },
    #[error(transparent)]
    Remap(#[from] RemapError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Items brought in line with the bundle, in build order.
    pub built: Vec<String>,
    /// Items that failed in permissive mode.
    pub failed: Vec<BuildFailure>,
}

/// Outcome of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    Captured {
        /// Names added to (or replaced in) the bundle.
        items: Vec<String>,
        /// Entities that could not be captured.
        skipped: Vec<String>,
    },
    NothingSelected,
    RootNotFound(String),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Where a capture starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    Named(String),
    Selection,
}

/// How far a capture walks from its roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Traversal {
    /// Every entity reachable through relationship connections.
    #[default]
    Closure,
    /// The roots and their direct neighbours.
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorOptions {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub axis: Axis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Log and continue past failing items instead of stopping.
    pub permissive: bool,
    pub interp_maps: InterpMode,
    /// Recreate meshes absent from the scene from their snapshots.
    pub create_missing_meshes: bool,
    pub mirror: Option<MirrorOptions>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            permissive: false,
            interp_maps: InterpMode::Auto,
            create_missing_meshes: true,
            mirror: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handle cache
// ---------------------------------------------------------------------------

/// Name → live entity lookups remembered across one builder's lifetime.
///
/// A cached handle is only returned while it is alive and still carries
/// the name; otherwise it is evicted and the scene is asked again.
#[derive(Debug, Clone, Default)]
pub struct HandleCache {
    handles: HashMap<String, EntityId>,
}

impl HandleCache {
    pub fn get(&mut self, scene: &dyn Scene, name: &str) -> Option<EntityId> {
        if let Some(&id) = self.handles.get(name) {
            if scene.is_alive(id) && scene.name_of(id) == Some(name) {
                return Some(id);
            }
            self.handles.remove(name);
        }
        let id = scene.find(name)?;
        self.handles.insert(name.to_string(), id);
        Some(id)
    }

    pub fn insert(&mut self, name: &str, id: EntityId) {
        self.handles.insert(name.to_string(), id);
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Owns a bundle and drives capture, build and persistence for it.
#[derive(Debug)]
pub struct Builder {
    registry: Arc<TypeRegistry>,
    bundle: Bundle,
    handles: HandleCache,
    host: Option<String>,
    pub archive: ArchiveOptions,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Builder {
    fn eq(&self, other: &Self) -> bool {
        self.bundle == other.bundle
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(TypeRegistry::default()))
    }

    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            bundle: Bundle::new(),
            handles: HandleCache::default(),
            host: None,
            archive: ArchiveOptions::default(),
        }
    }

    pub fn from_bundle(registry: Arc<TypeRegistry>, bundle: Bundle) -> Self {
        Self {
            bundle,
            ..Self::with_registry(registry)
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    pub fn into_bundle(self) -> Bundle {
        self.bundle
    }

    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    /// Capture from a named root or the current selection, adding the
    /// result to the bundle. The scene is only read.
    pub fn retrieve(&mut self, scene: &dyn Scene, root: Root, traversal: Traversal) -> Retrieval {
        let starts = match root {
            Root::Named(name) => match scene.find(&name) {
                Some(id) => vec![id],
                None => return Retrieval::RootNotFound(name),
            },
            Root::Selection => {
                let selection = scene.selection();
                if selection.is_empty() {
                    return Retrieval::NothingSelected;
                }
                selection
            }
        };

        let mut entities = traverse(scene, &starts, traversal);
        entities.sort_by_key(|&id| self.registry.priority(scene.type_of(id).unwrap_or_default()));

        let mut skipped = Vec::new();
        let mut populated: Vec<(EntityId, SceneItem)> = Vec::with_capacity(entities.len());
        for id in entities {
            let tag = scene.type_of(id).unwrap_or_default();
            match self.registry.behavior(tag).populate(scene, id) {
                Ok(item) => populated.push((id, item)),
                Err(e) => {
                    let name = scene.describe(id);
                    tracing::warn!(entity = %name, error = %e, "skipping entity that failed to populate");
                    skipped.push(name);
                }
            }
        }

        let mut captured = Vec::with_capacity(populated.len());
        let mut params = ParameterStore::new();
        for (id, mut item) in populated {
            let behavior = self.registry.behavior(&item.type_tag);
            let mut own = ParameterStore::new();
            let result = behavior
                .populate_parameters(scene, id, &mut item, &mut own)
                .and_then(|()| behavior.wire(scene, id, &mut item));
            match result {
                Ok(()) => {
                    params.absorb(own);
                    captured.push(item);
                }
                Err(e) => {
                    tracing::warn!(item = %item.name, error = %e, "dropping item that failed to capture");
                    skipped.push(item.name);
                }
            }
        }

        let names: Vec<String> = captured.iter().map(|i| i.name.clone()).collect();
        tracing::info!(captured = names.len(), skipped = skipped.len(), "retrieved rig");
        self.bundle.extend(captured);
        self.bundle.parameters.absorb(params);
        self.bundle.restore_references();
        self.host = Some(scene.host_info());
        Retrieval::Captured {
            items: names,
            skipped,
        }
    }

    /// Create or update live entities to match the bundle.
    pub fn build(&mut self, scene: &mut dyn Scene, options: &BuildOptions) -> Result<BuildReport, BuildError> {
        let (bundle, interp) = match &options.mirror {
            Some(mirror) => {
                let remap = Remapper::new(&mirror.pattern, &mirror.replacement)?;
                let mut copy = self.bundle.clone();
                remap_bundle(&self.registry, &mut copy, &remap);
                copy.parameters.mirror_meshes(mirror.axis);
                let interp = match options.interp_maps {
                    InterpMode::Auto => InterpMode::On,
                    other => other,
                };
                (Cow::Owned(copy), interp)
            }
            None => (Cow::Borrowed(&self.bundle), options.interp_maps),
        };

        let registry = &self.registry;
        let mut ordered: Vec<&SceneItem> = bundle.iter().collect();
        ordered.sort_by_key(|item| registry.priority(&item.type_tag));
        let (roots, rest): (Vec<&SceneItem>, Vec<&SceneItem>) = ordered
            .into_iter()
            .partition(|item| registry.behavior(&item.type_tag).is_root());

        let mut report = BuildReport::default();
        let mut ctx = BuildContext {
            parameters: &bundle.parameters,
            interp,
            create_missing_meshes: options.create_missing_meshes,
            handles: &mut self.handles,
        };

        let mut built_roots: Vec<(EntityId, &SceneItem)> = Vec::new();
        for item in roots {
            match registry.behavior(&item.type_tag).build(scene, item, &mut ctx) {
                Ok(id) => {
                    built_roots.push((id, item));
                    report.built.push(item.name.clone());
                }
                Err(e) => record_failure(options.permissive, &mut report, item, e)?,
            }
        }

        // a freshly created solver has no enable yet; hold it off explicitly
        // so the guard covers it while deformers are created
        for (id, item) in &built_roots {
            let defers_enable = registry
                .behavior(&item.type_tag)
                .deferred_attrs()
                .contains(&ENABLE_ATTR);
            if !defers_enable
                || !item.attributes.contains_key(ENABLE_ATTR)
                || scene.attribute(*id, ENABLE_ATTR).is_some()
            {
                continue;
            }
            if let Err(e) = apply_attribute(scene, *id, ENABLE_ATTR, &AttrValue::Bool(false)) {
                record_failure(options.permissive, &mut report, item, e)?;
            }
        }

        {
            let ids: Vec<EntityId> = built_roots.iter().map(|(id, _)| *id).collect();
            let mut guard = Deactivated::new(&mut *scene, &ids);
            for item in rest {
                match registry.behavior(&item.type_tag).build(&mut *guard, item, &mut ctx) {
                    Ok(_) => report.built.push(item.name.clone()),
                    Err(e) => record_failure(options.permissive, &mut report, item, e)?,
                }
            }
        }

        for (id, item) in built_roots {
            for &attr in registry.behavior(&item.type_tag).deferred_attrs() {
                let Some(captured) = item.attributes.get(attr) else {
                    continue;
                };
                if let Err(e) = apply_attribute(scene, id, attr, &captured.value) {
                    record_failure(options.permissive, &mut report, item, e)?;
                }
            }
        }

        tracing::info!(
            built = report.built.len(),
            failed = report.failed.len(),
            mirrored = options.mirror.is_some(),
            "build finished"
        );
        Ok(report)
    }

    /// Rename every item, reference and parameter in the bundle.
    pub fn string_replace(&mut self, pattern: &str, replacement: &str) -> Result<(), RemapError> {
        let remap = Remapper::new(pattern, replacement)?;
        remap_bundle(&self.registry, &mut self.bundle, &remap);
        self.handles.clear();
        Ok(())
    }

    pub fn get_scene_items(&self, filter: &ItemFilter) -> Vec<&SceneItem> {
        filter.apply(&self.bundle)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        let host = self.host.as_deref().unwrap_or("headless");
        serialize::write_archive(path.as_ref(), &self.bundle, &self.registry, host, &self.archive)
    }

    /// Replace the bundle with the contents of an archive.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        self.bundle = serialize::read_archive(path.as_ref(), &self.registry)?;
        self.handles.clear();
        Ok(())
    }
}

fn record_failure(
    permissive: bool,
    report: &mut BuildReport,
    item: &SceneItem,
    error: ItemError,
) -> Result<(), BuildError> {
    if !permissive {
        return Err(BuildError::Item {
            name: item.name.clone(),
            source: error,
        });
    }
    tracing::warn!(item = %item.name, error = %error, "build failed; continuing");
    report.failed.push(BuildFailure {
        name: item.name.clone(),
        error: error.to_string(),
    });
    Ok(())
}

/// Rename through each item's behaviour, then the parameters, then rebind
/// references.
pub(crate) fn remap_bundle(registry: &TypeRegistry, bundle: &mut Bundle, remap: &Remapper) {
    bundle.for_each_mut(|item| {
        registry
            .behavior(&item.type_tag)
            .string_replace(item, remap);
    });
    bundle.parameters.rename_with(&|name: &str| remap.apply(name));
    bundle.restore_references();
}

/// Entities reached from `starts`, in discovery order. Meshes are never
/// visited; a selected mesh stands in for its direct neighbours.
fn traverse(scene: &dyn Scene, starts: &[EntityId], traversal: Traversal) -> Vec<EntityId> {
    let is_mesh = |id: EntityId| scene.type_of(id) == Some(MESH_TYPE);
    let neighbours = |id: EntityId| -> Vec<EntityId> {
        scene
            .connections(id)
            .into_iter()
            .map(|c| if c.src.entity == id { c.dst.entity } else { c.src.entity })
            .filter(|&other| other != id && !is_mesh(other))
            .collect()
    };

    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<(EntityId, usize)> = VecDeque::new();
    for &start in starts {
        if is_mesh(start) {
            for n in neighbours(start) {
                queue.push_back((n, 0));
            }
        } else {
            queue.push_back((start, 0));
        }
    }

    while let Some((id, depth)) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        if traversal == Traversal::Immediate && depth >= 1 {
            continue;
        }
        for n in neighbours(id) {
            if !seen.contains(&n) {
                queue.push_back((n, depth + 1));
            }
        }
    }
    order
}
