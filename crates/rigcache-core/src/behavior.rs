//! Per-type capture and build behaviour.
//!
//! Every entity type the engine knows about is described by an
//! [`ItemBehavior`]. Most built-in types are plain data: which
//! relationship fields they carry, which array attributes are weight maps
//! and how they bind geometry. The provided trait methods implement the
//! shared capture and build pipeline on top of that description.

use crate::attribute::{AttrValue, Attribute};
use crate::builder::HandleCache;
use crate::bundle::ParameterStore;
use crate::id::{Connection, EntityId, GEOMETRY, MESSAGE, Plug};
use crate::item::{Arity, Direction, Link, LinkSpec, MapSpec, NameRef, ParamKind, SceneItem};
use crate::map::{InterpMode, MapError, WeightMap};
use crate::mesh::{MeshError, MeshSnapshot};
use crate::remap::Remapper;
use crate::scene::{ENABLE_ATTR, MESH_TYPE, Scene, SceneError};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error("live entity '{name}' is a '{found}', expected '{expected}'")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    #[error("'{item}' needs mesh '{mesh}', which is neither in the scene nor creatable")]
    MissingMesh { item: String, mesh: String },
    #[error("'{item}'.{field} refers to '{target}', which does not exist in the scene")]
    MissingTarget {
        item: String,
        field: String,
        target: String,
    },
    #[error("'{item}' lists parameter '{name}' that the bundle does not hold")]
    MissingParameter { item: String, name: String },
    #[error("map '{map}' on '{item}' needs geometry[{index}], which is unbound")]
    UnboundGeometry {
        item: String,
        map: String,
        index: usize,
    },
    #[error("malformed item record: {0}")]
    Record(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Build context
// ---------------------------------------------------------------------------

/// Geometry binding style of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryBinding {
    None,
    /// Captured mesh `i` is bound at `geometry[i]`.
    Exact,
    /// Every captured mesh is bound at some free `geometry[]` slot.
    Free,
}

/// Shared state threaded through one build.
pub struct BuildContext<'a> {
    pub parameters: &'a ParameterStore,
    pub interp: InterpMode,
    pub create_missing_meshes: bool,
    pub handles: &'a mut HandleCache,
}

impl BuildContext<'_> {
    pub fn lookup(&mut self, scene: &dyn Scene, name: &str) -> Option<EntityId> {
        self.handles.get(scene, name)
    }
}

// ---------------------------------------------------------------------------
// ItemBehavior
// ---------------------------------------------------------------------------

/// Capture and build rules for one entity type.
pub trait ItemBehavior: Send + Sync {
    fn type_tag(&self) -> &str;

    /// Class name written into archive records.
    fn class_name(&self) -> &str;

    fn links(&self) -> &[LinkSpec] {
        &[]
    }

    fn maps(&self) -> &[MapSpec] {
        &[]
    }

    fn geometry(&self) -> GeometryBinding {
        GeometryBinding::None
    }

    /// Roots are built first and held deactivated while the rest builds.
    fn is_root(&self) -> bool {
        false
    }

    /// Attributes applied only once the build's deactivation scope ends.
    fn deferred_attrs(&self) -> &[&'static str] {
        &[]
    }

    /// Capture the attributes of a live entity. Map attributes are left
    /// out; they are captured as parameters.
    fn populate(&self, scene: &dyn Scene, id: EntityId) -> Result<SceneItem, ItemError> {
        let name = scene.name_of(id).ok_or(SceneError::DeadEntity)?;
        let tag = scene.type_of(id).unwrap_or(self.type_tag());
        let mut item = SceneItem::new(tag, name);
        for attr in scene.attribute_names(id) {
            if self.maps().iter().any(|m| m.attr == attr) {
                continue;
            }
            if let Some(value) = scene.attribute(id, &attr) {
                item.attributes.insert(attr, value);
            }
        }
        Ok(item)
    }

    /// Capture the meshes and weight maps the entity owns.
    fn populate_parameters(
        &self,
        scene: &dyn Scene,
        id: EntityId,
        item: &mut SceneItem,
        params: &mut ParameterStore,
    ) -> Result<(), ItemError> {
        let bound = capture_geometry(scene, id, item, params)?;
        capture_maps(self.maps(), scene, id, &bound, item, params)
    }

    /// Capture relationship fields from live connections.
    fn wire(&self, scene: &dyn Scene, id: EntityId, item: &mut SceneItem) -> Result<(), ItemError> {
        for spec in self.links() {
            if let Some(link) = capture_link(scene, id, spec) {
                item.set_link(spec.field, link);
            }
        }
        Ok(())
    }

    fn create(&self, scene: &mut dyn Scene, item: &SceneItem) -> Result<EntityId, ItemError> {
        Ok(scene.create_entity(&item.type_tag, &item.name)?)
    }

    /// Bring the live scene in line with `item`, creating the entity if it
    /// does not exist. Re-running with an unchanged item changes nothing.
    fn build(
        &self,
        scene: &mut dyn Scene,
        item: &SceneItem,
        ctx: &mut BuildContext<'_>,
    ) -> Result<EntityId, ItemError> {
        let id = match ctx.lookup(&*scene, &item.name) {
            Some(id) => {
                let found = scene.type_of(id).unwrap_or_default();
                if found != item.type_tag {
                    return Err(ItemError::TypeMismatch {
                        name: item.name.clone(),
                        expected: item.type_tag.clone(),
                        found: found.to_string(),
                    });
                }
                id
            }
            None => {
                let id = self.create(scene, item)?;
                ctx.handles.insert(&item.name, id);
                tracing::debug!(item = %item.name, kind = %item.type_tag, "created entity");
                id
            }
        };

        let attrs = item
            .attributes
            .iter()
            .filter(|(attr, _)| !self.deferred_attrs().contains(&attr.as_str()));
        for (attr, captured) in attrs {
            apply_attribute(scene, id, attr, &captured.value)?;
        }

        let meshes = ensure_meshes(scene, item, ctx)?;
        bind_geometry(scene, id, &meshes, self.geometry())?;

        for spec in self.links() {
            if let Some(link) = item.link(spec.field) {
                build_link(scene, id, item, spec, link, ctx)?;
            }
        }

        apply_maps(scene, id, item, ctx)?;
        Ok(id)
    }

    /// Rename the item, its references and its parameter names.
    fn string_replace(&self, item: &mut SceneItem, remap: &Remapper) {
        item.rename_with(&|name: &str| remap.apply(name));
    }

    /// Turn an archive record back into an item.
    fn deserialize(&self, record: serde_json::Value) -> Result<SceneItem, ItemError> {
        Ok(serde_json::from_value(record)?)
    }
}

// ---------------------------------------------------------------------------
// Capture helpers
// ---------------------------------------------------------------------------

/// Snapshot every mesh bound to `geometry[]`, returning index → mesh name.
fn capture_geometry(
    scene: &dyn Scene,
    id: EntityId,
    item: &mut SceneItem,
    params: &mut ParameterStore,
) -> Result<BTreeMap<u32, String>, ItemError> {
    let mut bound = BTreeMap::new();
    for conn in scene.incoming(id, GEOMETRY) {
        if scene.type_of(conn.src.entity) != Some(MESH_TYPE) {
            continue;
        }
        let Some(mesh) = scene.name_of(conn.src.entity) else {
            continue;
        };
        capture_mesh(scene, mesh, item, params)?;
        bound.insert(conn.dst.index.unwrap_or(0), mesh.to_string());
    }
    Ok(bound)
}

fn capture_mesh(
    scene: &dyn Scene,
    mesh: &str,
    item: &mut SceneItem,
    params: &mut ParameterStore,
) -> Result<(), ItemError> {
    if params.mesh(mesh).is_none() {
        params.upsert_mesh(MeshSnapshot::capture(scene, mesh)?);
    }
    item.add_param(ParamKind::Mesh, mesh);
    Ok(())
}

fn capture_maps(
    specs: &[MapSpec],
    scene: &dyn Scene,
    id: EntityId,
    bound: &BTreeMap<u32, String>,
    item: &mut SceneItem,
    params: &mut ParameterStore,
) -> Result<(), ItemError> {
    for spec in specs {
        let Some(attr) = scene.attribute(id, spec.attr) else {
            continue;
        };
        let values = attr.value.as_array().ok_or_else(|| MapError::NotAnArray {
            node: item.name.clone(),
            attr: spec.attr.to_string(),
        })?;
        let mesh = bound
            .get(&(spec.geometry as u32))
            .ok_or_else(|| ItemError::UnboundGeometry {
                item: item.name.clone(),
                map: spec.attr.to_string(),
                index: spec.geometry,
            })?;
        let map = WeightMap::new(&item.name, spec.attr, mesh, values.to_vec());
        item.add_param(ParamKind::Map, &map.name);
        params.upsert_map(map);
    }
    Ok(())
}

fn capture_link(scene: &dyn Scene, id: EntityId, spec: &LinkSpec) -> Option<Link> {
    let name = |entity: EntityId| scene.name_of(entity).map(NameRef::new);
    let link = match spec.direction {
        Direction::Incoming => {
            let conns: Vec<Connection> = scene
                .incoming(id, spec.attr)
                .into_iter()
                .filter(|c| c.src.attr == MESSAGE)
                .collect();
            match spec.arity {
                Arity::Single => Link::Single(conns.first().and_then(|c| name(c.src.entity))),
                Arity::Many => Link::Many(
                    conns
                        .iter()
                        .filter_map(|c| name(c.src.entity))
                        .collect(),
                ),
                Arity::Keyed => Link::Keyed(
                    conns
                        .iter()
                        .filter_map(|c| Some((c.dst.index?.to_string(), name(c.src.entity)?)))
                        .collect(),
                ),
            }
        }
        Direction::Outgoing { .. } => Link::Single(
            scene
                .outgoing(id, MESSAGE)
                .iter()
                .find(|c| c.dst.attr == spec.attr)
                .and_then(|c| name(c.dst.entity)),
        ),
    };
    (!link.is_empty()).then_some(link)
}

// ---------------------------------------------------------------------------
// Build helpers
// ---------------------------------------------------------------------------

/// Set one attribute unless the live value is locked or already matches.
pub(crate) fn apply_attribute(
    scene: &mut dyn Scene,
    id: EntityId,
    attr: &str,
    value: &AttrValue,
) -> Result<(), ItemError> {
    match scene.attribute(id, attr) {
        Some(Attribute { locked: true, .. }) => {
            tracing::debug!(entity = %scene.describe(id), attr, "skipping locked attribute");
            Ok(())
        }
        Some(live) if live.value.approx_eq(value) => Ok(()),
        _ => Ok(scene.set_attribute(id, attr, value.clone())?),
    }
}

fn ensure_meshes(
    scene: &mut dyn Scene,
    item: &SceneItem,
    ctx: &mut BuildContext<'_>,
) -> Result<Vec<EntityId>, ItemError> {
    let mut ids = Vec::new();
    for mesh in item.params(ParamKind::Mesh) {
        if let Some(id) = ctx.lookup(&*scene, mesh) {
            if scene.type_of(id) != Some(MESH_TYPE) {
                return Err(SceneError::NotAMesh(mesh.clone()).into());
            }
            ids.push(id);
            continue;
        }
        let snapshot = ctx
            .parameters
            .mesh(mesh)
            .filter(|_| ctx.create_missing_meshes)
            .ok_or_else(|| ItemError::MissingMesh {
                item: item.name.clone(),
                mesh: mesh.clone(),
            })?;
        let id = scene.create_mesh(mesh, &snapshot.geometry)?;
        tracing::info!(mesh = %mesh, item = %item.name, "created missing mesh from snapshot");
        ctx.handles.insert(mesh, id);
        ids.push(id);
    }
    Ok(ids)
}

fn bind_geometry(
    scene: &mut dyn Scene,
    id: EntityId,
    meshes: &[EntityId],
    binding: GeometryBinding,
) -> Result<(), ItemError> {
    match binding {
        GeometryBinding::None => {}
        GeometryBinding::Exact => {
            for (i, &mesh) in meshes.iter().enumerate() {
                connect_replacing(scene, &Plug::message(mesh), &Plug::indexed(id, GEOMETRY, i as u32))?;
            }
        }
        GeometryBinding::Free => {
            for &mesh in meshes {
                let src = Plug::message(mesh);
                let bound = scene.incoming(id, GEOMETRY).iter().any(|c| c.src == src);
                if !bound {
                    let slot = scene.next_free_index(id, GEOMETRY);
                    scene.connect(&src, &Plug::indexed(id, GEOMETRY, slot))?;
                }
            }
        }
    }
    Ok(())
}

/// Connect `src → dst`, first removing whatever else drives `dst`.
fn connect_replacing(scene: &mut dyn Scene, src: &Plug, dst: &Plug) -> Result<(), SceneError> {
    if scene.is_connected(src, dst) {
        return Ok(());
    }
    let occupant = scene
        .incoming(dst.entity, &dst.attr)
        .into_iter()
        .find(|c| c.dst.index == dst.index);
    if let Some(old) = occupant {
        scene.disconnect(&old.src, &old.dst)?;
    }
    scene.connect(src, dst)
}

fn build_link(
    scene: &mut dyn Scene,
    id: EntityId,
    item: &SceneItem,
    spec: &LinkSpec,
    link: &Link,
    ctx: &mut BuildContext<'_>,
) -> Result<(), ItemError> {
    let mut target = |scene: &dyn Scene, r: &NameRef| {
        ctx.lookup(scene, &r.name).ok_or_else(|| ItemError::MissingTarget {
            item: item.name.clone(),
            field: spec.field.to_string(),
            target: r.name.clone(),
        })
    };

    match (spec.direction, link) {
        (Direction::Incoming, Link::Single(Some(r))) => {
            let src = Plug::message(target(&*scene, r)?);
            connect_replacing(scene, &src, &Plug::new(id, spec.attr))?;
        }
        (Direction::Incoming, Link::Many(refs)) => {
            for (i, r) in refs.iter().enumerate() {
                let src = Plug::message(target(&*scene, r)?);
                connect_replacing(scene, &src, &Plug::indexed(id, spec.attr, i as u32))?;
            }
            // the list is packed on rebuild; drop whatever the live entity
            // still has past its end
            let count = refs.len() as u32;
            for stale in scene
                .incoming(id, spec.attr)
                .into_iter()
                .filter(|c| c.dst.index.is_none_or(|i| i >= count))
            {
                tracing::debug!(item = %item.name, field = spec.field, index = ?stale.dst.index, "dropping stale link entry");
                scene.disconnect(&stale.src, &stale.dst)?;
            }
        }
        (Direction::Incoming, Link::Keyed(refs)) => {
            for (key, r) in refs {
                let Ok(index) = key.parse::<u32>() else {
                    tracing::warn!(item = %item.name, field = spec.field, key = %key, "skipping non-numeric link key");
                    continue;
                };
                let src = Plug::message(target(&*scene, r)?);
                connect_replacing(scene, &src, &Plug::indexed(id, spec.attr, index))?;
            }
        }
        (Direction::Outgoing { indexed }, link) => {
            let src = Plug::message(id);
            for r in link.refs() {
                let tid = target(&*scene, r)?;
                let already = scene
                    .outgoing(id, MESSAGE)
                    .iter()
                    .any(|c| c.dst.entity == tid && c.dst.attr == spec.attr);
                if already {
                    continue;
                }
                if indexed {
                    let slot = scene.next_free_index(tid, spec.attr);
                    scene.connect(&src, &Plug::indexed(tid, spec.attr, slot))?;
                } else {
                    connect_replacing(scene, &src, &Plug::new(tid, spec.attr))?;
                }
            }
        }
        (Direction::Incoming, Link::Single(None)) => {}
    }
    Ok(())
}

fn apply_maps(
    scene: &mut dyn Scene,
    id: EntityId,
    item: &SceneItem,
    ctx: &mut BuildContext<'_>,
) -> Result<(), ItemError> {
    for name in item.params(ParamKind::Map) {
        let map = ctx
            .parameters
            .map(name)
            .ok_or_else(|| ItemError::MissingParameter {
                item: item.name.clone(),
                name: name.clone(),
            })?;
        let live = scene.mesh(&map.mesh).ok_or_else(|| ItemError::MissingMesh {
            item: item.name.clone(),
            mesh: map.mesh.clone(),
        })?;

        let values = if ctx.interp.should_interpolate(map.len(), live.vertex_count()) {
            let source = ctx
                .parameters
                .mesh(&map.mesh)
                .ok_or_else(|| ItemError::MissingParameter {
                    item: item.name.clone(),
                    name: map.mesh.clone(),
                })?;
            tracing::debug!(
                map = %map.name,
                from = map.len(),
                to = live.vertex_count(),
                "interpolating weight map"
            );
            map.interpolate(source, &live)?
        } else if map.len() != live.vertex_count() {
            return Err(MapError::LengthMismatch {
                map: map.name.clone(),
                mesh: map.mesh.clone(),
                values: map.len(),
                vertices: live.vertex_count(),
            }
            .into());
        } else {
            map.values.clone()
        };

        apply_attribute(scene, id, map.attr(), &AttrValue::DoubleArray(values))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Built-in behaviours
// ---------------------------------------------------------------------------

/// A built-in type fully described by static data.
#[derive(Debug, Clone, Copy)]
pub struct StandardBehavior {
    pub tag: &'static str,
    pub class: &'static str,
    pub links: &'static [LinkSpec],
    pub maps: &'static [MapSpec],
    pub geometry: GeometryBinding,
    pub root: bool,
    pub deferred: &'static [&'static str],
}

impl ItemBehavior for StandardBehavior {
    fn type_tag(&self) -> &str {
        self.tag
    }

    fn class_name(&self) -> &str {
        self.class
    }

    fn links(&self) -> &[LinkSpec] {
        self.links
    }

    fn maps(&self) -> &[MapSpec] {
        self.maps
    }

    fn geometry(&self) -> GeometryBinding {
        self.geometry
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn deferred_attrs(&self) -> &[&'static str] {
        self.deferred
    }
}

const SOLVER_LINK: LinkSpec = LinkSpec::outgoing("solver", "inputs", true);
const TISSUE_LINK: LinkSpec = LinkSpec::incoming("tissue", "tissue", Arity::Single);
const WEIGHTS: MapSpec = MapSpec {
    attr: "weights",
    geometry: 0,
};

pub const SOLVER_TRANSFORM: StandardBehavior = StandardBehavior {
    tag: "solver_transform",
    class: "SolverTransformNode",
    links: &[],
    maps: &[],
    geometry: GeometryBinding::None,
    root: true,
    deferred: &[],
};

pub const SOLVER: StandardBehavior = StandardBehavior {
    tag: "solver",
    class: "SolverNode",
    links: &[LinkSpec::incoming("transform", "transform", Arity::Single)],
    maps: &[],
    geometry: GeometryBinding::None,
    root: true,
    deferred: &[ENABLE_ATTR],
};

pub const EMBEDDER: StandardBehavior = StandardBehavior {
    tag: "embedder",
    class: "EmbedderNode",
    links: &[LinkSpec::incoming("solver", "solver", Arity::Single)],
    maps: &[],
    geometry: GeometryBinding::Free,
    root: true,
    deferred: &[],
};

pub const BONE: StandardBehavior = StandardBehavior {
    tag: "bone",
    class: "BoneNode",
    links: &[SOLVER_LINK],
    maps: &[],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

pub const TISSUE: StandardBehavior = StandardBehavior {
    tag: "tissue",
    class: "TissueNode",
    links: &[SOLVER_LINK],
    maps: &[],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

pub const CLOTH: StandardBehavior = StandardBehavior {
    tag: "cloth",
    class: "ClothNode",
    links: &[SOLVER_LINK],
    maps: &[WEIGHTS],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

pub const ATTACHMENT: StandardBehavior = StandardBehavior {
    tag: "attachment",
    class: "AttachmentNode",
    links: &[
        SOLVER_LINK,
        LinkSpec::incoming("targets", "targets", Arity::Many),
    ],
    maps: &[
        WEIGHTS,
        MapSpec {
            attr: "target_weights",
            geometry: 1,
        },
    ],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

pub const FIBER: StandardBehavior = StandardBehavior {
    tag: "fiber",
    class: "FiberNode",
    links: &[SOLVER_LINK, TISSUE_LINK],
    maps: &[
        WEIGHTS,
        MapSpec {
            attr: "end_points",
            geometry: 0,
        },
    ],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

pub const MATERIAL: StandardBehavior = StandardBehavior {
    tag: "material",
    class: "MaterialNode",
    links: &[SOLVER_LINK, TISSUE_LINK],
    maps: &[WEIGHTS],
    geometry: GeometryBinding::Exact,
    root: false,
    deferred: &[],
};

/// Rest shapes drive their tissue from a sparse set of target meshes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestShapeBehavior;

const RESTSHAPE_LINKS: &[LinkSpec] = &[
    SOLVER_LINK,
    TISSUE_LINK,
    LinkSpec::incoming("targets", "targets", Arity::Keyed),
];

impl ItemBehavior for RestShapeBehavior {
    fn type_tag(&self) -> &str {
        "restshape"
    }

    fn class_name(&self) -> &str {
        "RestShapeNode"
    }

    fn links(&self) -> &[LinkSpec] {
        RESTSHAPE_LINKS
    }

    /// Target meshes are snapshotted so they can be recreated on build.
    fn populate_parameters(
        &self,
        scene: &dyn Scene,
        id: EntityId,
        item: &mut SceneItem,
        params: &mut ParameterStore,
    ) -> Result<(), ItemError> {
        for conn in scene.incoming(id, "targets") {
            if scene.type_of(conn.src.entity) != Some(MESH_TYPE) {
                continue;
            }
            if let Some(mesh) = scene.name_of(conn.src.entity) {
                capture_mesh(scene, mesh, item, params)?;
            }
        }
        Ok(())
    }
}

/// Fallback for types without a registered behaviour: attributes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericBehavior;

impl ItemBehavior for GenericBehavior {
    fn type_tag(&self) -> &str {
        "generic"
    }

    fn class_name(&self) -> &str {
        "SceneItem"
    }

    fn populate_parameters(
        &self,
        _scene: &dyn Scene,
        _id: EntityId,
        _item: &mut SceneItem,
        _params: &mut ParameterStore,
    ) -> Result<(), ItemError> {
        Ok(())
    }
}
