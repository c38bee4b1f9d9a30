//! Rigcache Core -- capture, persist and rebuild simulation rigs.
//!
//! A rig is a graph of live scene entities (solvers, tissues, bones,
//! attachments, fibers, ...) wired to each other and to meshes. This crate
//! captures such a graph into a [`bundle::Bundle`] of scene items that refer
//! to each other by name, writes it to a versioned archive, reads it back
//! and rebuilds the graph in any scene, transferring per-vertex weight maps
//! onto meshes whose topology changed since capture.
//!
//! # Capture / Build Pipeline
//!
//! 1. **Traverse** -- Walk relationship connections out from a root or the
//!    selection ([`builder::Traversal`]).
//! 2. **Populate** -- One [`item::SceneItem`] per entity, in type-priority
//!    order, through the behaviour the [`registry::TypeRegistry`] holds for
//!    its type.
//! 3. **Parameters and wiring** -- Mesh snapshots, weight maps and
//!    relationship fields, once every possible target item exists.
//! 4. **Restore** -- Every stored name is bound to its target in the bundle.
//! 5. **Build** -- Roots first, then everything else while the roots are
//!    held deactivated ([`scene::Deactivated`]).
//!
//! # Name-Based References
//!
//! Items never own each other. A relationship is a [`item::NameRef`]: the
//! target's name plus a cached position in the bundle, refreshed by
//! [`bundle::Bundle::restore_references`]. Renames go through
//! [`remap::Remapper`] and touch every name the same way.
//!
//! ```rust,ignore
//! let mut builder = Builder::new();
//! builder.retrieve(&scene, Root::Named("solver".into()), Traversal::Closure);
//! builder.write("rig.json.gz")?;
//! builder.read("rig.json.gz")?;
//! builder.build(&mut scene, &BuildOptions::default())?;
//! ```
//!
//! # Key Types
//!
//! - [`builder::Builder`] -- Owns a bundle; drives retrieve, build, write
//!   and read.
//! - [`scene::Scene`] -- Operations consumed from the host scene.
//!   [`memory::MemoryScene`] implements it headlessly.
//! - [`behavior::ItemBehavior`] -- Per-type populate/build/rename logic.
//! - [`map::WeightMap`] -- Per-vertex weights with closest-point
//!   interpolation between topologies.
//! - [`serialize`] -- gzip + JSON archive with format migrations.
//! - [`merge`] -- Folds one solver graph into another.

pub mod attribute;
pub mod behavior;
pub mod builder;
pub mod bundle;
pub mod clipboard;
pub mod geometry;
pub mod id;
pub mod item;
pub mod map;
pub mod memory;
pub mod merge;
pub mod mesh;
pub mod migration;
pub mod query;
pub mod registry;
pub mod remap;
pub mod scene;
pub mod serialize;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
