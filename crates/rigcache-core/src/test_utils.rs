//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and, through the `test-utils` feature, in the
//! integration test crates.

use crate::attribute::AttrValue;
use crate::id::{EntityId, GEOMETRY, Plug};
use crate::memory::MemoryScene;
use crate::mesh::MeshData;
use crate::scene::{ENABLE_ATTR, Scene};

// ===========================================================================
// Geometry
// ===========================================================================

/// Flat quad grid in the XZ plane: `nx * nz` faces over
/// `(nx + 1) * (nz + 1)` vertices, row-major from `origin`.
pub fn grid_mesh(nx: u32, nz: u32, spacing: f64, origin: [f64; 3]) -> MeshData {
    let mut points = Vec::with_capacity(((nx + 1) * (nz + 1)) as usize);
    for j in 0..=nz {
        for i in 0..=nx {
            points.push([
                origin[0] + f64::from(i) * spacing,
                origin[1],
                origin[2] + f64::from(j) * spacing,
            ]);
        }
    }
    let row = nx + 1;
    let mut polygon_counts = Vec::with_capacity((nx * nz) as usize);
    let mut polygon_connects = Vec::with_capacity((nx * nz * 4) as usize);
    for j in 0..nz {
        for i in 0..nx {
            let v = j * row + i;
            polygon_counts.push(4);
            polygon_connects.extend_from_slice(&[v, v + 1, v + row + 1, v + row]);
        }
    }
    MeshData {
        polygon_counts,
        polygon_connects,
        points,
    }
}

/// `n` weights ramping evenly from 0 to 1.
pub fn ramp(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n).map(|i| i as f64 / (n - 1) as f64).collect()
}

// ===========================================================================
// Wiring helpers
// ===========================================================================

fn id(scene: &MemoryScene, name: &str) -> EntityId {
    scene
        .find(name)
        .unwrap_or_else(|| panic!("fixture entity '{name}' missing"))
}

/// `src.message → dst.attr`
pub fn link(scene: &mut MemoryScene, src: &str, dst: &str, attr: &str) {
    let (s, d) = (id(scene, src), id(scene, dst));
    scene.connect(&Plug::message(s), &Plug::new(d, attr)).unwrap();
}

/// `src.message → dst.attr[index]`
pub fn link_at(scene: &mut MemoryScene, src: &str, dst: &str, attr: &str, index: u32) {
    let (s, d) = (id(scene, src), id(scene, dst));
    scene
        .connect(&Plug::message(s), &Plug::indexed(d, attr, index))
        .unwrap();
}

/// `mesh.message → item.geometry[index]`
pub fn bind_geometry(scene: &mut MemoryScene, mesh: &str, item: &str, index: u32) {
    link_at(scene, mesh, item, GEOMETRY, index);
}

/// Append a deformer to the solver's `inputs[]`.
pub fn attach_to_solver(scene: &mut MemoryScene, item: &str, solver: &str) {
    let s = id(scene, solver);
    let index = scene.next_free_index(s, "inputs");
    link_at(scene, item, solver, "inputs", index);
}

// ===========================================================================
// Rigs
// ===========================================================================

/// Solver root trio: `<prefix>solverTM`, `<prefix>solver`, `<prefix>embedder`.
pub fn solver_roots(scene: &mut MemoryScene, prefix: &str) -> [String; 3] {
    let tm = format!("{prefix}solverTM");
    let solver = format!("{prefix}solver");
    let embedder = format!("{prefix}embedder");

    let tm_id = scene.add_entity("solver_transform", &tm).unwrap();
    scene
        .set_attribute(tm_id, "translate", AttrValue::Double3([0.0; 3]))
        .unwrap();
    let solver_id = scene.add_entity("solver", &solver).unwrap();
    scene
        .set_attributes(
            solver_id,
            [
                (ENABLE_ATTR, AttrValue::Bool(true)),
                ("substeps", AttrValue::Int(1)),
                ("gravity", AttrValue::Double(-9.8)),
            ],
        )
        .unwrap();
    scene.add_entity("embedder", &embedder).unwrap();

    link(scene, &tm, &solver, "transform");
    link(scene, &solver, &embedder, "solver");
    [tm, solver, embedder]
}

/// A small single-arm rig:
///
/// - roots `solverTM → solver → embedder`
/// - meshes `l_arm` (3x3 grid, 9 verts) and `l_bone_mesh` (2x2, 4 verts),
///   both bound to the embedder
/// - `l_arm_tissue` on `l_arm`, `l_bone` on `l_bone_mesh`
/// - `l_arm_attachment` joining the tissue to the bone, with `weights`
///   (9) and `target_weights` (4)
/// - `l_arm_fiber` on the tissue, with `weights` and `end_points` (9 each)
///
/// Deformers feed `solver.inputs[0..4]` in that order. Nothing is selected.
pub fn arm_rig() -> MemoryScene {
    let mut scene = MemoryScene::new();
    solver_roots(&mut scene, "");

    scene
        .create_mesh("l_arm", &grid_mesh(2, 2, 1.0, [0.0; 3]))
        .unwrap();
    scene
        .create_mesh("l_bone_mesh", &grid_mesh(1, 1, 0.5, [0.5, -1.0, 0.5]))
        .unwrap();
    bind_geometry(&mut scene, "l_arm", "embedder", 0);
    bind_geometry(&mut scene, "l_bone_mesh", "embedder", 1);

    let tissue = scene.add_entity("tissue", "l_arm_tissue").unwrap();
    scene
        .set_attribute(tissue, "thickness", AttrValue::Double(0.25))
        .unwrap();
    bind_geometry(&mut scene, "l_arm", "l_arm_tissue", 0);
    attach_to_solver(&mut scene, "l_arm_tissue", "solver");

    scene.add_entity("bone", "l_bone").unwrap();
    bind_geometry(&mut scene, "l_bone_mesh", "l_bone", 0);
    attach_to_solver(&mut scene, "l_bone", "solver");

    let attachment = scene.add_entity("attachment", "l_arm_attachment").unwrap();
    scene
        .set_attributes(
            attachment,
            [
                ("weights", AttrValue::DoubleArray(ramp(9))),
                ("target_weights", AttrValue::DoubleArray(vec![1.0; 4])),
                ("stiffness", AttrValue::Double(10.0)),
            ],
        )
        .unwrap();
    bind_geometry(&mut scene, "l_arm", "l_arm_attachment", 0);
    bind_geometry(&mut scene, "l_bone_mesh", "l_arm_attachment", 1);
    link_at(&mut scene, "l_arm_tissue", "l_arm_attachment", "targets", 0);
    link_at(&mut scene, "l_bone", "l_arm_attachment", "targets", 1);
    attach_to_solver(&mut scene, "l_arm_attachment", "solver");

    let fiber = scene.add_entity("fiber", "l_arm_fiber").unwrap();
    let mut end_points = vec![0.0; 9];
    end_points[0] = 1.0;
    end_points[8] = 1.0;
    scene
        .set_attributes(
            fiber,
            [
                ("weights", AttrValue::DoubleArray(ramp(9))),
                ("end_points", AttrValue::DoubleArray(end_points)),
            ],
        )
        .unwrap();
    bind_geometry(&mut scene, "l_arm", "l_arm_fiber", 0);
    link(&mut scene, "l_arm_tissue", "l_arm_fiber", "tissue");
    attach_to_solver(&mut scene, "l_arm_fiber", "solver");

    scene
}

/// A second, independent solver rig with one tissue, for merge tests.
/// Every name carries `prefix`.
pub fn tissue_rig(scene: &mut MemoryScene, prefix: &str) {
    let [_, solver, embedder] = solver_roots(scene, prefix);
    let mesh = format!("{prefix}body");
    let tissue = format!("{prefix}body_tissue");
    scene
        .create_mesh(&mesh, &grid_mesh(1, 1, 1.0, [0.0; 3]))
        .unwrap();
    bind_geometry(scene, &mesh, &embedder, 0);
    scene.add_entity("tissue", &tissue).unwrap();
    bind_geometry(scene, &mesh, &tissue, 0);
    attach_to_solver(scene, &tissue, &solver);
}

/// Install a test-writer tracing subscriber; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
