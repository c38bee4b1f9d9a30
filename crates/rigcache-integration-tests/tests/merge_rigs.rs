//! Integration test: Merging solver graphs
//!
//! Two rigs are built from archives into one scene, each with its own
//! solver roots, then folded into a single solver. Every deformer and
//! geometry binding must survive the merge, and a fresh capture of the
//! surviving solver must contain both rigs.

use rigcache_core::builder::{BuildOptions, Builder, Root, Traversal};
use rigcache_core::memory::MemoryScene;
use rigcache_core::merge::{self, MergeError, SolverRoots};
use rigcache_core::scene::{ENABLE_ATTR, Scene};
use rigcache_core::test_utils::{arm_rig, init_tracing, tissue_rig};

#[test]
fn archived_rigs_merge_into_one_solver() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    // archive the arm rig and a second body rig from separate scenes
    let arm_path = dir.path().join("arm.rig");
    let mut arm = Builder::new();
    arm.retrieve(&arm_rig(), Root::Named("solver".into()), Traversal::Closure);
    arm.write(&arm_path).unwrap();

    let body_path = dir.path().join("body.rig");
    let mut body_scene = MemoryScene::new();
    tissue_rig(&mut body_scene, "b_");
    let mut body = Builder::new();
    body.retrieve(&body_scene, Root::Named("b_solver".into()), Traversal::Closure);
    body.write(&body_path).unwrap();

    // rebuild both into one empty scene
    let mut scene = MemoryScene::new();
    for path in [&arm_path, &body_path] {
        let mut builder = Builder::new();
        builder.read(path).unwrap();
        builder.build(&mut scene, &BuildOptions::default()).unwrap();
    }
    let solver = scene.find("solver").unwrap();
    let b_solver = scene.find("b_solver").unwrap();
    let expected = merge::dependent_count(&scene, solver) + merge::dependent_count(&scene, b_solver);
    let entities = scene.entity_count();

    let report = merge::merge(&mut scene, "solver", "b_solver").unwrap();
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.deleted.len(), 3);
    assert_eq!(scene.entity_count(), entities - 3);
    assert_eq!(merge::dependent_count(&scene, solver), expected);
    assert_eq!(
        scene.attribute(solver, ENABLE_ATTR).and_then(|a| a.value.as_bool()),
        Some(true)
    );

    let roots = SolverRoots::discover(&scene, "solver").unwrap();
    assert_eq!(roots.ids().len(), 3);

    let mut merged = Builder::new();
    merged.retrieve(&scene, Root::Named("solver".into()), Traversal::Closure);
    for name in ["l_arm_fiber", "b_body_tissue", "embedder"] {
        assert!(merged.bundle().contains(name), "{name} not captured");
    }
    assert!(!merged.bundle().contains("b_solver"));
}

#[test]
fn merge_rejects_non_solvers() {
    let mut scene = arm_rig();
    assert!(matches!(
        merge::merge(&mut scene, "solver", "l_bone"),
        Err(MergeError::NotASolver { .. })
    ));
    assert_eq!(
        merge::merge(&mut scene, "solver", "ghost"),
        Err(MergeError::NotFound("ghost".into()))
    );
}
