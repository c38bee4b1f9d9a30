//! Folding one solver graph into another.
//!
//! A solver graph is rooted at three entities: the solver, its transform
//! (`transform.message → solver.transform`) and its container
//! (`solver.message → embedder.solver`). Merging B into A rewires every
//! connection on B's roots onto A's equivalents, moves B's geometry
//! bindings onto A's container, then deletes B's roots. Both solvers stay
//! disabled while connections move.

use crate::id::{Connection, EntityId, MESSAGE, Plug};
use crate::scene::{Deactivated, Scene, SceneError};

/// Type tag of solver entities.
pub const SOLVER_TYPE: &str = "solver";

/// Destination attribute on the solver fed by its transform.
pub const TRANSFORM_ATTR: &str = "transform";

/// Destination attribute on the container fed by its solver.
pub const CONTAINER_ATTR: &str = "solver";

/// Array attribute on the solver fed by deformers.
pub const INPUTS_ATTR: &str = "inputs";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MergeError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("no entity named '{0}'")]
    NotFound(String),
    #[error("'{name}' is a '{found}', not a solver")]
    NotASolver { name: String, found: String },
    #[error("cannot merge solver '{0}' into itself")]
    SameSolver(String),
}

/// The root entities of one solver graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverRoots {
    pub solver: EntityId,
    pub transform: Option<EntityId>,
    pub container: Option<EntityId>,
}

impl SolverRoots {
    pub fn discover(scene: &dyn Scene, name: &str) -> Result<Self, MergeError> {
        let solver = scene
            .find(name)
            .ok_or_else(|| MergeError::NotFound(name.to_string()))?;
        let found = scene.type_of(solver).unwrap_or_default();
        if found != SOLVER_TYPE {
            return Err(MergeError::NotASolver {
                name: name.to_string(),
                found: found.to_string(),
            });
        }
        let transform = scene
            .incoming(solver, TRANSFORM_ATTR)
            .first()
            .map(|c| c.src.entity);
        let container = scene
            .outgoing(solver, MESSAGE)
            .into_iter()
            .find(|c| c.dst.attr == CONTAINER_ATTR && c.dst.index.is_none())
            .map(|c| c.dst.entity);
        Ok(Self {
            solver,
            transform,
            container,
        })
    }

    /// Existing roots, solver first.
    pub fn ids(&self) -> Vec<EntityId> {
        std::iter::once(self.solver)
            .chain(self.transform)
            .chain(self.container)
            .collect()
    }

    fn contains(&self, id: EntityId) -> bool {
        self.solver == id || self.transform == Some(id) || self.container == Some(id)
    }
}

/// Outcome of one or more merges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Connections moved onto the surviving graph.
    pub rewired: usize,
    /// Connections dropped, as `src -> dst` descriptions.
    pub skipped: Vec<String>,
    /// Names of root entities deleted.
    pub deleted: Vec<String>,
    /// Names of root entities that could not be deleted and were left
    /// behind empty.
    pub retained: Vec<String>,
}

impl MergeReport {
    fn absorb(&mut self, other: MergeReport) {
        self.rewired += other.rewired;
        self.skipped.extend(other.skipped);
        self.deleted.extend(other.deleted);
        self.retained.extend(other.retained);
    }
}

/// Number of deformers feeding a solver.
pub fn dependent_count(scene: &dyn Scene, solver: EntityId) -> usize {
    scene.incoming(solver, INPUTS_ATTR).len()
}

/// Merge the graph rooted at solver `other` into the one rooted at
/// `survivor`.
pub fn merge(
    scene: &mut dyn Scene,
    survivor: &str,
    other: &str,
) -> Result<MergeReport, MergeError> {
    let a = SolverRoots::discover(scene, survivor)?;
    let b = SolverRoots::discover(scene, other)?;
    if a.solver == b.solver {
        return Err(MergeError::SameSolver(survivor.to_string()));
    }

    let names: Vec<(EntityId, String)> = b
        .ids()
        .into_iter()
        .map(|id| (id, scene.describe(id)))
        .collect();

    let mut report = MergeReport::default();
    let mut adopted = Vec::new();
    {
        let mut guard = Deactivated::new(&mut *scene, &[a.solver, b.solver]);
        let scene = &mut *guard;

        rewire_entity(scene, &a, &b, b.solver, a.solver, &mut report);
        match (b.transform, a.transform) {
            (Some(from), Some(to)) => rewire_entity(scene, &a, &b, from, to, &mut report),
            (Some(from), None) => {
                let src = Plug::message(from);
                let dst = Plug::new(a.solver, TRANSFORM_ATTR);
                let old = Connection::new(src.clone(), Plug::new(b.solver, TRANSFORM_ATTR));
                move_connection(scene, old, src, dst, &mut report);
                adopted.push(from);
            }
            (None, _) => {}
        }
        match (b.container, a.container) {
            (Some(from), Some(to)) => rewire_entity(scene, &a, &b, from, to, &mut report),
            (Some(from), None) => {
                let dst = Plug::new(from, CONTAINER_ATTR);
                let old = Connection::new(Plug::message(b.solver), dst.clone());
                move_connection(scene, old, Plug::message(a.solver), dst, &mut report);
                adopted.push(from);
            }
            (None, _) => {}
        }
    }

    // container first so nothing is left pointing at a deleted solver
    for (id, name) in names.into_iter().rev() {
        if adopted.contains(&id) || !scene.is_alive(id) {
            continue;
        }
        match scene.delete_entity(id) {
            Ok(()) => report.deleted.push(name),
            Err(SceneError::ReadOnly(_)) => {
                tracing::warn!(entity = %name, "root is read-only; left behind empty");
                report.retained.push(name);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        survivor,
        other,
        rewired = report.rewired,
        skipped = report.skipped.len(),
        retained = report.retained.len(),
        "solvers merged"
    );
    Ok(report)
}

/// Merge every listed solver into the first, pairwise.
pub fn merge_all<S: AsRef<str>>(
    scene: &mut dyn Scene,
    solvers: &[S],
) -> Result<MergeReport, MergeError> {
    let mut report = MergeReport::default();
    let Some((first, rest)) = solvers.split_first() else {
        return Ok(report);
    };
    for other in rest {
        report.absorb(merge(scene, first.as_ref(), other.as_ref())?);
    }
    Ok(report)
}

/// Move every external connection of `from` onto `to`.
fn rewire_entity(
    scene: &mut dyn Scene,
    a: &SolverRoots,
    b: &SolverRoots,
    from: EntityId,
    to: EntityId,
    report: &mut MergeReport,
) {
    for conn in scene.connections(from) {
        let (src, dst) = if conn.dst.entity == from {
            // internal root wiring disappears with the roots
            if b.contains(conn.src.entity) || a.contains(conn.src.entity) {
                continue;
            }
            let dst = match conn.dst.index {
                Some(_) => {
                    if scene
                        .incoming(to, &conn.dst.attr)
                        .iter()
                        .any(|c| c.src == conn.src)
                    {
                        skip(scene, report, &conn, "duplicate");
                        drop_connection(scene, &conn);
                        continue;
                    }
                    Plug::indexed(to, &conn.dst.attr, scene.next_free_index(to, &conn.dst.attr))
                }
                None => conn.dst.on(to),
            };
            (conn.src.clone(), dst)
        } else {
            if b.contains(conn.dst.entity) || a.contains(conn.dst.entity) {
                continue;
            }
            (conn.src.on(to), conn.dst.clone())
        };

        if scene.is_connected(&src, &dst) {
            skip(scene, report, &conn, "duplicate");
            drop_connection(scene, &conn);
            continue;
        }
        move_connection(scene, conn, src, dst, report);
    }
}

/// Replace `old` with `src → dst`. On failure the old connection is put
/// back where possible and the move is reported as skipped.
fn move_connection(
    scene: &mut dyn Scene,
    old: Connection,
    src: Plug,
    dst: Plug,
    report: &mut MergeReport,
) {
    let result = if dst == old.dst {
        scene
            .disconnect(&old.src, &old.dst)
            .and_then(|()| scene.connect(&src, &dst))
            .inspect_err(|_| {
                if !scene.is_connected(&old.src, &old.dst) {
                    if let Err(e) = scene.connect(&old.src, &old.dst) {
                        tracing::warn!(
                            connection = %describe_connection(&*scene, &old),
                            error = %e,
                            "could not restore connection after failed move"
                        );
                    }
                }
            })
    } else {
        scene
            .connect(&src, &dst)
            .and_then(|()| scene.disconnect(&old.src, &old.dst))
    };
    match result {
        Ok(()) => report.rewired += 1,
        Err(e) => {
            tracing::warn!(error = %e, "reconnection failed; skipping");
            skip(scene, report, &old, "failed");
        }
    }
}

/// Remove a connection that merge leaves behind.
fn drop_connection(scene: &mut dyn Scene, conn: &Connection) {
    if let Err(e) = scene.disconnect(&conn.src, &conn.dst) {
        tracing::warn!(
            connection = %describe_connection(&*scene, conn),
            error = %e,
            "could not remove superseded connection"
        );
    }
}

fn describe_connection(scene: &dyn Scene, conn: &Connection) -> String {
    let describe = |p: &Plug| {
        let entity = scene.describe(p.entity);
        match p.index {
            Some(i) => format!("{entity}.{}[{i}]", p.attr),
            None => format!("{entity}.{}", p.attr),
        }
    };
    format!("{} -> {}", describe(&conn.src), describe(&conn.dst))
}

fn skip(scene: &dyn Scene, report: &mut MergeReport, conn: &Connection, why: &str) {
    let line = format!("{} ({why})", describe_connection(scene, conn));
    tracing::debug!(connection = %line, "connection not moved");
    report.skipped.push(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;
    use crate::id::GEOMETRY;
    use crate::memory::MemoryScene;
    use crate::scene::ENABLE_ATTR;
    use crate::test_utils::{arm_rig, bind_geometry, solver_roots, tissue_rig};

    fn two_rigs() -> MemoryScene {
        let mut scene = arm_rig();
        tissue_rig(&mut scene, "b_");
        scene
    }

    #[test]
    fn discover_finds_all_three_roots() {
        let scene = arm_rig();
        let roots = SolverRoots::discover(&scene, "solver").unwrap();
        assert_eq!(roots.transform, scene.find("solverTM"));
        assert_eq!(roots.container, scene.find("embedder"));
        assert_eq!(roots.ids().len(), 3);
        assert_eq!(
            SolverRoots::discover(&scene, "l_arm_tissue"),
            Err(MergeError::NotASolver {
                name: "l_arm_tissue".into(),
                found: "tissue".into()
            })
        );
    }

    #[test]
    fn merge_conserves_dependents_and_geometry() {
        let mut scene = two_rigs();
        let a = scene.find("solver").unwrap();
        let b = scene.find("b_solver").unwrap();
        let expected = dependent_count(&scene, a) + dependent_count(&scene, b);
        let embedder = scene.find("embedder").unwrap();
        let bindings = scene.incoming(embedder, GEOMETRY).len() + 1;

        let report = merge(&mut scene, "solver", "b_solver").unwrap();
        assert_eq!(dependent_count(&scene, a), expected);
        assert_eq!(scene.incoming(embedder, GEOMETRY).len(), bindings);
        assert_eq!(report.deleted.len(), 3);
        assert!(report.retained.is_empty());
        assert!(scene.find("b_solver").is_none());
        assert!(scene.find("b_solverTM").is_none());
        assert!(scene.find("b_embedder").is_none());

        let tissue = scene.find("b_body_tissue").unwrap();
        assert!(scene
            .outgoing(tissue, MESSAGE)
            .iter()
            .any(|c| c.dst.entity == a && c.dst.attr == INPUTS_ATTR));
        let body = scene.find("b_body").unwrap();
        assert!(scene
            .outgoing(body, MESSAGE)
            .iter()
            .any(|c| c.dst.entity == embedder));
        assert_eq!(
            scene.attribute(a, ENABLE_ATTR).unwrap().value,
            AttrValue::Bool(true)
        );
    }

    #[test]
    fn shared_mesh_binding_is_not_duplicated() {
        let mut scene = two_rigs();
        bind_geometry(&mut scene, "l_arm", "b_embedder", 1);
        let embedder = scene.find("embedder").unwrap();
        let before = scene.incoming(embedder, GEOMETRY).len();
        let report = merge(&mut scene, "solver", "b_solver").unwrap();
        assert_eq!(scene.incoming(embedder, GEOMETRY).len(), before + 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].contains("duplicate"));
        // bound once, and nothing left hanging off the deleted container
        let arm = scene.find("l_arm").unwrap();
        assert!(scene.outgoing(arm, MESSAGE).iter().all(|c| scene.is_alive(c.dst.entity)));
        assert_eq!(
            scene
                .outgoing(arm, MESSAGE)
                .iter()
                .filter(|c| c.dst.entity == embedder)
                .count(),
            1
        );
    }

    #[test]
    fn merge_of_empty_solvers_removes_second() {
        let mut scene = MemoryScene::new();
        solver_roots(&mut scene, "");
        solver_roots(&mut scene, "b_");
        let report = merge(&mut scene, "solver", "b_solver").unwrap();

        let solver = scene.find("solver").unwrap();
        assert_eq!(dependent_count(&scene, solver), 0);
        assert!(scene.find("b_solver").is_none());
        assert_eq!(report.rewired, 0);
        assert!(report.skipped.is_empty());
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(scene.entity_count(), 3);
        assert_eq!(
            scene.attribute(solver, ENABLE_ATTR).unwrap().value,
            AttrValue::Bool(true)
        );
    }

    #[test]
    fn read_only_roots_are_retained() {
        let mut scene = two_rigs();
        let tm = scene.find("b_solverTM").unwrap();
        scene.set_read_only(tm, true).unwrap();
        let report = merge(&mut scene, "solver", "b_solver").unwrap();
        assert_eq!(report.retained, vec!["b_solverTM".to_string()]);
        assert!(scene.find("b_solverTM").is_some());
        assert!(scene.connections(tm).is_empty());
    }

    #[test]
    fn missing_transform_is_adopted() {
        let mut scene = two_rigs();
        let tm = scene.find("solverTM").unwrap();
        scene.delete_entity(tm).unwrap();
        merge(&mut scene, "solver", "b_solver").unwrap();
        let adopted = scene.find("b_solverTM").unwrap();
        let solver = scene.find("solver").unwrap();
        assert!(scene.is_connected(
            &Plug::message(adopted),
            &Plug::new(solver, TRANSFORM_ATTR)
        ));
    }

    #[test]
    fn merge_all_folds_into_first() {
        let mut scene = two_rigs();
        tissue_rig(&mut scene, "c_");
        let report = merge_all(&mut scene, &["solver", "b_solver", "c_solver"]).unwrap();
        assert_eq!(report.deleted.len(), 6);
        let solver = scene.find("solver").unwrap();
        assert_eq!(dependent_count(&scene, solver), 6);
        assert_eq!(merge_all::<&str>(&mut scene, &[]).unwrap(), MergeReport::default());
    }

    #[test]
    fn self_merge_is_rejected() {
        let mut scene = arm_rig();
        assert_eq!(
            merge(&mut scene, "solver", "solver"),
            Err(MergeError::SameSolver("solver".into()))
        );
    }
}
