//! Archive format migration framework.
//!
//! Provides a registry of migration functions that transform an archive
//! document from one format version to the next, so archives written by
//! older tools keep loading when the format changes.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Errors that can occur during migration.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MigrationError {
    #[error("no migration path from version {from} to version {to}")]
    NoMigrationPath { from: u32, to: u32 },
    #[error("migration from version {from} to version {to} failed: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },
}

/// A function that transforms an archive document from one version to the
/// next.
pub type MigrationFn = fn(Value) -> Result<Value, MigrationError>;

/// Registry of migration functions keyed by source version.
///
/// Each registered function migrates a document from `version N` to
/// `version N+1`. The registry chains these steps to migrate across
/// multiple versions.
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, MigrationFn>,
}

impl MigrationRegistry {
    /// Create an empty migration registry.
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// The chain every archive read goes through.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(1, owners_to_parameter_lists);
        registry
    }

    /// Register a migration function from `from_version` to `from_version + 1`.
    pub fn register(&mut self, from_version: u32, migrate: MigrationFn) {
        self.migrations.insert(from_version, migrate);
    }

    /// Check whether a complete migration path exists from `from` to `to`.
    pub fn can_migrate(&self, from: u32, to: u32) -> bool {
        if from >= to {
            return from == to;
        }
        (from..to).all(|v| self.migrations.contains_key(&v))
    }

    /// Migrate a document from version `from` to version `to`.
    ///
    /// Returns the document unchanged if `from == to`.
    pub fn migrate(&self, doc: Value, from: u32, to: u32) -> Result<Value, MigrationError> {
        if from == to {
            return Ok(doc);
        }
        if from > to {
            return Err(MigrationError::NoMigrationPath { from, to });
        }

        let mut current = doc;
        for version in from..to {
            let migrate_fn = self
                .migrations
                .get(&version)
                .ok_or(MigrationError::NoMigrationPath { from, to })?;
            tracing::debug!(from = version, to = version + 1, "migrating archive");
            current = migrate_fn(current)?;
        }
        Ok(current)
    }

    /// Number of registered migration steps.
    pub fn step_count(&self) -> usize {
        self.migrations.len()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// 1 → 2
// ---------------------------------------------------------------------------

/// Format 1 recorded ownership on the parameters (`owner` on each map,
/// `owners` on each mesh) instead of parameter lists on the items.
fn owners_to_parameter_lists(mut doc: Value) -> Result<Value, MigrationError> {
    let fail = |reason: &str| MigrationError::MigrationFailed {
        from: 1,
        to: 2,
        reason: reason.to_string(),
    };

    // item name → (meshes, maps), in discovery order
    let mut lists: BTreeMap<String, (Vec<String>, Vec<String>)> = BTreeMap::new();
    fn push_unique(list: &mut Vec<String>, name: &str) {
        if !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }

    if let Some(meshes) = doc
        .pointer_mut("/parameters/meshes")
        .and_then(Value::as_array_mut)
    {
        for mesh in meshes {
            let obj = mesh.as_object_mut().ok_or_else(|| fail("mesh entry is not an object"))?;
            let name = str_field(obj, "name").ok_or_else(|| fail("mesh without a name"))?;
            if let Some(Value::Array(owners)) = obj.remove("owners") {
                for owner in owners.iter().filter_map(Value::as_str) {
                    push_unique(&mut lists.entry(owner.to_string()).or_default().0, &name);
                }
            }
        }
    }

    if let Some(maps) = doc
        .pointer_mut("/parameters/maps")
        .and_then(Value::as_array_mut)
    {
        for map in maps {
            let obj = map.as_object_mut().ok_or_else(|| fail("map entry is not an object"))?;
            let name = str_field(obj, "name").ok_or_else(|| fail("map without a name"))?;
            let mesh = str_field(obj, "mesh").ok_or_else(|| fail("map without a mesh"))?;
            if let Some(Value::String(owner)) = obj.remove("owner") {
                let entry = lists.entry(owner).or_default();
                push_unique(&mut entry.0, &mesh);
                push_unique(&mut entry.1, &name);
            }
        }
    }

    let records = doc
        .get_mut("node_data")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| fail("node_data is missing"))?;
    for record in records {
        let obj = record.as_object_mut().ok_or_else(|| fail("item record is not an object"))?;
        let Some(name) = str_field(obj, "name") else {
            continue;
        };
        let Some((meshes, maps)) = lists.remove(&name) else {
            continue;
        };
        let mut params = Map::new();
        if !maps.is_empty() {
            params.insert("map".into(), Value::from(maps));
        }
        if !meshes.is_empty() {
            params.insert("mesh".into(), Value::from(meshes));
        }
        obj.insert("parameters".into(), Value::Object(params));
    }

    if !lists.is_empty() {
        tracing::warn!(owners = ?lists.keys().collect::<Vec<_>>(), "format 1 parameters owned by unknown items");
    }
    if let Some(meta) = doc.get_mut("meta").and_then(Value::as_object_mut) {
        meta.insert("file_version".into(), Value::from(2));
    }
    Ok(doc)
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn tag_a(mut doc: Value) -> Result<Value, MigrationError> {
        doc["a"] = json!(true);
        Ok(doc)
    }

    fn tag_b(mut doc: Value) -> Result<Value, MigrationError> {
        doc["b"] = json!(doc["a"].clone());
        Ok(doc)
    }

    fn failing_migration(_doc: Value) -> Result<Value, MigrationError> {
        Err(MigrationError::MigrationFailed {
            from: 0,
            to: 1,
            reason: "test failure".into(),
        })
    }

    fn v1_doc() -> Value {
        json!({
            "meta": {"tool_version": "0.2.1"},
            "node_data": [
                {"type": "tissue", "name": "l_arm_tissue", "_class": "TissueNode"},
                {"type": "fiber", "name": "l_arm_fiber", "_class": "FiberNode"},
                {"type": "solver", "name": "solver", "_class": "SolverNode"}
            ],
            "parameters": {
                "maps": [
                    {"name": "l_arm_fiber.weights", "mesh": "l_arm", "values": [0.0], "owner": "l_arm_fiber"}
                ],
                "meshes": [
                    {"name": "l_arm", "polygon_counts": [], "polygon_connects": [], "points": [],
                     "owners": ["l_arm_tissue", "l_arm_fiber"]}
                ]
            }
        })
    }

    // -----------------------------------------------------------------------
    // Registry plumbing
    // -----------------------------------------------------------------------
    #[test]
    fn registry_new_is_empty() {
        let reg = MigrationRegistry::new();
        assert_eq!(reg.step_count(), 0);
        assert_eq!(MigrationRegistry::default().step_count(), 1);
    }

    #[test]
    fn can_migrate_checks_for_gaps() {
        let mut reg = MigrationRegistry::new();
        assert!(reg.can_migrate(2, 2));
        reg.register(1, tag_a);
        reg.register(3, tag_a);
        assert!(reg.can_migrate(1, 2));
        assert!(!reg.can_migrate(1, 4));
        assert!(!reg.can_migrate(3, 1));
    }

    #[test]
    fn migrate_chains_in_order() {
        let mut reg = MigrationRegistry::new();
        reg.register(1, tag_a);
        reg.register(2, tag_b);
        let out = reg.migrate(json!({}), 1, 3).unwrap();
        assert_eq!(out, json!({"a": true, "b": true}));
    }

    #[test]
    fn migrate_same_version_returns_original() {
        let reg = MigrationRegistry::new();
        let doc = json!({"x": 1});
        assert_eq!(reg.migrate(doc.clone(), 5, 5).unwrap(), doc);
    }

    #[test]
    fn migrate_no_path_error() {
        let reg = MigrationRegistry::new();
        assert_eq!(
            reg.migrate(json!({}), 1, 3),
            Err(MigrationError::NoMigrationPath { from: 1, to: 3 })
        );
        assert_eq!(
            reg.migrate(json!({}), 3, 1),
            Err(MigrationError::NoMigrationPath { from: 3, to: 1 })
        );
    }

    #[test]
    fn migration_fn_can_fail() {
        let mut reg = MigrationRegistry::new();
        reg.register(0, failing_migration);
        match reg.migrate(json!({}), 0, 1) {
            Err(MigrationError::MigrationFailed { reason, .. }) => assert_eq!(reason, "test failure"),
            other => panic!("expected MigrationFailed, got {other:?}"),
        }
    }

    #[test]
    fn migration_error_display() {
        let no_path = MigrationError::NoMigrationPath { from: 1, to: 5 };
        assert_eq!(
            no_path.to_string(),
            "no migration path from version 1 to version 5"
        );
    }

    // -----------------------------------------------------------------------
    // 1 → 2
    // -----------------------------------------------------------------------
    #[test]
    fn owners_become_parameter_lists() {
        let out = MigrationRegistry::standard().migrate(v1_doc(), 1, 2).unwrap();
        let tissue = &out["node_data"][0];
        assert_eq!(tissue["parameters"]["mesh"], json!(["l_arm"]));
        assert!(tissue["parameters"].get("map").is_none());

        let fiber = &out["node_data"][1];
        assert_eq!(fiber["parameters"]["mesh"], json!(["l_arm"]));
        assert_eq!(fiber["parameters"]["map"], json!(["l_arm_fiber.weights"]));

        assert!(out["node_data"][2].get("parameters").is_none());
        assert!(out["parameters"]["maps"][0].get("owner").is_none());
        assert!(out["parameters"]["meshes"][0].get("owners").is_none());
        assert_eq!(out["meta"]["file_version"], 2);
    }

    #[test]
    fn v1_without_node_data_fails() {
        let result = MigrationRegistry::standard().migrate(json!({"meta": {}}), 1, 2);
        assert!(matches!(result, Err(MigrationError::MigrationFailed { from: 1, to: 2, .. })));
    }
}
