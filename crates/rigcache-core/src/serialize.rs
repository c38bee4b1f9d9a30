//! Portable archive format for bundles.
//!
//! An archive is a gzip stream holding one JSON document:
//!
//! ```text
//! { "meta":       { file_version, tool_version, timestamp, host },
//!   "node_data":  [ item record, ... ],          // bundle order
//!   "parameters": { "maps": [...], "meshes": [...] } }
//! ```
//!
//! Links are written as target names only. Reading validates the
//! container, resolves the file version (explicit, or inferred from the
//! writing tool's version), runs the migration chain up to
//! [`FORMAT_VERSION`], instantiates each record through the type registry
//! and finally runs the bundle's reference restoration pass.

use crate::behavior::ItemError;
use crate::bundle::{Bundle, ParameterStore};
use crate::migration::{MigrationError, MigrationRegistry};
use crate::registry::TypeRegistry;
use crate::version::{Version, VersionError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::Path;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current archive format version. Increment when the document layout
/// changes and register a migration for the old one.
pub const FORMAT_VERSION: u32 = 2;

/// First two bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Tools older than this wrote format 1 and did not record a file version.
pub const FORMAT_2_SINCE: Version = Version::new(0, 3, 0);

/// Record key naming the behaviour class that wrote the record.
pub const CLASS_KEY: &str = "_class";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a gzip archive")]
    NotGzip,
    #[error("archive document is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("archive document has no '{0}'")]
    MissingField(&'static str),
    #[error("archive tool version is malformed: {0}")]
    Version(#[from] VersionError),
    #[error("archive from future format {found} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion { found: u32 },
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("record {index} ('{name}') could not be read: {source}")]
    Record {
        index: usize,
        name: String,
        #[source]
        source: ItemError,
    },
}

// ---------------------------------------------------------------------------
// Options and metadata
// ---------------------------------------------------------------------------

/// Write-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// gzip level, 0 (store) to 9 (best). Larger values are clamped.
    pub compression: u32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self { compression: 6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub application: String,
    pub os: String,
    pub arch: String,
}

impl HostInfo {
    pub fn local(application: &str) -> Self {
        Self {
            application: application.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    /// Absent in format 1 archives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_version: Option<u32>,
    pub tool_version: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,
}

impl ArchiveMeta {
    /// Format version of the document, inferring it from the tool version
    /// when the archive does not say.
    pub fn resolve_file_version(&self) -> Result<u32, VersionError> {
        let tool: Version = self.tool_version.parse()?;
        Ok(match self.file_version {
            Some(v) => v,
            None if tool < FORMAT_2_SINCE => 1,
            None => FORMAT_VERSION,
        })
    }
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

/// Build the archive document for a bundle.
pub fn to_document(
    bundle: &Bundle,
    registry: &TypeRegistry,
    host: &str,
) -> Result<Value, ArchiveError> {
    let meta = ArchiveMeta {
        file_version: Some(FORMAT_VERSION),
        tool_version: Version::current().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        host: Some(HostInfo::local(host)),
    };

    let mut records = Vec::with_capacity(bundle.len());
    for item in bundle.iter() {
        let mut record = serde_json::to_value(item)?;
        if let Value::Object(fields) = &mut record {
            let class = registry.behavior(&item.type_tag).class_name();
            fields.insert(CLASS_KEY.into(), Value::from(class));
        }
        records.push(record);
    }

    Ok(serde_json::json!({
        "meta": meta,
        "node_data": records,
        "parameters": bundle.parameters,
    }))
}

/// Serialize a bundle into gzip-compressed archive bytes.
pub fn to_bytes(
    bundle: &Bundle,
    registry: &TypeRegistry,
    host: &str,
    options: &ArchiveOptions,
) -> Result<Vec<u8>, ArchiveError> {
    let doc = to_document(bundle, registry, host)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(options.compression.min(9)));
    serde_json::to_writer(&mut encoder, &doc)?;
    let bytes = encoder.finish()?;
    tracing::info!(items = bundle.len(), bytes = bytes.len(), "archive encoded");
    Ok(bytes)
}

pub fn write_archive(
    path: &Path,
    bundle: &Bundle,
    registry: &TypeRegistry,
    host: &str,
    options: &ArchiveOptions,
) -> Result<(), ArchiveError> {
    let bytes = to_bytes(bundle, registry, host, options)?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(&bytes)?;
    tracing::info!(path = %path.display(), "archive written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// Decompress and parse archive bytes without interpreting the document.
pub fn decode_document(data: &[u8]) -> Result<Value, ArchiveError> {
    if data.len() < GZIP_MAGIC.len() || data[..2] != GZIP_MAGIC {
        return Err(ArchiveError::NotGzip);
    }
    let mut json = Vec::new();
    GzDecoder::new(data).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Read just the metadata block of an archive.
pub fn peek_meta(data: &[u8]) -> Result<ArchiveMeta, ArchiveError> {
    let mut doc = decode_document(data)?;
    let meta = doc.get_mut("meta").map(Value::take).ok_or(ArchiveError::MissingField("meta"))?;
    Ok(serde_json::from_value(meta)?)
}

/// Turn a parsed document of any supported format into a bundle.
pub fn from_document(doc: Value, registry: &TypeRegistry) -> Result<Bundle, ArchiveError> {
    let meta: ArchiveMeta = doc
        .get("meta")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or(ArchiveError::MissingField("meta"))?;
    let file_version = meta.resolve_file_version()?;
    if file_version > FORMAT_VERSION {
        return Err(ArchiveError::FutureVersion {
            found: file_version,
        });
    }

    let mut doc = MigrationRegistry::standard().migrate(doc, file_version, FORMAT_VERSION)?;

    let records = match doc.get_mut("node_data").map(Value::take) {
        Some(Value::Array(records)) => records,
        Some(_) | None => return Err(ArchiveError::MissingField("node_data")),
    };
    let parameters: ParameterStore = match doc.get_mut("parameters").map(Value::take) {
        Some(value) => serde_json::from_value(value)?,
        None => ParameterStore::default(),
    };

    let mut items = Vec::with_capacity(records.len());
    for (index, mut record) in records.into_iter().enumerate() {
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tag = record_tag(&record, registry);
        if let (Some(tag), Value::Object(fields)) = (&tag, &mut record) {
            fields.remove(CLASS_KEY);
            fields.insert("type".into(), Value::from(tag.as_str()));
        }
        let behavior = registry.behavior(tag.as_deref().unwrap_or_default());
        let item = behavior
            .deserialize(record)
            .map_err(|source| ArchiveError::Record {
                index,
                name: name.clone(),
                source,
            })?;
        items.push(item);
    }

    let mut bundle = Bundle::from_items(items);
    bundle.parameters = parameters;
    let dropped = bundle.restore_references();
    tracing::info!(
        items = bundle.len(),
        file_version,
        tool_version = %meta.tool_version,
        dropped,
        "archive read"
    );
    Ok(bundle)
}

/// Type tag of a record: its `type` field, or the tag registered for its
/// `_class` when the type is missing.
fn record_tag(record: &Value, registry: &TypeRegistry) -> Option<String> {
    record
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            record
                .get(CLASS_KEY)
                .and_then(Value::as_str)
                .and_then(|class| registry.tag_for_class(class))
                .map(str::to_string)
        })
}

pub fn from_bytes(data: &[u8], registry: &TypeRegistry) -> Result<Bundle, ArchiveError> {
    from_document(decode_document(data)?, registry)
}

pub fn read_archive(path: &Path, registry: &TypeRegistry) -> Result<Bundle, ArchiveError> {
    let data = std::fs::read(path)?;
    from_bytes(&data, registry)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;
    use crate::item::{Link, ParamKind, SceneItem};
    use crate::map::WeightMap;
    use crate::mesh::MeshSnapshot;
    use crate::test_utils::grid_mesh;
    use serde_json::json;

    fn sample_bundle() -> Bundle {
        let mut solver = SceneItem::new("solver", "solver");
        solver
            .attributes
            .insert("substeps".into(), crate::attribute::Attribute::new(AttrValue::Int(3)));
        let mut tissue = SceneItem::new("tissue", "l_arm_tissue");
        tissue.set_link("solver", Link::single("solver"));
        tissue.add_param(ParamKind::Mesh, "l_arm");
        let mut fiber = SceneItem::new("fiber", "l_arm_fiber");
        fiber.set_link("tissue", Link::single("l_arm_tissue"));
        fiber.add_param(ParamKind::Mesh, "l_arm");
        fiber.add_param(ParamKind::Map, "l_arm_fiber.weights");

        let mut bundle = Bundle::from_items([solver, tissue, fiber]);
        bundle
            .parameters
            .upsert_mesh(MeshSnapshot::new("l_arm", grid_mesh(2, 2, 1.0, [0.0; 3])));
        bundle.parameters.upsert_map(WeightMap::new(
            "l_arm_fiber",
            "weights",
            "l_arm",
            vec![0.5; 9],
        ));
        bundle.restore_references();
        bundle
    }

    fn gzip(doc: &Value) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, doc).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn bytes_round_trip() {
        let registry = TypeRegistry::default();
        let bundle = sample_bundle();
        let bytes = to_bytes(&bundle, &registry, "test", &ArchiveOptions::default()).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);
        let back = from_bytes(&bytes, &registry).unwrap();
        assert_eq!(back, bundle);
        assert_eq!(back.names(), vec!["solver", "l_arm_tissue", "l_arm_fiber"]);
    }

    #[test]
    fn document_layout() {
        let registry = TypeRegistry::default();
        let doc = to_document(&sample_bundle(), &registry, "studio").unwrap();
        assert_eq!(doc["meta"]["file_version"], FORMAT_VERSION);
        assert_eq!(doc["meta"]["host"]["application"], "studio");
        assert!(chrono::DateTime::parse_from_rfc3339(doc["meta"]["timestamp"].as_str().unwrap()).is_ok());
        assert_eq!(doc["node_data"][1]["_class"], "TissueNode");
        assert_eq!(doc["node_data"][1]["relationships"]["solver"], "solver");
        assert_eq!(doc["parameters"]["maps"][0]["mesh"], "l_arm");
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json.gz");
        let registry = TypeRegistry::default();
        let bundle = sample_bundle();
        write_archive(&path, &bundle, &registry, "test", &ArchiveOptions { compression: 42 }).unwrap();
        assert_eq!(read_archive(&path, &registry).unwrap(), bundle);
    }

    #[test]
    fn rejects_non_gzip() {
        let registry = TypeRegistry::default();
        assert!(matches!(from_bytes(b"{}", &registry), Err(ArchiveError::NotGzip)));
        assert!(matches!(from_bytes(&[0x1f], &registry), Err(ArchiveError::NotGzip)));
    }

    #[test]
    fn malformed_tool_version_fails_before_migration() {
        let doc = json!({"meta": {"tool_version": "1"}, "node_data": []});
        let err = from_bytes(&gzip(&doc), &TypeRegistry::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Version(VersionError::MissingMinor(_))));
    }

    #[test]
    fn future_format_is_rejected() {
        let doc = json!({"meta": {"tool_version": "9.0.0", "file_version": FORMAT_VERSION + 1}, "node_data": []});
        let err = from_bytes(&gzip(&doc), &TypeRegistry::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::FutureVersion { found } if found == FORMAT_VERSION + 1));
    }

    #[test]
    fn format_version_is_inferred_from_tool() {
        let old = ArchiveMeta {
            file_version: None,
            tool_version: "0.2.9-beta".into(),
            timestamp: String::new(),
            host: None,
        };
        assert_eq!(old.resolve_file_version(), Ok(1));
        let new = ArchiveMeta {
            tool_version: "0.3.0".into(),
            ..old.clone()
        };
        assert_eq!(new.resolve_file_version(), Ok(FORMAT_VERSION));
    }

    #[test]
    fn format_1_archive_is_migrated() {
        let doc = json!({
            "meta": {"tool_version": "0.2.4"},
            "node_data": [
                {"type": "solver", "name": "solver"},
                {"_class": "FiberNode", "name": "l_arm_fiber",
                 "relationships": {"solver": "solver", "tissue": "gone"}}
            ],
            "parameters": {
                "maps": [{"name": "l_arm_fiber.weights", "mesh": "l_arm", "values": [1.0], "owner": "l_arm_fiber"}],
                "meshes": [{"name": "l_arm", "polygon_counts": [3], "polygon_connects": [0, 1, 2],
                            "points": [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
                            "owners": ["l_arm_fiber"]}]
            }
        });
        let bundle = from_bytes(&gzip(&doc), &TypeRegistry::default()).unwrap();
        let fiber = bundle.get("l_arm_fiber").unwrap();
        assert_eq!(fiber.type_tag, "fiber");
        assert_eq!(fiber.params(ParamKind::Map), ["l_arm_fiber.weights"]);
        assert_eq!(fiber.params(ParamKind::Mesh), ["l_arm"]);
        // unresolvable names are dropped from the field
        assert!(fiber.link("tissue").is_none_or(Link::is_empty));
        assert_eq!(fiber.link("solver").map(Link::names), Some(vec!["solver"]));
    }

    #[test]
    fn unknown_types_read_as_generic() {
        let doc = json!({
            "meta": {"tool_version": "0.4.0", "file_version": 2},
            "node_data": [{"type": "lightRig", "name": "key", "_class": "LightNode"}]
        });
        let bundle = from_bytes(&gzip(&doc), &TypeRegistry::default()).unwrap();
        assert_eq!(bundle.get("key").map(|i| i.type_tag.as_str()), Some("lightRig"));
        assert!(bundle.parameters.maps().is_empty());
    }

    #[test]
    fn bad_record_reports_its_position() {
        let doc = json!({
            "meta": {"tool_version": "0.4.0"},
            "node_data": [{"type": "solver", "name": "s"}, {"type": "tissue", "name": 5}]
        });
        let err = from_bytes(&gzip(&doc), &TypeRegistry::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Record { index: 1, .. }));
    }

    #[test]
    fn peek_meta_reads_header_only() {
        let registry = TypeRegistry::default();
        let bytes = to_bytes(&sample_bundle(), &registry, "studio", &ArchiveOptions::default()).unwrap();
        let meta = peek_meta(&bytes).unwrap();
        assert_eq!(meta.file_version, Some(FORMAT_VERSION));
        assert_eq!(meta.tool_version, Version::current().to_string());
    }
}
