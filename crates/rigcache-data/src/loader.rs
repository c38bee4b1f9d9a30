//! Config file plumbing: pick the format from the extension, find the one
//! `<base>.{ron,toml,json}` in a directory, and deserialize it.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

/// Why a config file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("no {file}.ron, {file}.toml or {file}.json in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("{file}: extension is not ron, toml or json")]
    UnsupportedFormat { file: PathBuf },

    /// Both files exist; neither is preferred.
    #[error("ambiguous config: both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// Parsed, but failed validation.
    #[error("{file}: invalid config: {detail}")]
    Invalid { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Config file formats, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

pub const EXTENSIONS: [&str; 3] = ["ron", "toml", "json"];

/// Format from the file extension; anything else is rejected.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// The single `{base_name}.<ext>` in `dir`, if any. Two or more is an error.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut present: Vec<PathBuf> = EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{base_name}.{ext}")))
        .filter(|path| path.is_file())
        .collect();
    if present.len() > 1 {
        let b = present.swap_remove(1);
        let a = present.swap_remove(0);
        return Err(DataLoadError::ConflictingFormats { a, b });
    }
    Ok(present.pop())
}

/// [`find_data_file`] for a file that must exist.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Read and deserialize `path` with the format its extension names.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let parse_err = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        level: u32,
    }

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn extension_picks_format() {
        assert_eq!(detect_format(Path::new("rig.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("rig.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("rig.json")).unwrap(), Format::Json);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            detect_format(Path::new("rig.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("rig")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // find_data_file / require_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn lookup_finds_single_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_data_file(dir.path(), "rigcache").unwrap(), None);

        fs::write(dir.path().join("rigcache.toml"), "").unwrap();
        assert_eq!(
            find_data_file(dir.path(), "rigcache").unwrap(),
            Some(dir.path().join("rigcache.toml"))
        );
    }

    #[test]
    fn lookup_refuses_two_formats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rigcache.ron"), "()").unwrap();
        fs::write(dir.path().join("rigcache.json"), "{}").unwrap();
        assert!(matches!(
            find_data_file(dir.path(), "rigcache"),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
    }

    #[test]
    fn required_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let err = require_data_file(dir.path(), "rigcache").unwrap_err();
        assert!(matches!(err, DataLoadError::MissingRequired { ref file, .. } if file == "rigcache"));
    }

    // -----------------------------------------------------------------------
    // deserialize_file
    // -----------------------------------------------------------------------

    #[test]
    fn same_record_in_every_format() {
        let dir = tempfile::tempdir().unwrap();
        let ron_path = dir.path().join("a.ron");
        fs::write(&ron_path, r#"(name: "arm", level: 2)"#).unwrap();
        let json_path = dir.path().join("b.json");
        fs::write(&json_path, r#"{"name": "arm", "level": 2}"#).unwrap();
        let toml_path = dir.path().join("c.toml");
        fs::write(&toml_path, "name = \"arm\"\nlevel = 2\n").unwrap();

        let expected = Sample {
            name: "arm".into(),
            level: 2,
        };
        for path in [ron_path, json_path, toml_path] {
            assert_eq!(deserialize_file::<Sample>(&path).unwrap(), expected);
        }
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            deserialize_file::<Sample>(&path),
            Err(DataLoadError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_message_names_extensions() {
        let e = DataLoadError::MissingRequired {
            file: "rigcache".into(),
            dir: PathBuf::from("/tmp/rigs"),
        };
        assert_eq!(
            e.to_string(),
            "no rigcache.ron, rigcache.toml or rigcache.json in /tmp/rigs"
        );
    }
}
