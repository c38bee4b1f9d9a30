//! Rig configuration: build options, archive settings, capture traversal
//! and an optional type-priority override.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! traversal = "immediate"
//! type_priority = ["solver", "bone", "tissue"]
//!
//! [build]
//! permissive = true
//! interp_maps = "auto"
//!
//! [build.mirror]
//! pattern = "^l_"
//! replacement = "r_"
//! axis = "x"
//!
//! [archive]
//! compression = 9
//! ```

use crate::loader::{DataLoadError, deserialize_file, find_data_file};
use rigcache_core::builder::{BuildOptions, Builder, Traversal};
use rigcache_core::registry::TypeRegistry;
use rigcache_core::remap::Remapper;
use rigcache_core::serialize::ArchiveOptions;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Base name looked up by [`load_config_dir`].
pub const CONFIG_BASE_NAME: &str = "rigcache";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigConfig {
    pub build: BuildOptions,
    pub archive: ArchiveOptions,
    pub traversal: Traversal,
    /// Type tags to build first, in order. Unlisted types keep the
    /// built-in order after them.
    pub type_priority: Option<Vec<String>>,
}

impl RigConfig {
    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), String> {
        if self.archive.compression > 9 {
            return Err(format!(
                "archive.compression must be 0-9, got {}",
                self.archive.compression
            ));
        }
        if let Some(order) = &self.type_priority {
            let mut seen = HashSet::new();
            if let Some(dup) = order.iter().find(|tag| !seen.insert(tag.as_str())) {
                return Err(format!("type_priority lists '{dup}' twice"));
            }
        }
        if let Some(mirror) = &self.build.mirror {
            Remapper::new(&mirror.pattern, &mirror.replacement).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Built-in registry with this configuration's priority override.
    pub fn registry(&self) -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        if let Some(order) = &self.type_priority {
            registry.set_priority(order.as_slice());
        }
        registry
    }

    /// An empty builder using [`Self::registry`] and the archive settings.
    pub fn builder(&self) -> Builder {
        let mut builder = Builder::with_registry(Arc::new(self.registry()));
        builder.archive = self.archive.clone();
        builder
    }
}

/// Load and validate a configuration file. The format follows the
/// extension.
pub fn load_config(path: &Path) -> Result<RigConfig, DataLoadError> {
    let config: RigConfig = deserialize_file(path)?;
    config.validate().map_err(|detail| DataLoadError::Invalid {
        file: path.to_path_buf(),
        detail,
    })?;
    tracing::debug!(path = %path.display(), "loaded rig config");
    Ok(config)
}

/// Load `rigcache.{ron,toml,json}` from `dir`, falling back to defaults
/// when there is none.
pub fn load_config_dir(dir: &Path) -> Result<RigConfig, DataLoadError> {
    match find_data_file(dir, CONFIG_BASE_NAME)? {
        Some(path) => load_config(&path),
        None => Ok(RigConfig::default()),
    }
}
