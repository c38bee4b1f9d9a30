pub mod config;
pub mod loader;

pub use config::{CONFIG_BASE_NAME, RigConfig, load_config, load_config_dir};
pub use loader::{DataLoadError, Format};
