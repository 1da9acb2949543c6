//! Configuration for the schema compiler
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schemac.toml)
//! - Environment variables (SCHEMAC_*)
//!
//! ## Example config file (schemac.toml):
//! ```toml
//! [compile]
//! inline_refs = 8        # or "always" / "never"
//! retain_source = false
//! all_errors = true
//!
//! [sources]
//! paths = ["./schemas"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::resolve::InlineRefs;

/// Main configuration for the schemac CLI and library embedders
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemacConfig {
    /// Compile settings
    #[serde(default)]
    pub compile: CompileConfig,

    /// Schema source locations
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Compile settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Inline-vs-compile policy for resolved references
    #[serde(default)]
    pub inline_refs: InlineRefs,

    /// Keep the emitted pseudo-source on compiled validators
    #[serde(default)]
    pub retain_source: bool,

    /// Collect every validation error instead of stopping at the first
    #[serde(default = "default_true")]
    pub all_errors: bool,
}

/// Schema source locations preloaded by the CLI
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourcesConfig {
    /// Directories scanned for *.json schema files
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            inline_refs: InlineRefs::default(),
            retain_source: false,
            all_errors: true,
        }
    }
}

impl SchemacConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["schemac.toml", ".schemac.toml", "config/schemac.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "schemac") {
            let xdg_config = config_dir.config_dir().join("schemac.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMAC_*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMAC")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchemacConfig::default();
        assert!(config.compile.all_errors);
        assert!(!config.compile.retain_source);
        assert_eq!(config.compile.inline_refs, InlineRefs::Limit(8));
    }

    #[test]
    fn test_serialize_config() {
        let config = SchemacConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[compile]"));
        assert!(toml_str.contains("inline_refs"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemac.toml");

        let mut config = SchemacConfig::default();
        config.compile.inline_refs = InlineRefs::Never;
        config.compile.retain_source = true;
        config.save(path.to_str().unwrap()).unwrap();

        let reloaded = SchemacConfig::load_from(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(reloaded.compile.inline_refs, InlineRefs::Never);
        assert!(reloaded.compile.retain_source);
    }
}
