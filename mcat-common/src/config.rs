//! Engine configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Explicit path argument (highest priority)
//! 2. `MCAT_CONFIG` environment variable
//! 3. Platform config file (`<config dir>/mcat/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: the engine logs a warning and runs on
//! defaults. A file that exists but does not parse is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::vocab::ProtectedGroups;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MCAT_CONFIG";

/// Metadata a merge copies from the target cluster onto moved tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedField {
    Tags,
    Scales,
    Bpm,
    Licensing,
}

/// Rules the catalog engine applies to every mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogRules {
    /// Tag groups feeding the four virtual key components
    pub protected_groups: ProtectedGroups,
    /// Value reseeded into a group emptied by a toggle
    pub unknown_sentinel: String,
    /// Fields copied onto tracks moved by a merge
    pub cluster_shared: Vec<SharedField>,
    /// Appended to the source name when a split is given no name
    pub split_suffix: String,
}

impl Default for CatalogRules {
    fn default() -> Self {
        Self {
            protected_groups: ProtectedGroups::default(),
            unknown_sentinel: "unk".to_string(),
            cluster_shared: vec![
                SharedField::Tags,
                SharedField::Scales,
                SharedField::Bpm,
                SharedField::Licensing,
            ],
            split_suffix: " (split)".to_string(),
        }
    }
}

impl CatalogRules {
    pub fn validate(&self) -> Result<()> {
        self.protected_groups.validate()?;
        if self.unknown_sentinel.trim().is_empty() {
            return Err(Error::Config("unknown_sentinel cannot be blank".to_string()));
        }
        Ok(())
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Top-level configuration (`config.toml`)
///
/// ```toml
/// [catalog]
/// unknown_sentinel = "unk"
/// cluster_shared = ["tags", "bpm"]
/// split_suffix = " (split)"
///
/// [catalog.protected_groups]
/// mood = "moods"
/// context = "usable_in_contexts"
/// instrument = "instruments"
/// style = "styles"
///
/// [events]
/// capacity = 100
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub catalog: CatalogRules,
    pub events: EventsConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the resolved config path, falling back to defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = resolve_config_path(explicit_path) else {
            warn!("No configuration file location available, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Config file path by priority: explicit, environment, platform default
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: explicit argument
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    dirs::config_dir().map(|d| d.join("mcat").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.catalog.unknown_sentinel, "unk");
        assert_eq!(config.catalog.split_suffix, " (split)");
        assert_eq!(config.catalog.cluster_shared.len(), 4);
        assert_eq!(config.events.capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [catalog]
            cluster_shared = ["tags", "bpm"]

            [catalog.protected_groups]
            mood = "feelings"
            context = "usable_in_contexts"
            instrument = "instruments"
            style = "styles"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.protected_groups.mood.as_str(), "feelings");
        assert_eq!(
            config.catalog.cluster_shared,
            vec![SharedField::Tags, SharedField::Bpm]
        );
        assert_eq!(config.catalog.unknown_sentinel, "unk");
        assert_eq!(config.events.capacity, 100);
    }

    #[test]
    fn test_duplicate_protected_groups_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [catalog.protected_groups]
            mood = "moods"
            context = "moods"
            instrument = "instruments"
            style = "styles"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_blank_group_name_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [catalog.protected_groups]
            mood = "  "
            context = "usable_in_contexts"
            instrument = "instruments"
            style = "styles"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TomlParse(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = EngineConfig::from_toml_str("[events]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/explicit-mcat.toml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }
}
