use std::path::Path;
use std::time::Duration;

use curator_core::SurvivorPolicy;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Top-level configuration, read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub storage: StorageConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file, or `:memory:`.
    pub path: String,
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "curator.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub survivor_policy: SurvivorPolicy,
    /// Refuse to write the survivor if its row version moved since load.
    pub verify_survivor_version: bool,
    pub record_audit: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            survivor_policy: SurvivorPolicy::Oldest,
            verify_survivor_version: true,
            record_audit: true,
        }
    }
}

impl CuratorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string(self).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = CuratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CuratorConfig::default());
        assert_eq!(config.storage.path, "curator.db");
        assert_eq!(config.storage.busy_timeout(), Duration::from_secs(5));
        assert!(config.merge.verify_survivor_version);
        assert!(config.merge.record_audit);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CuratorConfig::from_toml_str(
            r#"
            [storage]
            path = ":memory:"

            [merge]
            survivor_policy = "newest"
            record_audit = false
            "#,
        )
        .unwrap();
        assert!(config.storage.is_in_memory());
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert_eq!(config.merge.survivor_policy, SurvivorPolicy::Newest);
        assert!(config.merge.verify_survivor_version);
        assert!(!config.merge.record_audit);
    }

    #[test]
    fn bad_policy_is_a_config_error() {
        let err = CuratorConfig::from_toml_str("[merge]\nsurvivor_policy = \"loudest\"\n")
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curator.toml");
        let mut config = CuratorConfig::default();
        config.storage.busy_timeout_ms = 250;
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(CuratorConfig::load(&path).unwrap(), config);
        assert!(matches!(
            CuratorConfig::load(dir.path().join("missing.toml")),
            Err(EngineError::Config(_))
        ));
    }
}
