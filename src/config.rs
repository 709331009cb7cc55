//! YAML configuration
//!
//! ```yaml
//! classifier:
//!   timeout_seconds: 30
//!   ensemble: text-tagger
//!   output_agent: classifier
//! engine:
//!   resync_after_commit: true
//!   classify_on_create: true
//! default_tags: [work, family, politics, animals, wordplay]
//! database: /path/to/tagkeep.db
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use crate::engine::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub timeout_seconds: u64,
    /// Name of the ensemble that produces classifications
    pub ensemble: String,
    /// Agent whose response holds the classification. When unset, the
    /// successful agent whose name sorts last is used.
    pub output_agent: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            ensemble: "text-tagger".to_string(),
            output_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resync_after_commit: bool,
    pub classify_on_create: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resync_after_commit: true,
            classify_on_create: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagkeepConfig {
    pub classifier: ClassifierConfig,
    pub engine: EngineConfig,
    /// Tags created by `seed_default_tags`
    pub default_tags: Vec<String>,
    /// SQLite database path; the platform data directory when unset
    pub database: Option<PathBuf>,
}

impl Default for TagkeepConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            engine: EngineConfig::default(),
            default_tags: ["work", "family", "politics", "animals", "wordplay"]
                .into_iter()
                .map(String::from)
                .collect(),
            database: None,
        }
    }
}

impl TagkeepConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&raw)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            classifier_timeout: Duration::from_secs(self.classifier.timeout_seconds),
            resync_after_commit: self.engine.resync_after_commit,
            classify_on_create: self.engine.classify_on_create,
        }
    }

    /// Configured database path, or `<data_dir>/tagkeep/tagkeep.db`
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_database_path)
    }
}

/// Default database path (~/.local/share/tagkeep/tagkeep.db on Linux)
pub fn default_database_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("tagkeep").join("tagkeep.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = TagkeepConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TagkeepConfig::default());
        assert_eq!(config.engine_options().classifier_timeout, Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = TagkeepConfig::from_yaml(
            "classifier:\n  timeout_seconds: 5\nengine:\n  resync_after_commit: false\ndefault_tags: [jokes]\n",
        )
        .unwrap();
        assert_eq!(config.classifier.timeout_seconds, 5);
        assert_eq!(config.classifier.ensemble, "text-tagger");
        assert_eq!(config.classifier.output_agent, None);
        assert!(!config.engine.resync_after_commit);
        assert!(config.engine.classify_on_create);
        assert_eq!(config.default_tags, vec!["jokes".to_string()]);
    }

    #[test]
    fn output_agent_is_read() {
        let config =
            TagkeepConfig::from_yaml("classifier:\n  output_agent: classifier\n").unwrap();
        assert_eq!(config.classifier.output_agent.as_deref(), Some("classifier"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = TagkeepConfig::from_yaml("classifier: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagkeep.yaml");
        std::fs::write(&path, "database: /tmp/x.db\n").unwrap();
        let config = TagkeepConfig::load(&path).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));

        assert!(matches!(
            TagkeepConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
