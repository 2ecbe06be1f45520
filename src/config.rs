//! TOML configuration.
//!
//! Every section is optional; missing keys take the defaults shown below.
//!
//! ```toml
//! [index]
//! backend = "memory"        # or "key_value"
//! initial_import = false
//!
//! [admission]
//! leader_types = ["am", "im"]
//! document_types = ["Książki", "Audiobooki", "E-booki"]
//!
//! [[items]]
//! field_tag = "856"
//! institution_code = "POLONA"
//! url = { kind = "subfield", code = "u" }
//!
//! [worker]
//! channel_capacity = 64
//! shards = 1
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```

use crate::cluster::items::ItemConversionTable;
use crate::error::{FrbrError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrbrizerConfig {
    /// Match index backend
    pub index: IndexConfig,
    /// Record admission filters
    pub admission: AdmissionConfig,
    /// Holdings conversion rules
    pub items: ItemConversionTable,
    /// Broker worker
    pub worker: WorkerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl FrbrizerConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// `Config` on malformed TOML, unknown keys or invalid values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FrbrizerConfig = toml::from_str(content)
            .map_err(|err| FrbrError::Config(format!("Failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// `IoError` when the file cannot be read, otherwise as
    /// [`FrbrizerConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|err| FrbrError::Config(format!("{}: {err}", path.display())))
    }

    fn validate(&self) -> Result<()> {
        if self.worker.shards == 0 {
            return Err(FrbrError::Config("worker.shards must be at least 1".to_string()));
        }
        if self.worker.channel_capacity == 0 {
            return Err(FrbrError::Config(
                "worker.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.admission.leader_types.iter().any(|t| t.chars().count() != 2) {
            return Err(FrbrError::Config(
                "admission.leader_types entries must be two characters (leader 06-07)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which [`crate::index::MatchIndex`] implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// In-process maps
    #[default]
    Memory,
    /// Key-value store client
    KeyValue,
}

/// `[index]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Backend
    pub backend: IndexBackend,
    /// Skip the re-delivery check; every raw record is assumed new
    pub initial_import: bool,
}

/// `[admission]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Accepted leader 06-07 values
    pub leader_types: Vec<String>,
    /// Accepted 380 $a values
    pub document_types: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            leader_types: vec!["am".to_string(), "im".to_string()],
            document_types: vec![
                "Książki".to_string(),
                "Audiobooki".to_string(),
                "E-booki".to_string(),
            ],
        }
    }
}

/// `[worker]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Bounded delivery channel capacity (messages)
    pub channel_capacity: usize,
    /// Number of title shards
    pub shards: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            channel_capacity: 64,
            shards: 1,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::items::ItemUrl;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = FrbrizerConfig::from_toml_str("").unwrap();
        assert_eq!(config, FrbrizerConfig::default());
        assert_eq!(config.items.rules().count(), 2);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = FrbrizerConfig::from_toml_str(
            r#"
            [index]
            backend = "key_value"

            [[items]]
            field_tag = "856"
            institution_code = "POLONA"
            url = { kind = "subfield", code = "u" }

            [worker]
            shards = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.index.backend, IndexBackend::KeyValue);
        assert!(!config.index.initial_import);
        assert_eq!(config.worker.shards, 4);
        assert_eq!(config.worker.channel_capacity, 64);
        let rules: Vec<_> = config.items.rules().collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].url, ItemUrl::Subfield { code: 'u' });
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(FrbrizerConfig::from_toml_str("[worker]\nshards = 0").is_err());
        assert!(FrbrizerConfig::from_toml_str("[admission]\nleader_types = [\"a\"]").is_err());
        assert!(FrbrizerConfig::from_toml_str("[index]\nbogus = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nfilter = \"frbrizer=debug\"\njson = true").unwrap();
        let config = FrbrizerConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.filter, "frbrizer=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_missing_file() {
        let result = FrbrizerConfig::load(Path::new("/nonexistent/frbrizer.toml"));
        assert!(matches!(result, Err(FrbrError::IoError(_))));
    }
}
