//! Configuration types and loading for the beads system.
//!
//! The main entry point is [`BeadsConfig`], which represents the contents of
//! `.beads/config.yaml`. Configuration is loaded with [`load_config`] and
//! saved with [`save_config`]. Fields mirror the recognized keys table: the
//! storage engine's own `config`/`metadata` tables are a separate, lower
//! tier of the same resolution chain and are read/written through
//! `Storage::get_config`/`set_config`, not through this file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The configuration file contained invalid YAML.
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The `.beads/` directory was not found.
    #[error("no .beads directory found (run 'bd init' first)")]
    BeadsDirNotFound,

    /// A configuration value was invalid.
    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// A description of why the value is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Import-pipeline configuration section (`import.*` keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// How to handle a dependency edge whose target is missing post-import.
    /// One of `allow` / `skip` / `strict` / `resurrect`.
    #[serde(default = "default_orphan_handling", rename = "orphan-handling")]
    pub orphan_handling: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            orphan_handling: default_orphan_handling(),
        }
    }
}

fn default_orphan_handling() -> String {
    "allow".to_string()
}

/// Export-pipeline configuration section (`export.*` keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// How export reacts to per-issue failures: `strict` / `best-effort` /
    /// `partial` / `required-core`.
    #[serde(default = "default_export_error_policy", rename = "error-policy")]
    pub error_policy: String,

    /// Number of retries for transient failures under the `partial` policy.
    #[serde(default = "default_retry_attempts", rename = "retry-attempts")]
    pub retry_attempts: u32,

    /// Initial retry backoff in milliseconds; doubles on each attempt.
    #[serde(default = "default_retry_backoff_ms", rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// Whether to emit a `.manifest.json` sibling alongside the export.
    #[serde(default, rename = "write-manifest")]
    pub write_manifest: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            error_policy: default_export_error_policy(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            write_manifest: false,
        }
    }
}

fn default_export_error_policy() -> String {
    "strict".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

/// Background auto-export configuration section (`auto_export.*` keys).
///
/// Separate from [`ExportConfig`] because the background path defaults to a
/// more forgiving error policy than a user-initiated `export`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoExportConfig {
    /// Error policy override for background export. Defaults to
    /// `best-effort`, unlike the `strict` default for foreground export.
    #[serde(default = "default_auto_export_error_policy", rename = "error-policy")]
    pub error_policy: String,
}

impl Default for AutoExportConfig {
    fn default() -> Self {
        Self {
            error_policy: default_auto_export_error_policy(),
        }
    }
}

fn default_auto_export_error_policy() -> String {
    "best-effort".to_string()
}

// ---------------------------------------------------------------------------
// Main config struct
// ---------------------------------------------------------------------------

/// The full beads configuration, corresponding to `.beads/config.yaml`.
///
/// All fields use `serde` defaults so that a partially-specified YAML file
/// will be deserialized correctly with sensible default values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BeadsConfig {
    /// Issue ID prefix.
    #[serde(default = "default_issue_prefix", rename = "issue-prefix")]
    pub issue_prefix: String,

    /// Initial priority assigned to new issues.
    #[serde(default = "default_priority", rename = "default-priority")]
    pub default_priority: i32,

    /// Initial issue type assigned to new issues.
    #[serde(default = "default_type", rename = "default-type")]
    pub default_type: String,

    /// Birthday-paradox collision threshold used to size generated IDs.
    #[serde(default = "default_max_collision_prob", rename = "max-collision-prob")]
    pub max_collision_prob: f64,

    /// Initial short-hash length for generated IDs.
    #[serde(default = "default_min_hash_length", rename = "min-hash-length")]
    pub min_hash_length: usize,

    /// Growth cap on hash length before falling back to a longer ID shape.
    #[serde(default = "default_max_hash_length", rename = "max-hash-length")]
    pub max_hash_length: usize,

    /// Import-pipeline configuration.
    #[serde(default)]
    pub import: ImportConfig,

    /// Export-pipeline configuration.
    #[serde(default)]
    pub export: ExportConfig,

    /// Background auto-export configuration.
    #[serde(default)]
    pub auto_export: AutoExportConfig,
}

fn default_issue_prefix() -> String {
    "bd".to_string()
}

fn default_priority() -> i32 {
    2
}

fn default_type() -> String {
    "task".to_string()
}

fn default_max_collision_prob() -> f64 {
    beads_core::idgen::adaptive_defaults::MAX_COLLISION_PROB
}

fn default_min_hash_length() -> usize {
    beads_core::idgen::adaptive_defaults::MIN_LENGTH
}

fn default_max_hash_length() -> usize {
    beads_core::idgen::adaptive_defaults::MAX_LENGTH
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load configuration from `.beads/config.yaml` inside the given `.beads/` directory.
///
/// If the file does not exist, a default [`BeadsConfig`] is returned.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] if the file exists but cannot be read,
/// or [`ConfigError::ParseError`] if it contains invalid YAML.
pub fn load_config(beads_dir: &Path) -> Result<BeadsConfig> {
    let config_path = beads_dir.join("config.yaml");

    if !config_path.exists() {
        return Ok(BeadsConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)?;

    // An empty file is valid and yields default config.
    if content.trim().is_empty() {
        return Ok(BeadsConfig::default());
    }

    let config: BeadsConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to `.beads/config.yaml` inside the given `.beads/` directory.
///
/// The directory is created if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] on I/O failure or [`ConfigError::ParseError`]
/// if serialization fails.
pub fn save_config(beads_dir: &Path, config: &BeadsConfig) -> Result<()> {
    std::fs::create_dir_all(beads_dir)?;

    let config_path = beads_dir.join("config.yaml");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let cfg = BeadsConfig::default();
        assert_eq!(cfg.issue_prefix, "bd");
        assert_eq!(cfg.default_priority, 2);
        assert_eq!(cfg.default_type, "task");
        assert_eq!(cfg.import.orphan_handling, "allow");
        assert_eq!(cfg.export.error_policy, "strict");
        assert_eq!(cfg.auto_export.error_policy, "best-effort");
    }

    #[test]
    fn test_load_missing_config_returns_default() {
        let dir = PathBuf::from("/nonexistent/path/.beads");
        let cfg = load_config(&dir).unwrap();
        assert_eq!(cfg.issue_prefix, "bd");
    }

    #[test]
    fn test_roundtrip_config() {
        let dir = tempfile::tempdir().unwrap();
        let beads_dir = dir.path().join(".beads");

        let mut cfg = BeadsConfig::default();
        cfg.issue_prefix = "proj".to_string();
        cfg.export.write_manifest = true;

        save_config(&beads_dir, &cfg).unwrap();
        let loaded = load_config(&beads_dir).unwrap();

        assert_eq!(loaded.issue_prefix, "proj");
        assert!(loaded.export.write_manifest);
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = "issue-prefix: proj\n";
        let cfg: BeadsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.issue_prefix, "proj");
        // Everything else should be default
        assert_eq!(cfg.max_hash_length, 8);
        assert_eq!(cfg.export.retry_attempts, 3);
    }

    #[test]
    fn test_export_retry_backoff_default() {
        let cfg = BeadsConfig::default();
        assert_eq!(cfg.export.retry_backoff_ms, 100);
    }
}
