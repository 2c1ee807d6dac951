//! Configuration System
//!
//! Loads the search engine connection, cache and maintenance settings plus
//! the list of managed logical indexes from a TOML file, with environment
//! variable overrides on top.

use crate::client::SearchClientConfig;
use crate::index::FieldMigration;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

/// Search engine connection
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_reindex_poll_interval")]
    pub reindex_poll_interval_ms: u64,
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_reindex_poll_interval() -> u64 {
    2_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            reindex_poll_interval_ms: default_reindex_poll_interval(),
        }
    }
}

impl SearchConfig {
    pub fn client_config(&self) -> SearchClientConfig {
        SearchClientConfig {
            base_url: self.url.clone(),
            request_timeout_ms: self.request_timeout_ms,
            max_retries: self.max_retries,
            reindex_poll_interval_ms: self.reindex_poll_interval_ms,
        }
    }
}

/// Alias existence cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_scope")]
    pub scope: String,
}

fn default_true() -> bool {
    true
}

fn default_cache_scope() -> String {
    crate::cache::ALIAS_SCOPE.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: default_cache_scope(),
        }
    }
}

/// Scheduled maintenance
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval")]
    pub interval_minutes: u64,

    /// Run retention and reindex retries as part of each pass
    #[serde(default = "default_true")]
    pub include_optional_tasks: bool,
}

fn default_maintenance_interval() -> u64 {
    60
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_maintenance_interval(),
            include_optional_tasks: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

/// How a logical index is laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Versioned,
    Daily,
    Monthly,
}

/// One managed logical index
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub name: String,

    pub version: u32,

    #[serde(default)]
    pub kind: IndexKind,

    /// strftime format for bucket dates; defaults per granularity
    pub date_format: Option<String>,

    pub max_index_age_days: Option<u32>,

    /// Defaults to on whenever `max_index_age_days` is set
    pub discard_expired_indexes: Option<bool>,

    #[serde(default = "default_true")]
    pub discard_indexes_on_reindex: bool,

    pub timestamp_field: Option<String>,

    #[serde(default)]
    pub aliases: Vec<AliasConfig>,

    /// Forwarded to the engine as-is
    pub settings: Option<Value>,

    pub mappings: Option<Value>,

    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AliasConfig {
    pub name: String,
    pub max_age_days: Option<u32>,
}

/// A migration step, either a raw script or a field helper
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptConfig {
    Custom { version: u32, script: String },
    Rename { version: u32, rename: RenameConfig },
    Remove { version: u32, remove: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameConfig {
    pub from: String,
    pub to: String,
    #[serde(default = "default_true")]
    pub remove_original: bool,
}

impl ScriptConfig {
    pub fn version(&self) -> u32 {
        match self {
            ScriptConfig::Custom { version, .. }
            | ScriptConfig::Rename { version, .. }
            | ScriptConfig::Remove { version, .. } => *version,
        }
    }

    /// Script source registered with the planner
    pub fn body(&self) -> String {
        match self {
            ScriptConfig::Custom { script, .. } => script.clone(),
            ScriptConfig::Rename { rename, .. } => FieldMigration::Rename {
                from: rename.from.clone(),
                to: rename.to.clone(),
                remove_original: rename.remove_original,
            }
            .script(),
            ScriptConfig::Remove { remove, .. } => FieldMigration::Remove {
                field: remove.clone(),
            }
            .script(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("strata").join("config.toml")),
            Some(PathBuf::from("/etc/strata/config.toml")),
            Some(PathBuf::from("./strata.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject index definitions that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();

        for index in &self.indexes {
            if !seen.insert(index.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "index '{}' is defined more than once",
                    index.name
                )));
            }
            if index.version == 0 {
                return Err(ConfigError::Invalid(format!(
                    "index '{}': versions start at 1",
                    index.name
                )));
            }
            if let Some(script) = index.scripts.iter().find(|s| s.version() > index.version) {
                return Err(ConfigError::Invalid(format!(
                    "index '{}': script for version {} is above the index version {}",
                    index.name,
                    script.version(),
                    index.version
                )));
            }
        }

        Ok(())
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name == name)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STRATA_SEARCH_URL") {
            self.search.url = url;
        }

        if let Ok(enabled) = std::env::var("STRATA_CACHE_ENABLED") {
            if let Ok(enabled) = enabled.parse() {
                self.cache.enabled = enabled;
            }
        }

        if let Ok(level) = std::env::var("STRATA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Strata Configuration
#
# Environment variables override these settings:
# - STRATA_SEARCH_URL
# - STRATA_CACHE_ENABLED
# - STRATA_LOG_LEVEL
# - STRATA_LOG_FORMAT

[search]
# Search engine base URL
url = "http://localhost:9200"

# Per-request timeout (ms)
request_timeout_ms = 30000

# Attempts per request before giving up
max_retries = 3

# How often to poll a running reindex task (ms)
reindex_poll_interval_ms = 2000

[cache]
# Remember which bucket aliases exist
enabled = true
scope = "alias"

[maintenance]
# Minutes between maintenance passes
interval_minutes = 60

# Also delete expired buckets and retry pending reindexes
include_optional_tasks = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/strata/strata.log"

# A plain versioned index
[[indexes]]
name = "orders"
version = 2
scripts = [
    { version = 2, rename = { from = "customer", to = "customerId" } },
]

# A daily index kept for 30 days
[[indexes]]
name = "events"
version = 1
kind = "daily"
max_index_age_days = 30
timestamp_field = "createdUtc"
aliases = [
    { name = "events-today", max_age_days = 1 },
    { name = "events-last-week", max_age_days = 7 },
]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config_parses() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.search.url, "http://localhost:9200");
        assert_eq!(config.maintenance.interval_minutes, 60);
        assert_eq!(config.indexes.len(), 2);

        let events = config.index("events").unwrap();
        assert_eq!(events.kind, IndexKind::Daily);
        assert_eq!(events.max_index_age_days, Some(30));
        assert_eq!(events.aliases[1].max_age_days, Some(7));

        let orders = config.index("orders").unwrap();
        assert_eq!(orders.kind, IndexKind::Versioned);
        assert!(orders.discard_indexes_on_reindex);
        assert!(orders.scripts[0].body().contains("customerId"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = Config::load(file.path()).unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.scope, "alias");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.indexes.is_empty());
        assert_eq!(config.search.client_config().max_retries, 3);
    }

    #[test]
    fn test_script_forms() {
        let file = write_config(
            r#"
[[indexes]]
name = "logs"
version = 4
kind = "monthly"
settings = { number_of_shards = 2 }
scripts = [
    { version = 2, script = "ctx._source.a = 1" },
    { version = 3, remove = "temp" },
    { version = 4, rename = { from = "x", to = "y", remove_original = false } },
]
"#,
        );
        let config = Config::load(file.path()).unwrap();
        let logs = config.index("logs").unwrap();

        assert_eq!(logs.kind, IndexKind::Monthly);
        assert_eq!(logs.settings, Some(serde_json::json!({"number_of_shards": 2})));
        let versions: Vec<u32> = logs.scripts.iter().map(ScriptConfig::version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
        assert_eq!(logs.scripts[0].body(), "ctx._source.a = 1");
        assert!(logs.scripts[1].body().contains("remove('temp')"));
        assert!(!logs.scripts[2].body().contains("remove("));
    }

    #[test]
    fn test_validation() {
        let duplicate = write_config(
            r#"
[[indexes]]
name = "a"
version = 1

[[indexes]]
name = "a"
version = 2
"#,
        );
        assert!(matches!(
            Config::load(duplicate.path()),
            Err(ConfigError::Invalid(_))
        ));

        let zero = write_config("[[indexes]]\nname = \"a\"\nversion = 0\n");
        assert!(matches!(Config::load(zero.path()), Err(ConfigError::Invalid(_))));

        let ahead = write_config(
            "[[indexes]]\nname = \"a\"\nversion = 1\nscripts = [{ version = 2, remove = \"x\" }]\n",
        );
        assert!(matches!(Config::load(ahead.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let missing = Config::load(Path::new("/nonexistent/strata.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let broken = write_config("[search\nurl = ");
        assert!(matches!(
            Config::load(broken.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
