use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tg_compiler::parser::DEFAULT_MAX_RULES_PER_LIST;
use tg_compiler::{CompileOptions, DEFAULT_MAX_RULES_PER_SHARD, DEFAULT_MAX_SHARDS};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_max_rules_per_list")]
    pub max_rules_per_list: usize,
    #[serde(default = "default_max_rules_per_shard")]
    pub max_rules_per_shard: usize,
    #[serde(default = "default_max_shards")]
    pub max_shards: usize,
    #[serde(default = "default_artifact_namespace")]
    pub artifact_namespace: String,
    #[serde(default = "default_whitelist_exception_rules")]
    pub whitelist_exception_rules: bool,

    #[serde(default = "default_reattach_delay_ms")]
    pub reattach_delay_ms: u64,

    #[serde(default = "default_max_tracked_pages")]
    pub max_tracked_pages: usize,
    #[serde(default = "default_estimated_blocked_bytes")]
    pub estimated_blocked_bytes: u64,
}

// Defaults
fn default_data_dir() -> PathBuf {
    PathBuf::from("tabguard-data")
}
fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_rules_per_list() -> usize {
    DEFAULT_MAX_RULES_PER_LIST
}
fn default_max_rules_per_shard() -> usize {
    DEFAULT_MAX_RULES_PER_SHARD
}
fn default_max_shards() -> usize {
    DEFAULT_MAX_SHARDS
}
fn default_artifact_namespace() -> String {
    "shard".to_string()
}
fn default_whitelist_exception_rules() -> bool {
    true
}
fn default_reattach_delay_ms() -> u64 {
    2000
}
fn default_max_tracked_pages() -> usize {
    100
}
fn default_estimated_blocked_bytes() -> u64 {
    20 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_rules_per_list: default_max_rules_per_list(),
            max_rules_per_shard: default_max_rules_per_shard(),
            max_shards: default_max_shards(),
            artifact_namespace: default_artifact_namespace(),
            whitelist_exception_rules: default_whitelist_exception_rules(),
            reattach_delay_ms: default_reattach_delay_ms(),
            max_tracked_pages: default_max_tracked_pages(),
            estimated_blocked_bytes: default_estimated_blocked_bytes(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rules_per_shard == 0 {
            return Err(Error::Config("max_rules_per_shard must be positive".to_string()));
        }
        if self.max_shards == 0 {
            return Err(Error::Config("max_shards must be positive".to_string()));
        }
        if self.artifact_namespace.is_empty() || self.artifact_namespace == "minimal" {
            return Err(Error::Config(format!(
                "artifact_namespace '{}' is reserved or empty",
                self.artifact_namespace
            )));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("filter-cache")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.data_dir.join("statistics.json")
    }

    pub fn filter_lists_path(&self) -> PathBuf {
        self.data_dir.join("filter_lists.json")
    }

    /// Identifiers of the last installed artifact set.
    pub fn installed_artifacts_path(&self) -> PathBuf {
        self.data_dir.join("artifacts.json")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn reattach_delay(&self) -> Duration {
        Duration::from_millis(self.reattach_delay_ms)
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            max_rules_per_list: self.max_rules_per_list,
            whitelist_exception_rules: self.whitelist_exception_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_toml("").expect("defaults");
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.max_rules_per_list, 10_000);
        assert_eq!(config.reattach_delay(), Duration::from_secs(2));
        assert_eq!(config.artifact_namespace, "shard");
    }

    #[test]
    fn overrides_selected_fields() {
        let config = Config::from_toml(
            "data_dir = \"/tmp/tg\"\nmax_rules_per_shard = 25000\nmax_shards = 4\n",
        )
        .expect("parse");
        assert_eq!(config.max_rules_per_shard, 25_000);
        assert_eq!(config.max_shards, 4);
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/tg/settings.json"));
    }

    #[test]
    fn rejects_reserved_namespace() {
        let err = Config::from_toml("artifact_namespace = \"minimal\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_shards() {
        assert!(Config::from_toml("max_shards = 0").is_err());
    }
}
