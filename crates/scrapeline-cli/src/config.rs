//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use scrapeline_core::PipelineConfig;

/// Global configuration for scrapeline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub store: StoreConfig,
}

/// Where pages come from; exactly one of `dir` / `url` is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory of `page-NNNN.json` files
    pub dir: Option<PathBuf>,
    /// Paginated JSON endpoint
    pub url: Option<String>,
    pub page_param: String,
    pub items_field: String,
    pub identity_field: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: None,
            url: None,
            page_param: "page".to_string(),
            items_field: "items".to_string(),
            identity_field: "url".to_string(),
            token: std::env::var("SCRAPELINE_TOKEN").ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./scrapeline-data"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./scrapeline.toml (current directory)
    /// 2. ~/.config/scrapeline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("scrapeline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "scrapeline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeline_core::DuplicatePolicy;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.store.dir, PathBuf::from("./scrapeline-data"));
        assert_eq!(config.pipeline.batch_size, 50);
        assert!(config.source.dir.is_none());
        assert_eq!(config.source.identity_field, "url");
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("SCRAPELINE_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${SCRAPELINE_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("SCRAPELINE_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[pipeline]
batch_size = 25
flush_interval_ms = 0
duplicate_policy = "merge"

[source]
url = "https://listing.example/api"
items_field = "results"

[store]
dir = "/tmp/scrapeline"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.batch_size, 25);
        assert_eq!(config.pipeline.flush_interval(), None);
        assert_eq!(config.pipeline.duplicate_policy, DuplicatePolicy::MergeFields);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.source.url.as_deref(), Some("https://listing.example/api"));
        assert_eq!(config.source.items_field, "results");
        assert_eq!(config.source.page_param, "page");
        assert_eq!(config.store.dir, PathBuf::from("/tmp/scrapeline"));
    }

    #[test]
    fn token_from_env_reference() {
        std::env::set_var("SCRAPELINE_TEST_TOKEN", "s3cret");
        let config: Config = toml::from_str(
            r#"
[source]
token = "${SCRAPELINE_TEST_TOKEN}"
"#,
        )
        .unwrap();
        assert_eq!(config.source.token.as_deref(), Some("s3cret"));
        std::env::remove_var("SCRAPELINE_TEST_TOKEN");
    }

    #[test]
    fn unknown_policy_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
[pipeline]
duplicate_policy = "upsert"
"#,
        );
        assert!(result.is_err());
    }
}
