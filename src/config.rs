use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub profiles: ProfilesConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfilesConfig {
    /// Directory holding mapping-profile TOML files.
    pub dir: PathBuf,
}

/// A remote catalog to harvest from. Read-only to the pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Base URL of the catalog API, e.g. `https://discover.example.org/api`.
    pub endpoint: String,
    /// Name of the environment variable holding the API token, if the
    /// source requires one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Listing page size.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Mapping profile name; must resolve in the profile registry.
    pub profile: String,
}

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Bounded worker count for the fetch and import stages.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be > 0");
    }

    if config.import.concurrency == 0 {
        anyhow::bail!("import.concurrency must be > 0");
    }

    for (name, source) in &config.sources {
        if source.endpoint.trim().is_empty() {
            anyhow::bail!("sources.{}.endpoint must not be empty", name);
        }
        if source.page_size == 0 {
            anyhow::bail!("sources.{}.page_size must be > 0", name);
        }
        if source.profile.trim().is_empty() {
            anyhow::bail!("sources.{}.profile must not be empty", name);
        }
    }

    if config.target.endpoint.trim().is_empty() {
        anyhow::bail!("target.endpoint must not be empty");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn parse_full_config() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "./data/harvest.sqlite"

[profiles]
dir = "./profiles"

[target]
endpoint = "https://catalog.example.org/api"
api_key_env = "TARGET_API_KEY"

[retry]
max_attempts = 5
base_delay_ms = 250

[import]
concurrency = 4

[sources.discover]
endpoint = "https://discover.example.org/api"
page_size = 50
profile = "datavic-dcat"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.import.concurrency, 4);
        let source = &config.sources["discover"];
        assert_eq!(source.page_size, 50);
        assert_eq!(source.profile, "datavic-dcat");
        assert!(source.api_key_env.is_none());
    }

    #[test]
    fn defaults_applied() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "./data/harvest.sqlite"

[profiles]
dir = "./profiles"

[target]
endpoint = "https://catalog.example.org/api"

[sources.discover]
endpoint = "https://discover.example.org/api"
profile = "datavic-dcat"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.import.concurrency, 8);
        assert_eq!(config.sources["discover"].page_size, 100);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "./data/harvest.sqlite"

[profiles]
dir = "./profiles"

[target]
endpoint = "https://catalog.example.org/api"

[import]
concurrency = 0
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_empty_source_endpoint() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "./data/harvest.sqlite"

[profiles]
dir = "./profiles"

[target]
endpoint = "https://catalog.example.org/api"

[sources.discover]
endpoint = ""
profile = "datavic-dcat"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
