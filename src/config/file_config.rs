//! Optional TOML configuration file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Raw file contents; everything optional so a partial file merges over CLI
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub catalog_db: Option<String>,
    pub read_pool_size: Option<usize>,
    pub search: Option<SearchFileConfig>,
    pub sync: Option<SyncFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncFileConfig {
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let config: FileConfig = toml::from_str(
            r#"
            catalog_db = "/data/catalog.db"

            [search]
            url = "http://localhost:8108"
            api_key = "xyz"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog_db.as_deref(), Some("/data/catalog.db"));
        let search = config.search.unwrap();
        assert_eq!(search.url.as_deref(), Some("http://localhost:8108"));
        assert_eq!(search.timeout_sec, None);
        assert!(config.sync.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<FileConfig, _> = toml::from_str("no_such_field = 1");
        assert!(result.is_err());
    }
}
