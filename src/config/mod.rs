mod file_config;

pub use file_config::{FileConfig, SearchFileConfig, SyncFileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::index_sync::SyncQueueConfig;

/// CLI arguments that participate in config resolution. Mirrors the fields a
/// TOML file can override.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub catalog_db: Option<PathBuf>,
    pub read_pool_size: usize,
    pub search_url: Option<String>,
    pub search_api_key: Option<String>,
    pub search_timeout_sec: u64,
    pub sync_max_retries: u32,
    pub sync_retry_base_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub url: String,
    pub api_key: String,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog_db: PathBuf,
    pub read_pool_size: usize,
    /// None means no engine configured; tooling falls back to an in-process
    /// index.
    pub search: Option<SearchSettings>,
    pub sync: SyncQueueConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let catalog_db = file
            .catalog_db
            .map(PathBuf::from)
            .or_else(|| cli.catalog_db.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("catalog_db must be specified via --catalog-db or in config file")
            })?;

        let read_pool_size = file.read_pool_size.unwrap_or(cli.read_pool_size);
        if read_pool_size == 0 {
            bail!("read_pool_size must be at least 1");
        }

        let search_file = file.search.unwrap_or_default();
        let search_url = search_file.url.or_else(|| cli.search_url.clone());
        let search = search_url.map(|url| SearchSettings {
            url,
            api_key: search_file
                .api_key
                .or_else(|| cli.search_api_key.clone())
                .unwrap_or_default(),
            timeout_sec: search_file.timeout_sec.unwrap_or(cli.search_timeout_sec),
        });

        let sync_file = file.sync.unwrap_or_default();
        let sync = SyncQueueConfig {
            max_retries: sync_file.max_retries.unwrap_or(cli.sync_max_retries),
            retry_base_delay_ms: sync_file
                .retry_base_delay_ms
                .unwrap_or(cli.sync_retry_base_delay_ms),
        };

        Ok(AppConfig {
            catalog_db,
            read_pool_size,
            search,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliConfig {
        CliConfig {
            catalog_db: Some(PathBuf::from("/cli/catalog.db")),
            read_pool_size: 4,
            search_url: None,
            search_api_key: None,
            search_timeout_sec: 5,
            sync_max_retries: 3,
            sync_retry_base_delay_ms: 200,
        }
    }

    #[test]
    fn file_overrides_cli() {
        let file: FileConfig = toml::from_str(
            r#"
            catalog_db = "/file/catalog.db"

            [sync]
            max_retries = 7
            "#,
        )
        .unwrap();
        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        assert_eq!(config.catalog_db, PathBuf::from("/file/catalog.db"));
        assert_eq!(config.sync.max_retries, 7);
        assert_eq!(config.sync.retry_base_delay_ms, 200);
        assert!(config.search.is_none());
    }

    #[test]
    fn missing_catalog_db_is_an_error() {
        let mut cli = cli();
        cli.catalog_db = None;
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn search_settings_merge() {
        let mut cli = cli();
        cli.search_url = Some("http://cli:8108".to_string());
        cli.search_api_key = Some("cli-key".to_string());
        let file: FileConfig = toml::from_str(
            r#"
            [search]
            url = "http://file:8108"
            "#,
        )
        .unwrap();
        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        let search = config.search.unwrap();
        assert_eq!(search.url, "http://file:8108");
        assert_eq!(search.api_key, "cli-key");
        assert_eq!(search.timeout_sec, 5);
    }
}
