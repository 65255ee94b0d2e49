use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use vt_flickr::{DownloadPolicy, SearchConfig};
use vt_pipeline::{InitialPage, PipelineConfig};

/// Replaces `api.api_key` when set.
pub const API_KEY_ENV: &str = "VT_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub records: RecordsConfig,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(flatten)]
    pub search: SearchConfig,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disk tier root. Defaults to `<data dir>/cache`.
    pub dir: Option<PathBuf>,
    pub memory_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            memory_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// Directory holding the record database. Defaults to `<data dir>/records`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub initial_page: InitialPage,
    pub download_concurrency: usize,
    pub download_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let policy = DownloadPolicy::default();
        Self {
            initial_page: InitialPage::default(),
            download_concurrency: policy.concurrency,
            download_retries: policy.retries,
            retry_backoff_ms: policy.backoff.as_millis() as u64,
        }
    }
}

impl PipelineSection {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            initial_page: self.initial_page,
        }
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        DownloadPolicy {
            concurrency: self.download_concurrency.max(1),
            retries: self.download_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl VtConfig {
    /// Parses a config file, then applies environment overrides.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let mut config: VtConfig = toml::from_str(content)?;
        config.apply_env(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    fn apply_env(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.api.search.api_key = key;
        }
    }

    pub fn cache_dir(&self, data_dir: &std::path::Path) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| data_dir.join("cache"))
    }

    pub fn records_dir(&self, data_dir: &std::path::Path) -> PathBuf {
        self.records
            .path
            .clone()
            .unwrap_or_else(|| data_dir.join("records"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: VtConfig = toml::from_str("").unwrap();
        assert_eq!(config, VtConfig::default());
        assert_eq!(config.api.search.per_page, 100);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.pipeline.initial_page, InitialPage::First);
    }

    #[test]
    fn sections_are_read() {
        let config: VtConfig = toml::from_str(
            r#"
            [api]
            api_key = "abc"
            radius_km = 5.0
            timeout_secs = 10

            [cache]
            dir = "/tmp/vt-cache"

            [pipeline]
            initial_page = "last"
            download_retries = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.api.search.api_key, "abc");
        assert_eq!(config.api.search.radius_km, 5.0);
        assert_eq!(config.api.search.safe_search, "1");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/vt-cache")));
        assert_eq!(config.cache.memory_bytes, 64 * 1024 * 1024);
        assert_eq!(config.pipeline.pipeline().initial_page, InitialPage::Last);

        let policy = config.pipeline.download_policy();
        assert_eq!(policy.retries, 2);
        assert_eq!(policy.concurrency, 8);
    }

    #[test]
    fn env_key_overrides_file() {
        let mut config: VtConfig = toml::from_str("[api]\napi_key = \"file\"").unwrap();
        config.apply_env(Some(String::new()));
        assert_eq!(config.api.search.api_key, "file");
        config.apply_env(Some("env".into()));
        assert_eq!(config.api.search.api_key, "env");
    }

    #[test]
    fn data_paths_default_under_data_dir() {
        let config = VtConfig::default();
        let data = std::path::Path::new("/data/vt");
        assert_eq!(config.cache_dir(data), data.join("cache"));
        assert_eq!(config.records_dir(data), data.join("records"));
    }
}
