use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use toml_edit::{DocumentMut, Item, Table, value};
use tracing::info;
use vt_flickr::query::DEFAULT_ENDPOINT;

use crate::config::{ApiConfig, CacheConfig, PipelineSection};

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the config file if it doesn't exist and fills in missing defaults
    Init,
}

impl CmdConfig {
    pub fn run(self, config_file: PathBuf, data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if config_file.exists() {
            fs::read_to_string(&config_file)?
        } else {
            let parent = config_file
                .parent()
                .context("config file has no parent directory")?;
            fs::create_dir_all(parent)?;
            String::new()
        }
        .parse::<DocumentMut>()
        .context("could not parse config file")?;

        match self {
            Self::Init => fill_defaults(&mut doc, data_dir)?,
        }

        info!("writing to config file {config_file:?}");

        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}

/// Adds every missing key with its default value. Existing values are kept.
fn fill_defaults(doc: &mut DocumentMut, data_dir: &Path) -> anyhow::Result<()> {
    let api = ApiConfig::default();
    let api_table = section(doc, "api")?;
    set_default(api_table, "endpoint", value(DEFAULT_ENDPOINT));
    set_default(api_table, "api_key", value(""));
    set_default(api_table, "radius_km", value(api.search.radius_km));
    set_default(api_table, "per_page", value(i64::from(api.search.per_page)));
    set_default(api_table, "safe_search", value(api.search.safe_search));
    set_default(api_table, "timeout_secs", value(api.timeout_secs as i64));

    let cache = CacheConfig::default();
    let cache_table = section(doc, "cache")?;
    set_default(cache_table, "dir", value(path_str(&data_dir.join("cache"))?));
    set_default(cache_table, "memory_bytes", value(cache.memory_bytes as i64));

    let records_table = section(doc, "records")?;
    set_default(
        records_table,
        "path",
        value(path_str(&data_dir.join("records"))?),
    );

    let pipeline = PipelineSection::default();
    let pipeline_table = section(doc, "pipeline")?;
    set_default(pipeline_table, "initial_page", value("first"));
    set_default(
        pipeline_table,
        "download_concurrency",
        value(pipeline.download_concurrency as i64),
    );
    set_default(
        pipeline_table,
        "download_retries",
        value(i64::from(pipeline.download_retries)),
    );
    set_default(
        pipeline_table,
        "retry_backoff_ms",
        value(pipeline.retry_backoff_ms as i64),
    );
    Ok(())
}

fn section<'a>(doc: &'a mut DocumentMut, name: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(name)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .with_context(|| format!("`{name}` in config file is not a table"))
}

fn set_default(table: &mut Table, key: &str, item: Item) {
    if !table.contains_key(key) {
        table.insert(key, item);
    }
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .with_context(|| format!("path {path:?} is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VtConfig;

    #[test]
    fn init_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf").join("config.toml");

        CmdConfig::Init.run(file.clone(), dir.path()).unwrap();

        let config: VtConfig = toml::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(config.cache.dir, Some(dir.path().join("cache")));
        assert_eq!(config.records.path, Some(dir.path().join("records")));
        assert_eq!(config.api.search.per_page, 100);
        assert!(!file.with_extension("tmp").exists());
    }

    #[test]
    fn init_keeps_existing_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "# mine\n[api]\napi_key = \"secret\"\nradius_km = 3.5\n").unwrap();

        CmdConfig::Init.run(file.clone(), dir.path()).unwrap();

        let content = fs::read_to_string(&file).unwrap();
        assert!(content.starts_with("# mine"));
        let config: VtConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.api.search.api_key, "secret");
        assert_eq!(config.api.search.radius_km, 3.5);
        assert_eq!(config.api.timeout_secs, 30);
    }
}
