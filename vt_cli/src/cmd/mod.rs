use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use vt_cache_local::LocalStore;
use vt_cache_memory::MemoryStore;
use vt_core::{FetchError, ImageCache, Pin, RecordEvent, RecordStore};
use vt_flickr::{Downloader, FlickrSearch, QueryBuilder, ReqwestFetch};
use vt_pipeline::Pipeline;
use vt_records_redb::RedbRecords;

use crate::{Commands, PinRef, config::VtConfig};

mod cache;
mod photos;
mod pins;

pub use cache::run_cache;
pub use photos::run_photos;
pub use pins::run_pins;

pub async fn run_command(
    config_file: &Path,
    data_dir: &Path,
    watch: bool,
    cmd: Commands,
) -> Result<()> {
    if let Commands::Config { cmd } = cmd {
        return cmd.run(config_file.to_path_buf(), data_dir);
    }

    let config = load_config(config_file)?;
    let pipeline = open_pipeline(&config, data_dir)?;
    let watcher = watch.then(|| spawn_watcher(pipeline.records().as_ref()));

    let result = match cmd {
        Commands::Pin { cmd } => run_pins(cmd, &pipeline).await,
        Commands::Photos { cmd } => run_photos(cmd, &pipeline).await,
        Commands::Cache { cmd } => run_cache(cmd, &pipeline).await,
        Commands::Config { .. } => Ok(()),
    };

    let summary = pipeline.shutdown().await;
    tracing::debug!(?summary, "pipeline stopped");
    if let Some(watcher) = watcher {
        // Let events from the final saves reach the terminal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        watcher.abort();
    }
    result
}

fn load_config(config_file: &Path) -> Result<VtConfig> {
    if !config_file.exists() {
        tracing::info!(
            "no config file at {}, using defaults (create one with `vt config init`)",
            config_file.display()
        );
        return VtConfig::from_toml("");
    }
    let content = std::fs::read_to_string(config_file)
        .with_context(|| format!("failed to read {}", config_file.display()))?;
    VtConfig::from_toml(&content)
        .with_context(|| format!("invalid config file {}", config_file.display()))
}

fn open_pipeline(config: &VtConfig, data_dir: &Path) -> Result<Pipeline> {
    let records_dir = config.records_dir(data_dir);
    std::fs::create_dir_all(&records_dir)?;
    let records = RedbRecords::open(&records_dir)
        .with_context(|| format!("failed to open records in {}", records_dir.display()))?;

    let cache = ImageCache::new(
        MemoryStore::bounded(config.cache.memory_bytes),
        LocalStore::new(config.cache_dir(data_dir)),
    );

    let http = Arc::new(
        ReqwestFetch::new(Duration::from_secs(config.api.timeout_secs))
            .context("failed to build HTTP client")?,
    );
    let search = FlickrSearch::new(http.clone(), QueryBuilder::new(config.api.search.clone()));
    let downloader = Downloader::new(http, cache, config.pipeline.download_policy());

    Ok(Pipeline::new(
        Arc::new(search),
        Arc::new(records),
        downloader,
        config.pipeline.pipeline(),
    ))
}

fn spawn_watcher(records: &dyn RecordStore) -> JoinHandle<()> {
    let mut events = records.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => eprintln!("{}", describe(&event)),
                Err(RecvError::Lagged(missed)) => eprintln!("... {missed} changes not shown"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(event: &RecordEvent) -> String {
    let (verb, record) = match event {
        RecordEvent::Inserted(r) => ("inserted", r),
        RecordEvent::Updated(r) => ("updated", r),
        RecordEvent::Deleted(r) => ("deleted", r),
    };
    match record {
        vt_core::RecordRef::Pin(pin) => format!("{verb} pin {pin}"),
        vt_core::RecordRef::Photo { pin, photo } => format!("{verb} photo {photo} of pin {pin}"),
    }
}

/// Turns a pipeline failure into the message a user should see.
pub(crate) fn fetch_failed(e: FetchError) -> anyhow::Error {
    let message = e.user_message();
    anyhow::Error::new(e).context(message)
}

pub(crate) async fn resolve_pin(records: &dyn RecordStore, pin: &str) -> Result<Pin> {
    match PinRef::from(pin.to_owned()) {
        PinRef::Id(id) => records
            .get_pin(id)
            .await?
            .with_context(|| format!("no pin with id {id}")),
        PinRef::Name(name) => {
            let mut matches: Vec<_> = records
                .list_pins()
                .await?
                .into_iter()
                .filter(|p| p.name == name)
                .collect();
            match matches.len() {
                0 => bail!("no pin named '{name}'"),
                1 => Ok(matches.remove(0)),
                n => bail!("{n} pins are named '{name}'; use the pin id instead"),
            }
        }
    }
}
