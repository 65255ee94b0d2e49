//! The public photo-acquisition API.

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use vt_core::{
    CacheKey, CacheNamespace, Coordinates, Discovery, FetchError, ImageCache, Page, Photo,
    PhotoId, Pin, PinId, RecordStore, StoreError,
};
use vt_flickr::{DownloadHandle, Downloader, PhotoSearch};

use crate::{
    acquisition::{Acquisition, DownloadSummary, PipelineConfig},
    actor::{PinActorHandle, PipelineContext},
};

/// Discovers, fetches and stores photos for pins.
///
/// Each pin gets its own actor, started on first use, which serializes every
/// operation that reads and writes that pin's page state. Operations on
/// different pins run concurrently. Cloning a `Pipeline` is cheap and shares
/// the actors.
#[derive(Debug, Clone)]
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    actors: Arc<DashMap<PinId, PinActorHandle>>,
    /// Pins whose deletion is in progress; they get no new actor.
    deleting: Arc<DashSet<PinId>>,
}

impl Pipeline {
    pub fn new(
        search: Arc<dyn PhotoSearch>,
        records: Arc<dyn RecordStore>,
        downloader: Downloader,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(PipelineContext {
                search,
                records,
                downloader,
                config,
            }),
            actors: Arc::new(DashMap::new()),
            deleting: Arc::new(DashSet::new()),
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.ctx.records
    }

    /// The photo asset cache.
    pub fn cache(&self) -> &ImageCache {
        self.ctx.downloader.cache()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    fn actor(&self, pin: PinId) -> Result<PinActorHandle, FetchError> {
        if self.deleting.contains(&pin) {
            return Err(FetchError::PinNotFound(pin));
        }
        Ok(self
            .actors
            .entry(pin)
            .or_insert_with(|| PinActorHandle::spawn(pin, self.ctx.clone()))
            .clone())
    }

    /// Runs `op` on the pin's actor, dropping the actor if the pin turns out
    /// not to exist.
    async fn with_actor<T, F, Fut>(&self, pin: PinId, op: F) -> Result<T, FetchError>
    where
        F: FnOnce(PinActorHandle) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let result = match self.actor(pin) {
            Ok(actor) => op(actor).await,
            Err(e) => Err(e),
        };
        self.forget_missing(pin, result)
    }

    /// Drops the actor of a pin that turned out not to exist.
    fn forget_missing<T>(&self, pin: PinId, result: Result<T, FetchError>) -> Result<T, FetchError> {
        if let Err(FetchError::PinNotFound(_)) = &result
            && let Some((_, actor)) = self.actors.remove(&pin)
        {
            actor.cancel();
        }
        result
    }

    #[cfg(test)]
    fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Persists a new pin without fetching anything.
    pub async fn create_pin(
        &self,
        name: impl Into<String>,
        coordinates: Coordinates,
    ) -> Result<Pin, FetchError> {
        let pin = Pin::new(name, coordinates);
        self.ctx.records.insert_pin(&pin).await?;
        tracing::info!(pin = %pin.id, name = %pin.name, %coordinates, "created pin");
        Ok(pin)
    }

    /// Creates a pin and runs its first acquisition: discovery, then the
    /// initial page, then downloads for every photo on it.
    ///
    /// If acquisition fails the pin stays, without photos, and a later
    /// [`Pipeline::load_photos`] retries.
    pub async fn add_pin(
        &self,
        name: impl Into<String>,
        coordinates: Coordinates,
    ) -> Result<(Pin, Acquisition), FetchError> {
        let pin = self.create_pin(name, coordinates).await?;
        let acquisition = self.acquire(pin.id).await?;
        Ok((pin, acquisition))
    }

    /// Returns the pin's photos, loading a page first when it has none.
    ///
    /// Discovery runs only for a pin that has never been discovered.
    pub async fn acquire(&self, pin: PinId) -> Result<Acquisition, FetchError> {
        self.with_actor(pin, |actor| async move { actor.acquire().await })
            .await
    }

    pub async fn load_photos(&self, pin: PinId) -> Result<Vec<Photo>, FetchError> {
        self.acquire(pin).await.map(|acquisition| match acquisition {
            Acquisition::NoPhotos => Vec::new(),
            Acquisition::Loaded { photos, .. } => photos,
        })
    }

    /// Learns how many result pages exist around the pin, at most once.
    pub async fn discover_page_count(&self, pin: PinId) -> Result<Discovery, FetchError> {
        self.with_actor(pin, |actor| async move { actor.discover().await })
            .await
    }

    /// Fetches one page of descriptors for the pin without storing anything.
    ///
    /// Fails with [`FetchError::InvalidPage`] outside `1..=total_pages`.
    pub async fn fetch_page(&self, pin: PinId, page: u32) -> Result<Page, FetchError> {
        self.with_actor(pin, |actor| async move { actor.fetch_page(page).await })
            .await
    }

    /// Replaces the pin's photos with the next page, wrapping after the last.
    ///
    /// On failure the pin and its photos are left as they were. Requests
    /// that overlap an in-flight refresh of the same pin share its result.
    pub async fn new_collection(&self, pin: PinId) -> Result<Acquisition, FetchError> {
        self.with_actor(pin, |actor| async move { actor.new_collection().await })
            .await
    }

    /// Deletes the given photos of a pin, returning those that existed.
    ///
    /// Their downloads are cancelled and their cached assets evicted.
    pub async fn remove_photos(
        &self,
        pin: PinId,
        ids: &[PhotoId],
    ) -> Result<Vec<Photo>, FetchError> {
        let ids = ids.to_vec();
        self.with_actor(pin, |actor| async move { actor.remove_photos(ids).await })
            .await
    }

    /// Waits for every download scheduled for the pin so far.
    pub async fn settle_downloads(&self, pin: PinId) -> Result<DownloadSummary, FetchError> {
        self.with_actor(pin, |actor| async move { actor.settle_downloads().await })
            .await
    }

    /// Deletes a pin, its photos, their cached assets and its snapshot.
    ///
    /// In-flight fetches for the pin are abandoned and its downloads are
    /// cancelled and awaited first, so nothing is written for it afterwards.
    pub async fn delete_pin(&self, pin: PinId) -> Result<Vec<Photo>, FetchError> {
        self.deleting.insert(pin);
        let result = self.delete_pin_records(pin).await;
        self.deleting.remove(&pin);
        result
    }

    async fn delete_pin_records(&self, pin: PinId) -> Result<Vec<Photo>, FetchError> {
        if let Some((_, actor)) = self.actors.remove(&pin) {
            actor.cancel();
            let summary = actor.shutdown().await;
            tracing::debug!(%pin, ?summary, "pin actor drained");
        }

        let record = self.ctx.records.get_pin(pin).await?;
        let removed = self.ctx.records.delete_pin(pin).await?;
        for photo in &removed {
            self.cache().evict(&photo.cache_key).await;
        }
        if let Some(record) = record {
            if let Ok(key) = snapshot_key(&record.name) {
                self.snapshots().evict(&key).await;
            }
            tracing::info!(%pin, photos = removed.len(), "deleted pin");
        }
        Ok(removed)
    }

    /// Stops every pin actor after its downloads finish.
    pub async fn shutdown(&self) -> DownloadSummary {
        let actors: Vec<_> = self.actors.iter().map(|a| a.value().clone()).collect();
        self.actors.clear();

        let mut summary = DownloadSummary::default();
        for actor in actors {
            summary += actor.shutdown().await;
        }
        summary
    }

    /// The cached image of a photo, if it has been downloaded.
    pub async fn photo_image(&self, photo: &Photo) -> Result<Option<Bytes>, StoreError> {
        self.cache().get(&photo.cache_key).await
    }

    /// Downloads a photo's image on demand.
    ///
    /// The download belongs to the photo's pin: removing the photo or
    /// deleting the pin cancels it, and deleting the pin waits for it.
    pub async fn download(&self, photo: &Photo) -> Result<DownloadHandle, FetchError> {
        let pin = photo.pin_id;
        let photo = photo.id;
        self.with_actor(pin, |actor| async move { actor.download(photo).await })
            .await
    }

    fn snapshots(&self) -> ImageCache {
        self.cache().with_namespace(CacheNamespace::PinSnapshot)
    }

    /// Stores the map snapshot shown behind a pin's photos.
    pub async fn store_pin_snapshot(&self, pin: &Pin, image: Bytes) -> Result<(), StoreError> {
        self.snapshots()
            .put(&snapshot_key(&pin.name)?, Some(image))
            .await
    }

    pub async fn pin_snapshot(&self, pin: &Pin) -> Result<Option<Bytes>, StoreError> {
        self.snapshots().get(&snapshot_key(&pin.name)?).await
    }
}

/// Snapshots are keyed by display name, made safe to use as a file name.
fn snapshot_key(name: &str) -> Result<CacheKey, StoreError> {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    if matches!(sanitized.as_str(), "" | "." | "..") {
        sanitized.insert(0, '_');
    }
    CacheKey::new(sanitized).map_err(|e| StoreError::InvalidPath(e.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_cache_memory::MemoryStore;
    use vt_flickr::{
        DownloadPolicy,
        testutil::{ScriptedHttp, ScriptedSearch},
    };
    use vt_records_memory::MemoryRecords;

    fn pipeline() -> Pipeline {
        let http = Arc::new(ScriptedHttp::serving(Bytes::from_static(b"jpeg")));
        let cache = ImageCache::new(MemoryStore::new(), MemoryStore::new());
        Pipeline::new(
            Arc::new(ScriptedSearch::new(2, 2)),
            Arc::new(MemoryRecords::new()),
            Downloader::new(http, cache, DownloadPolicy::default()),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn unknown_pins_leave_no_actor_behind() {
        let pipeline = pipeline();
        let unknown = PinId::random();

        let err = pipeline.settle_downloads(unknown).await.unwrap_err();
        assert!(matches!(err, FetchError::PinNotFound(_)));
        let err = pipeline.acquire(unknown).await.unwrap_err();
        assert!(matches!(err, FetchError::PinNotFound(_)));
        assert_eq!(pipeline.actor_count(), 0);
    }

    #[tokio::test]
    async fn deleted_pins_leave_no_actor_behind() {
        let pipeline = pipeline();
        let (pin, _) = pipeline
            .add_pin("Ghirardelli Square", Coordinates::new(37.8059, -122.4229))
            .await
            .unwrap();
        assert_eq!(pipeline.actor_count(), 1);

        pipeline.delete_pin(pin.id).await.unwrap();
        assert_eq!(pipeline.actor_count(), 0);

        let err = pipeline.settle_downloads(pin.id).await.unwrap_err();
        assert!(matches!(err, FetchError::PinNotFound(_)));
        assert!(pipeline.new_collection(pin.id).await.is_err());
        assert_eq!(pipeline.actor_count(), 0);
    }

    #[tokio::test]
    async fn pins_being_deleted_get_no_new_actor() {
        let pipeline = pipeline();
        let pin = pipeline
            .create_pin("Sea Cliff", Coordinates::new(37.7873, -122.4900))
            .await
            .unwrap();
        pipeline.deleting.insert(pin.id);

        let err = pipeline.acquire(pin.id).await.unwrap_err();
        assert!(matches!(err, FetchError::PinNotFound(_)));
        assert_eq!(pipeline.actor_count(), 0);

        pipeline.deleting.remove(&pin.id);
        pipeline.acquire(pin.id).await.unwrap();
        assert_eq!(pipeline.actor_count(), 1);
    }

    #[test]
    fn snapshot_keys_are_file_names() {
        let key = |name| snapshot_key(name).unwrap();
        assert_eq!(key("Golden Gate").as_str(), "Golden Gate");
        assert_eq!(key("SF / Oakland").as_str(), "SF _ Oakland");
        assert_eq!(key("").as_str(), "_");
        assert_eq!(key("..").as_str(), "_..");
    }
}
