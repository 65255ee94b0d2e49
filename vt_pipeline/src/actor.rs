//! The per-pin actor that owns a pin's pagination state.
//!
//! Every operation that reads and then writes a pin's page state runs inside
//! that pin's actor, one message at a time. Discovery therefore always
//! completes before a page fetch for the same pin starts, and two refreshes
//! can never advance from the same stale page.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use vt_core::{Discovery, FetchError, Page, Photo, PhotoId, Pin, PinId, RecordStore};
use vt_flickr::{DownloadHandle, Downloader, PhotoSearch};

use crate::acquisition::{Acquisition, DownloadSummary, PipelineConfig, materialize};

const MAILBOX_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, FetchError>>;

/// Collaborators shared by every pin actor.
#[derive(Debug)]
pub(crate) struct PipelineContext {
    pub(crate) search: Arc<dyn PhotoSearch>,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) downloader: Downloader,
    pub(crate) config: PipelineConfig,
}

#[derive(Debug)]
pub(crate) enum PinMessage {
    /// Learns the page count unless the pin already knows it.
    Discover { responder: Reply<Discovery> },
    /// Returns the pin's photos, loading a page first if it has none.
    Acquire { responder: Reply<Acquisition> },
    /// Fetches a page without touching the pin's records.
    FetchPage { page: u32, responder: Reply<Page> },
    /// Advances to the next page and replaces the pin's photos with it.
    ///
    /// `seen_generation` is the refresh count the sender observed. A request
    /// that was sent before another refresh finished shares that refresh's
    /// result instead of advancing again.
    NewCollection {
        seen_generation: u64,
        responder: Reply<Acquisition>,
    },
    RemovePhotos {
        ids: Vec<PhotoId>,
        responder: Reply<Vec<Photo>>,
    },
    /// Starts an on-demand download of one of the pin's photos.
    Download {
        photo: PhotoId,
        responder: Reply<DownloadHandle>,
    },
    /// Waits for scheduled downloads. Fails if the pin no longer exists.
    SettleDownloads { responder: Reply<DownloadSummary> },
    /// Waits for outstanding downloads, then stops the actor.
    Shutdown {
        responder: oneshot::Sender<DownloadSummary>,
    },
}

struct PinActor {
    pin_id: PinId,
    ctx: Arc<PipelineContext>,
    receiver: mpsc::Receiver<PinMessage>,
    /// Cancelled when the pin is deleted; downloads hold child tokens.
    token: CancellationToken,
    downloads: HashMap<PhotoId, DownloadHandle>,
    /// Outcomes already collected but not yet reported by a settle.
    settled: DownloadSummary,
    /// On-demand downloads, whose handles belong to the caller.
    on_demand: TaskTracker,
    on_demand_tokens: HashMap<PhotoId, CancellationToken>,
    generation: Arc<AtomicU64>,
    last_refresh: Option<Acquisition>,
}

impl PinActor {
    async fn run(mut self) {
        tracing::debug!(pin = %self.pin_id, "pin actor started");
        while let Some(msg) = self.receiver.recv().await {
            if let PinMessage::Shutdown { responder } = msg {
                let summary = self.settle().await;
                self.on_demand.close();
                self.on_demand.wait().await;
                let _ = responder.send(summary);
                break;
            }
            self.process_msg(msg).await;
        }
        tracing::debug!(pin = %self.pin_id, "pin actor stopped");
    }

    async fn process_msg(&mut self, msg: PinMessage) {
        match msg {
            PinMessage::Discover { responder } => {
                let result = self.discover_page_count().await;
                self.respond("discover", responder, result);
            }
            PinMessage::Acquire { responder } => {
                let result = self.acquire().await;
                self.respond("acquire", responder, result);
            }
            PinMessage::FetchPage { page, responder } => {
                let result = self.fetch_page(page).await;
                self.respond("fetch page", responder, result);
            }
            PinMessage::NewCollection {
                seen_generation,
                responder,
            } => {
                let result = self.new_collection(seen_generation).await;
                self.respond("new collection", responder, result);
            }
            PinMessage::RemovePhotos { ids, responder } => {
                let result = self.remove_photos(ids).await;
                self.respond("remove photos", responder, result);
            }
            PinMessage::Download { photo, responder } => {
                let result = self.download(photo).await;
                self.respond("download", responder, result);
            }
            PinMessage::SettleDownloads { responder } => {
                let summary = self.settle().await;
                let result = self.load_pin().await.map(|_| summary);
                self.respond("settle downloads", responder, result);
            }
            PinMessage::Shutdown { .. } => {}
        }
    }

    fn respond<T>(&self, op: &'static str, responder: Reply<T>, result: Result<T, FetchError>) {
        match &result {
            Ok(_) => {}
            Err(FetchError::Cancelled(_)) => tracing::debug!(pin = %self.pin_id, op, "cancelled"),
            Err(e) => tracing::warn!(pin = %self.pin_id, op, "{e}"),
        }
        // The caller may have stopped waiting.
        let _ = responder.send(result);
    }

    fn ensure_live(&self) -> Result<(), FetchError> {
        if self.token.is_cancelled() {
            return Err(FetchError::Cancelled(self.pin_id));
        }
        Ok(())
    }

    async fn load_pin(&self) -> Result<Pin, FetchError> {
        self.ensure_live()?;
        self.ctx
            .records
            .get_pin(self.pin_id)
            .await?
            .ok_or(FetchError::PinNotFound(self.pin_id))
    }

    /// Awaits a network step, abandoning it if the pin is deleted meanwhile.
    async fn network<T>(
        &self,
        fut: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(FetchError::Cancelled(self.pin_id)),
            result = fut => result,
        };
        self.ensure_live()?;
        result
    }

    async fn discover(&self, pin: &mut Pin) -> Result<Discovery, FetchError> {
        if pin.discovered {
            return Ok(Discovery::from_total(pin.total_pages.unwrap_or(0)));
        }

        let discovery = self
            .network(self.ctx.search.page_count(pin.coordinates))
            .await?;
        pin.record_discovery(discovery);
        self.ctx.records.update_pin(pin).await?;
        tracing::info!(pin = %pin.id, pages = discovery.total_pages(), "discovered result pages");
        Ok(discovery)
    }

    async fn discover_page_count(&mut self) -> Result<Discovery, FetchError> {
        let mut pin = self.load_pin().await?;
        self.discover(&mut pin).await
    }

    async fn first_acquisition(&mut self, mut pin: Pin) -> Result<Acquisition, FetchError> {
        let Discovery::Pages(total) = self.discover(&mut pin).await? else {
            tracing::info!(pin = %pin.id, "no photos found for this location");
            return Ok(Acquisition::NoPhotos);
        };
        let page = self.ctx.config.initial_page.page(total);
        self.load_page(pin, page).await
    }

    async fn acquire(&mut self) -> Result<Acquisition, FetchError> {
        let pin = self.load_pin().await?;
        let photos = self.ctx.records.photos_for_pin(pin.id).await?;
        if !photos.is_empty() {
            return Ok(Acquisition::Loaded {
                page: pin.current_page,
                photos,
                skipped: 0,
            });
        }

        if !pin.discovered {
            return self.first_acquisition(pin).await;
        }
        let Some(total) = pin.total_pages.filter(|total| *total > 0) else {
            return Ok(Acquisition::NoPhotos);
        };
        let page = if pin.check_page(pin.current_page).is_ok() {
            pin.current_page
        } else {
            self.ctx.config.initial_page.page(total)
        };
        self.load_page(pin, page).await
    }

    async fn fetch_page(&mut self, page: u32) -> Result<Page, FetchError> {
        let mut pin = self.load_pin().await?;
        self.discover(&mut pin).await?;
        pin.check_page(page)?;
        self.network(self.ctx.search.page(pin.coordinates, page))
            .await
    }

    async fn new_collection(&mut self, seen_generation: u64) -> Result<Acquisition, FetchError> {
        if seen_generation < self.generation.load(Ordering::SeqCst)
            && let Some(last) = &self.last_refresh
        {
            tracing::debug!(pin = %self.pin_id, "joining a refresh that finished meanwhile");
            return Ok(last.clone());
        }

        let pin = self.load_pin().await?;
        let acquisition = if !pin.discovered {
            self.first_acquisition(pin).await?
        } else {
            match pin.peek_next_page() {
                Some(next) => self.load_page(pin, next).await?,
                None => Acquisition::NoPhotos,
            }
        };

        self.last_refresh = Some(acquisition.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(acquisition)
    }

    /// Fetches `number`, then stores it as the pin's photos in one save.
    ///
    /// Nothing is written unless the fetch succeeds.
    async fn load_page(&mut self, mut pin: Pin, number: u32) -> Result<Acquisition, FetchError> {
        pin.check_page(number)?;
        let page = self
            .network(self.ctx.search.page(pin.coordinates, number))
            .await?;

        pin.current_page = number;
        let photos = materialize(&pin, &page.descriptors);
        let removed = self.ctx.records.replace_photos(&pin, &photos).await?;
        self.discard(&removed, &photos).await;
        self.schedule_downloads(&photos).await;

        if let Some(partial) = page.partial() {
            tracing::warn!(pin = %pin.id, "{partial}");
        }
        tracing::info!(
            pin = %pin.id,
            page = number,
            photos = photos.len(),
            removed = removed.len(),
            "loaded photo page"
        );
        Ok(Acquisition::Loaded {
            page: number,
            photos,
            skipped: page.skipped,
        })
    }

    async fn remove_photos(&mut self, ids: Vec<PhotoId>) -> Result<Vec<Photo>, FetchError> {
        self.ensure_live()?;
        for id in &ids {
            self.stop_download(*id).await;
        }
        let removed = self.ctx.records.delete_photos(self.pin_id, &ids).await?;
        let remaining = self.ctx.records.photos_for_pin(self.pin_id).await?;
        self.discard(&removed, &remaining).await;
        Ok(removed)
    }

    /// Stops the downloads of `removed` photos and evicts their assets,
    /// except assets still referenced by `kept`.
    async fn discard(&mut self, removed: &[Photo], kept: &[Photo]) {
        let cache = self.ctx.downloader.cache().clone();
        for photo in removed {
            self.stop_download(photo.id).await;
            if !kept.iter().any(|k| k.cache_key == photo.cache_key) {
                cache.evict(&photo.cache_key).await;
            }
        }
    }

    /// Downloads a photo the pin still owns, cancelled with the pin.
    async fn download(&mut self, id: PhotoId) -> Result<DownloadHandle, FetchError> {
        self.load_pin().await?;
        let photo = self
            .ctx
            .records
            .get_photo(id)
            .await?
            .filter(|photo| photo.pin_id == self.pin_id)
            .ok_or(FetchError::PhotoNotFound(id))?;

        let scope = self
            .on_demand_tokens
            .entry(id)
            .or_insert_with(|| self.token.child_token());
        Ok(self
            .ctx
            .downloader
            .download_tracked(&photo, scope, &self.on_demand))
    }

    async fn stop_download(&mut self, photo: PhotoId) {
        if let Some(token) = self.on_demand_tokens.remove(&photo) {
            token.cancel();
        }
        if let Some(handle) = self.downloads.remove(&photo) {
            handle.cancel();
            self.settled += outcome(self.pin_id, photo, handle.join().await);
        }
    }

    async fn schedule_downloads(&mut self, photos: &[Photo]) {
        let cache = self.ctx.downloader.cache();
        for photo in photos {
            match cache.contains(&photo.cache_key).await {
                Ok(true) => {
                    self.settled.cached += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %photo.cache_key, "cache lookup failed: {e}"),
            }
            let handle = self.ctx.downloader.download_scoped(photo, &self.token);
            self.downloads.insert(photo.id, handle);
        }
    }

    async fn settle(&mut self) -> DownloadSummary {
        let mut summary = std::mem::take(&mut self.settled);
        let handles: Vec<_> = self.downloads.drain().collect();
        for (photo, handle) in handles {
            summary += outcome(self.pin_id, photo, handle.join().await);
        }
        summary
    }
}

fn outcome(
    pin: PinId,
    photo: PhotoId,
    result: Option<Result<bytes::Bytes, vt_core::NetworkError>>,
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    match result {
        Some(Ok(_)) => summary.cached = 1,
        Some(Err(e)) => {
            tracing::warn!(%pin, %photo, "photo download failed: {e}");
            summary.failed = 1;
        }
        None => summary.cancelled = 1,
    }
    summary
}

/// Handle to a running pin actor.
#[derive(Debug, Clone)]
pub(crate) struct PinActorHandle {
    pin_id: PinId,
    sender: mpsc::Sender<PinMessage>,
    token: CancellationToken,
    generation: Arc<AtomicU64>,
}

impl PinActorHandle {
    /// Spawns a new `PinActor` task and returns a handle to it.
    pub(crate) fn spawn(pin_id: PinId, ctx: Arc<PipelineContext>) -> Self {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let token = CancellationToken::new();
        let generation = Arc::new(AtomicU64::new(0));
        let actor = PinActor {
            pin_id,
            ctx,
            receiver,
            token: token.clone(),
            downloads: HashMap::new(),
            settled: DownloadSummary::default(),
            on_demand: TaskTracker::new(),
            on_demand_tokens: HashMap::new(),
            generation: generation.clone(),
            last_refresh: None,
        };
        tokio::spawn(actor.run());

        Self {
            pin_id,
            sender,
            token,
            generation,
        }
    }

    /// Sends a message and waits for its reply.
    ///
    /// A stopped actor means the pin was deleted.
    async fn request<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> PinMessage,
    ) -> Result<T, FetchError> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(msg(responder))
            .await
            .map_err(|_| FetchError::PinNotFound(self.pin_id))?;
        receiver
            .await
            .map_err(|_| FetchError::PinNotFound(self.pin_id))
    }

    pub(crate) async fn discover(&self) -> Result<Discovery, FetchError> {
        self.request(|responder| PinMessage::Discover { responder })
            .await?
    }

    pub(crate) async fn acquire(&self) -> Result<Acquisition, FetchError> {
        self.request(|responder| PinMessage::Acquire { responder })
            .await?
    }

    pub(crate) async fn fetch_page(&self, page: u32) -> Result<Page, FetchError> {
        self.request(|responder| PinMessage::FetchPage { page, responder })
            .await?
    }

    pub(crate) async fn new_collection(&self) -> Result<Acquisition, FetchError> {
        let seen_generation = self.generation.load(Ordering::SeqCst);
        self.request(|responder| PinMessage::NewCollection {
            seen_generation,
            responder,
        })
        .await?
    }

    pub(crate) async fn remove_photos(&self, ids: Vec<PhotoId>) -> Result<Vec<Photo>, FetchError> {
        self.request(|responder| PinMessage::RemovePhotos { ids, responder })
            .await?
    }

    pub(crate) async fn download(&self, photo: PhotoId) -> Result<DownloadHandle, FetchError> {
        self.request(|responder| PinMessage::Download { photo, responder })
            .await?
    }

    pub(crate) async fn settle_downloads(&self) -> Result<DownloadSummary, FetchError> {
        self.request(|responder| PinMessage::SettleDownloads { responder })
            .await?
    }

    /// Aborts in-flight network steps and downloads without waiting.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Stops the actor once its queued messages and downloads are done.
    pub(crate) async fn shutdown(&self) -> DownloadSummary {
        self.request(|responder| PinMessage::Shutdown { responder })
            .await
            .unwrap_or_default()
    }
}
