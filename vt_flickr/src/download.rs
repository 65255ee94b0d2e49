//! Cancellable per-photo asset downloads.
//!
//! A download moves through `Running -> Committing -> Done`, or
//! `Running -> Cancelled`. The task checks the phase under a lock before it
//! touches the cache, and [`DownloadHandle::cancel`] flips it under the same
//! lock, so a cancelled download never writes a cache entry.

use bytes::Bytes;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use url::Url;
use vt_core::{CacheKey, ImageCache, NetworkError, Photo, PhotoId};

use crate::client::HttpFetch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPolicy {
    /// Downloads allowed in flight at once, across all pins.
    pub concurrency: usize,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay before the first retry; doubles after each attempt.
    pub backoff: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retries: 0,
            backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Cancelled,
    Committing,
    Done,
}

/// Fetches photo assets and stores them in the [`ImageCache`].
#[derive(Debug, Clone)]
pub struct Downloader {
    http: Arc<dyn HttpFetch>,
    cache: ImageCache,
    permits: Arc<Semaphore>,
    policy: DownloadPolicy,
}

impl Downloader {
    pub fn new(http: Arc<dyn HttpFetch>, cache: ImageCache, policy: DownloadPolicy) -> Self {
        Self {
            http,
            cache,
            permits: Arc::new(Semaphore::new(policy.concurrency.max(1))),
            policy,
        }
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Starts downloading `photo`'s asset.
    pub fn download(&self, photo: &Photo) -> DownloadHandle {
        self.spawn(photo, CancellationToken::new(), None)
    }

    /// Like [`Downloader::download`], but also cancelled when `parent` is.
    pub fn download_scoped(&self, photo: &Photo, parent: &CancellationToken) -> DownloadHandle {
        self.spawn(photo, parent.child_token(), None)
    }

    /// Like [`Downloader::download_scoped`], with the task spawned on
    /// `tracker` so its owner can wait for it without holding the handle.
    pub fn download_tracked(
        &self,
        photo: &Photo,
        parent: &CancellationToken,
        tracker: &TaskTracker,
    ) -> DownloadHandle {
        self.spawn(photo, parent.child_token(), Some(tracker))
    }

    fn spawn(
        &self,
        photo: &Photo,
        token: CancellationToken,
        tracker: Option<&TaskTracker>,
    ) -> DownloadHandle {
        let phase = Arc::new(Mutex::new(Phase::Running));
        let fut = {
            let this = self.clone();
            let url = photo.url.clone();
            let key = photo.cache_key.clone();
            let token = token.clone();
            let phase = phase.clone();
            async move { this.run(url, key, token, phase).await }
        };
        let task = match tracker {
            Some(tracker) => tracker.spawn(fut),
            None => tokio::spawn(fut),
        };

        DownloadHandle {
            photo: photo.id,
            url: photo.url.clone(),
            token,
            phase,
            task,
        }
    }

    async fn run(
        self,
        url: String,
        key: CacheKey,
        token: CancellationToken,
        phase: Arc<Mutex<Phase>>,
    ) -> Result<Bytes, NetworkError> {
        let url = Url::parse(&url).map_err(|e| NetworkError::transport(url.as_str(), e))?;
        let bytes = self.fetch(&url, &token).await?;

        {
            let mut phase = phase.lock().unwrap_or_else(PoisonError::into_inner);
            if *phase == Phase::Cancelled || token.is_cancelled() {
                *phase = Phase::Cancelled;
                return Err(NetworkError::Cancelled {
                    url: url.to_string(),
                });
            }
            *phase = Phase::Committing;
        }

        if let Err(e) = self.cache.put(&key, Some(bytes.clone())).await {
            tracing::warn!(%url, %key, "failed to cache downloaded photo: {e}");
        }
        *phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Done;
        Ok(bytes)
    }

    /// GETs `url`, retrying transient failures per the policy.
    async fn fetch(&self, url: &Url, token: &CancellationToken) -> Result<Bytes, NetworkError> {
        let cancelled = || NetworkError::Cancelled {
            url: url.to_string(),
        };

        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(cancelled()),
            permit = self.permits.acquire() => permit.map_err(|_| cancelled())?,
        };

        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled()),
                result = self.http.get(url) => result,
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.policy.retries => {
                    let delay = self.policy.backoff.saturating_mul(1 << attempt.min(16));
                    attempt += 1;
                    tracing::debug!(%url, attempt, ?delay, "retrying download: {e}");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                result => return result,
            }
        }
    }
}

/// An in-flight download.
///
/// Dropping the handle does not cancel the download.
#[derive(Debug)]
pub struct DownloadHandle {
    photo: PhotoId,
    url: String,
    token: CancellationToken,
    phase: Arc<Mutex<Phase>>,
    task: JoinHandle<Result<Bytes, NetworkError>>,
}

impl DownloadHandle {
    pub fn photo(&self) -> PhotoId {
        self.photo
    }

    /// Stops the download unless it has already started writing to the cache.
    ///
    /// Idempotent; cancelling a finished download does nothing.
    pub fn cancel(&self) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Running {
            *phase = Phase::Cancelled;
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) == Phase::Cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the download.
    ///
    /// Returns `None` if it was cancelled, directly or through its parent
    /// token, before committing its result.
    pub async fn join(self) -> Option<Result<Bytes, NetworkError>> {
        let result = match self.task.await {
            Ok(Err(NetworkError::Cancelled { .. })) => return None,
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return None,
            Err(e) => Err(NetworkError::transport(self.url, e)),
        };

        let phase = *self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        (phase != Phase::Cancelled).then_some(result)
    }
}
