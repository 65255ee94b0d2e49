//! Two-tier image cache.
//!
//! The disk tier is the durable source of truth. The memory tier is an
//! accelerator that may drop entries at any time and is refilled from disk on
//! a miss. Writes go to disk first so the memory tier never holds a key the
//! disk tier lacks.

use bytes::Bytes;
use futures::StreamExt;
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    photo::CacheKey,
    store::{Store, StoreResult},
};

/// Separates photo assets from pin snapshots so their keys cannot collide.
///
/// Photo keys are derived from asset URLs; snapshot keys are pin display
/// names. Each namespace is a directory of its own in both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    Photo,
    PinSnapshot,
}

impl CacheNamespace {
    fn dir(&self) -> &'static str {
        match self {
            Self::Photo => "photos",
            Self::PinSnapshot => "snapshots",
        }
    }
}

const KEY_LOCK_STRIPES: usize = 64;

#[derive(Debug, Clone)]
pub struct ImageCache {
    memory: Arc<dyn Store>,
    disk: Arc<dyn Store>,
    namespace: CacheNamespace,
    /// Serializes tier updates per path, shared by every namespace view.
    key_locks: Arc<[Mutex<()>]>,
}

impl ImageCache {
    /// Creates a cache over the given tiers, scoped to [`CacheNamespace::Photo`].
    pub fn new<M, D>(memory: M, disk: D) -> Self
    where
        M: Store,
        D: Store,
    {
        Self::from_tiers(Arc::new(memory), Arc::new(disk))
    }

    pub fn from_tiers(memory: Arc<dyn Store>, disk: Arc<dyn Store>) -> Self {
        Self {
            memory,
            disk,
            namespace: CacheNamespace::Photo,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Returns a view of the same tiers scoped to another namespace.
    pub fn with_namespace(&self, namespace: CacheNamespace) -> Self {
        Self {
            memory: self.memory.clone(),
            disk: self.disk.clone(),
            namespace,
            key_locks: self.key_locks.clone(),
        }
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.namespace
    }

    fn path(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.namespace.dir(), key)
    }

    /// Held while both tiers change for `path`, so a write and an eviction of
    /// the same path cannot interleave between tiers.
    async fn lock_path(&self, path: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let stripe = hasher.finish() as usize % self.key_locks.len();
        self.key_locks[stripe].lock().await
    }

    /// Looks up `key`, checking memory first and falling back to disk.
    ///
    /// A disk hit repopulates the memory tier before returning.
    pub async fn get(&self, key: &CacheKey) -> StoreResult<Option<Bytes>> {
        let path = self.path(key);

        match self.memory.read_bytes(&path).await {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!("memory tier read of {path} failed: {e}"),
        }

        let _guard = self.lock_path(&path).await;
        let bytes = match self.disk.read_bytes(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Err(e) = self.memory.put_bytes(&path, bytes.clone()).await {
            tracing::warn!("could not repopulate memory tier for {path}: {e}");
        }
        Ok(Some(bytes))
    }

    /// Stores `image` under `key`; `None` evicts the key from both tiers.
    pub async fn put(&self, key: &CacheKey, image: Option<Bytes>) -> StoreResult<()> {
        let Some(bytes) = image else {
            self.evict(key).await;
            return Ok(());
        };

        let path = self.path(key);
        let _guard = self.lock_path(&path).await;
        self.disk.put_bytes(&path, bytes.clone()).await?;
        if let Err(e) = self.memory.put_bytes(&path, bytes).await {
            tracing::warn!("memory tier write of {path} failed: {e}");
        }
        Ok(())
    }

    /// Removes `key` from both tiers. Failures are logged and swallowed.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.path(key);
        let _guard = self.lock_path(&path).await;
        if let Err(e) = self.memory.delete(&path).await {
            tracing::debug!("memory tier eviction of {path} failed: {e}");
        }
        if let Err(e) = self.disk.delete(&path).await
            && !e.is_not_found()
        {
            tracing::warn!("cached image {path} could not be deleted: {e}");
        }
    }

    /// True if the durable tier holds `key`.
    pub async fn contains(&self, key: &CacheKey) -> StoreResult<bool> {
        self.disk.exists(&self.path(key)).await
    }

    /// True if the memory tier currently holds `key`.
    ///
    /// For diagnostics; callers should read through [`ImageCache::get`].
    pub async fn is_resident(&self, key: &CacheKey) -> bool {
        self.memory
            .exists(&self.path(key))
            .await
            .unwrap_or(false)
    }

    /// Lists the keys held by the durable tier in this namespace.
    pub async fn keys(&self) -> StoreResult<Vec<CacheKey>> {
        let prefix = format!("{}/", self.namespace.dir());
        let mut stream = self.disk.list().await?;
        let mut keys = Vec::new();

        while let Some(path) = stream.next().await {
            let path = path?;
            // Local stores report OS separators.
            let path = path.replace('\\', "/");
            if let Some(name) = path.strip_prefix(&prefix)
                && let Ok(key) = CacheKey::new(name)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
