//! Two-tier cache behaviour: read-through population, eviction, namespaces,
//! and the rule that the memory tier never holds what the disk tier lacks.

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use vt_cache_memory::MemoryStore;
use vt_core::{
    CacheKey, CacheNamespace, ImageCache,
    store::{Store, StoreError, StoreFeatures, StoreResult},
};

fn key(s: &str) -> CacheKey {
    CacheKey::new(s).unwrap()
}

fn tiers() -> (Arc<MemoryStore>, Arc<MemoryStore>, ImageCache) {
    let memory = Arc::new(MemoryStore::bounded(1024 * 1024));
    let disk = Arc::new(MemoryStore::new());
    let cache = ImageCache::from_tiers(memory.clone(), disk.clone());
    (memory, disk, cache)
}

#[tokio::test]
async fn cold_read_comes_from_disk_and_populates_memory() {
    let (memory, disk, cache) = tiers();
    let image = Bytes::from_static(b"\x89PNG fake image bytes");

    cache.put(&key("abc.jpg"), Some(image.clone())).await.unwrap();
    // Simulate a restart: the memory tier forgets everything.
    memory.delete("photos/abc.jpg").await.unwrap();
    assert!(!cache.is_resident(&key("abc.jpg")).await);

    let fetched = cache.get(&key("abc.jpg")).await.unwrap();
    assert_eq!(fetched, Some(image.clone()));
    assert!(cache.is_resident(&key("abc.jpg")).await);
    assert_eq!(memory.read_bytes("photos/abc.jpg").await.unwrap(), image);
    assert_eq!(disk.read_bytes("photos/abc.jpg").await.unwrap(), image);
}

#[tokio::test]
async fn fresh_cache_over_existing_disk_tier() {
    let disk = Arc::new(MemoryStore::new());
    let first = ImageCache::from_tiers(Arc::new(MemoryStore::new()), disk.clone());
    first
        .put(&key("abc.jpg"), Some(Bytes::from_static(b"persisted")))
        .await
        .unwrap();

    let second = ImageCache::from_tiers(Arc::new(MemoryStore::new()), disk);
    assert!(!second.is_resident(&key("abc.jpg")).await);
    assert_eq!(
        second.get(&key("abc.jpg")).await.unwrap().as_deref(),
        Some(&b"persisted"[..])
    );
}

#[tokio::test]
async fn put_none_evicts_both_tiers() {
    let (memory, disk, cache) = tiers();
    cache
        .put(&key("gone.jpg"), Some(Bytes::from_static(b"bytes")))
        .await
        .unwrap();

    cache.put(&key("gone.jpg"), None).await.unwrap();

    assert_eq!(cache.get(&key("gone.jpg")).await.unwrap(), None);
    assert!(!memory.exists("photos/gone.jpg").await.unwrap());
    assert!(!disk.exists("photos/gone.jpg").await.unwrap());
}

#[tokio::test]
async fn evicting_a_missing_key_is_swallowed() {
    let (_, _, cache) = tiers();
    cache.put(&key("never.jpg"), None).await.unwrap();
    cache.evict(&key("never.jpg")).await;
}

#[tokio::test]
async fn namespaces_do_not_collide() {
    let (_, _, photos) = tiers();
    let snapshots = photos.with_namespace(CacheNamespace::PinSnapshot);

    photos
        .put(&key("Golden Gate"), Some(Bytes::from_static(b"photo")))
        .await
        .unwrap();
    snapshots
        .put(&key("Golden Gate"), Some(Bytes::from_static(b"map")))
        .await
        .unwrap();

    assert_eq!(
        photos.get(&key("Golden Gate")).await.unwrap().as_deref(),
        Some(&b"photo"[..])
    );
    assert_eq!(
        snapshots.get(&key("Golden Gate")).await.unwrap().as_deref(),
        Some(&b"map"[..])
    );

    snapshots.evict(&key("Golden Gate")).await;
    assert!(photos.contains(&key("Golden Gate")).await.unwrap());
    assert_eq!(photos.keys().await.unwrap(), vec![key("Golden Gate")]);
    assert!(snapshots.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_overflow_falls_back_to_disk() {
    let memory = Arc::new(MemoryStore::bounded(8));
    let disk = Arc::new(MemoryStore::new());
    let cache = ImageCache::from_tiers(memory.clone(), disk);

    cache.put(&key("a.jpg"), Some(Bytes::from_static(b"aaaaaaaa"))).await.unwrap();
    cache.put(&key("b.jpg"), Some(Bytes::from_static(b"bbbbbbbb"))).await.unwrap();
    assert!(!cache.is_resident(&key("a.jpg")).await);

    assert_eq!(
        cache.get(&key("a.jpg")).await.unwrap().as_deref(),
        Some(&b"aaaaaaaa"[..])
    );
    assert!(cache.is_resident(&key("a.jpg")).await);
}

/// A disk tier whose writes always fail.
#[derive(Debug, Default)]
struct ReadOnlyDisk;

#[async_trait::async_trait]
impl Store for ReadOnlyDisk {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            durable: true,
            case_sensitive: true,
        }
    }

    async fn exists(&self, _path: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn put_bytes(&self, _path: &str, _bytes: Bytes) -> StoreResult<()> {
        Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full").into())
    }

    async fn read_bytes(&self, _path: &str) -> StoreResult<Bytes> {
        Err(StoreError::NotFound)
    }

    async fn delete(&self, _path: &str) -> StoreResult<()> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read only").into())
    }

    async fn size(&self, _path: &str) -> StoreResult<u64> {
        Err(StoreError::NotFound)
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        Ok(Box::new(futures::stream::empty()))
    }
}

#[tokio::test]
async fn failed_disk_write_leaves_memory_untouched() {
    let memory = Arc::new(MemoryStore::new());
    let cache = ImageCache::from_tiers(memory.clone(), Arc::new(ReadOnlyDisk));

    let err = cache
        .put(&key("x.jpg"), Some(Bytes::from_static(b"x")))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    assert!(memory.is_empty());

    // Eviction failures are swallowed.
    cache.put(&key("x.jpg"), None).await.unwrap();
}

/// A disk tier whose writes land and then wait for a permit before returning.
#[derive(Debug)]
struct SlowDisk {
    inner: MemoryStore,
    gate: tokio::sync::Semaphore,
}

#[async_trait::async_trait]
impl Store for SlowDisk {
    fn features(&self) -> StoreFeatures {
        self.inner.features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.inner.put_bytes(path, bytes).await?;
        let _ = self.gate.acquire().await;
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        self.inner.read_bytes(path).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.inner.delete(path).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        self.inner.size(path).await
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        self.inner.list().await
    }
}

#[tokio::test]
async fn eviction_during_a_write_leaves_no_memory_only_entry() {
    let disk = Arc::new(SlowDisk {
        inner: MemoryStore::new(),
        gate: tokio::sync::Semaphore::new(0),
    });
    let cache = ImageCache::from_tiers(Arc::new(MemoryStore::new()), disk.clone());
    let shared = key("shared_m.jpg");

    let put = tokio::spawn({
        let cache = cache.clone();
        let shared = shared.clone();
        async move {
            cache
                .put(&shared, Some(Bytes::from_static(b"jpeg")))
                .await
        }
    });
    while !disk.inner.exists("photos/shared_m.jpg").await.unwrap() {
        tokio::task::yield_now().await;
    }

    // Another pin drops the same asset while the write is between tiers.
    let evict = tokio::spawn({
        let cache = cache.clone();
        let shared = shared.clone();
        async move { cache.evict(&shared).await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    disk.gate.add_permits(1);

    put.await.unwrap().unwrap();
    evict.await.unwrap();
    assert!(!cache.contains(&shared).await.unwrap());
    assert!(!cache.is_resident(&shared).await);
}
