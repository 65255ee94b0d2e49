use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, Stream};
use std::{
    collections::VecDeque,
    io,
    sync::{Mutex, PoisonError},
};
use vt_core::store::{StoreError, StoreFeatures, StoreResult};

/// In-memory cache tier with an optional byte budget.
///
/// Reads are lock-free. Writes are serialized so the budget bookkeeping stays
/// exact; once the budget is exceeded the oldest entries are dropped first.
#[derive(Debug)]
pub struct MemoryStore {
    files: DashMap<String, Bytes>,
    budget: Mutex<Budget>,
    max_bytes: Option<u64>,
}

#[derive(Debug, Default)]
struct Budget {
    order: VecDeque<String>,
    used: u64,
}

impl MemoryStore {
    /// Creates a new, empty, unbounded `MemoryStore`.
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            budget: Mutex::default(),
            max_bytes: None,
        }
    }

    /// Creates a store that holds at most `max_bytes` of values.
    pub fn bounded(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::new()
        }
    }

    /// Total size of the values currently held, for diagnostics and budget
    /// checks in tests.
    pub fn used_bytes(&self) -> u64 {
        self.budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .used
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn remove_locked(&self, budget: &mut Budget, path: &str) -> Option<Bytes> {
        let (_key, old) = self.files.remove(path)?;
        budget.used -= old.len() as u64;
        budget.order.retain(|p| p != path);
        Some(old)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl vt_core::store::Store for MemoryStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            durable: false,
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.files.contains_key(path))
    }

    /// Stores a `Bytes` object at the given path, evicting the oldest entries
    /// if the budget would be exceeded. Values larger than the whole budget
    /// are not kept.
    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove_locked(&mut budget, path);

        let len = bytes.len() as u64;
        if self.max_bytes.is_some_and(|max| len > max) {
            return Ok(());
        }

        self.files.insert(path.to_string(), bytes);
        budget.order.push_back(path.to_string());
        budget.used += len;

        if let Some(max) = self.max_bytes {
            while budget.used > max {
                let Some(oldest) = budget.order.pop_front() else {
                    break;
                };
                if let Some((_key, old)) = self.files.remove(&oldest) {
                    budget.used -= old.len() as u64;
                }
            }
        }
        Ok(())
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let file = self.files.get(path).ok_or(StoreError::NotFound)?;
        Ok(file.clone())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        self.remove_locked(&mut budget, path);
        Ok(())
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let file = self.files.get(path).ok_or(StoreError::NotFound)?;
        Ok(file.len() as u64)
    }

    /// Returns a stream of all object paths in the store.
    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, io::Error>> + Send + Unpin + 'static>>
    {
        let keys: Vec<Result<String, io::Error>> = self
            .files
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();
        Ok(Box::new(stream::iter(keys)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_core::store::Store;
    use vt_core::testutil::StoreTests;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        StoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_memory_store_conforms() {
        let store = MemoryStore::bounded(1024 * 1024);
        StoreTests::new(&store).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn oldest_entries_are_dropped_first() {
        let store = MemoryStore::bounded(10);
        store.put_bytes("a", Bytes::from_static(b"aaaa")).await.unwrap();
        store.put_bytes("b", Bytes::from_static(b"bbbb")).await.unwrap();
        store.put_bytes("c", Bytes::from_static(b"cccc")).await.unwrap();

        assert!(!store.exists("a").await.unwrap());
        assert!(store.exists("b").await.unwrap());
        assert!(store.exists("c").await.unwrap());
        assert_eq!(store.used_bytes(), 8);
    }

    #[tokio::test]
    async fn rewrite_refreshes_position_and_accounting() {
        let store = MemoryStore::bounded(10);
        store.put_bytes("a", Bytes::from_static(b"aaaa")).await.unwrap();
        store.put_bytes("b", Bytes::from_static(b"bbbb")).await.unwrap();
        store.put_bytes("a", Bytes::from_static(b"AA")).await.unwrap();
        assert_eq!(store.used_bytes(), 6);

        store.put_bytes("c", Bytes::from_static(b"cccc")).await.unwrap();
        store.put_bytes("d", Bytes::from_static(b"dd")).await.unwrap();

        assert!(!store.exists("b").await.unwrap(), "b is now the oldest");
        assert!(store.exists("a").await.unwrap());
        assert_eq!(store.used_bytes(), 8);
    }

    #[tokio::test]
    async fn oversized_value_is_not_kept() {
        let store = MemoryStore::bounded(4);
        store.put_bytes("big", Bytes::from_static(b"too large")).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.used_bytes(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_keep_budget_exact() {
        let store = std::sync::Arc::new(MemoryStore::bounded(64));
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put_bytes(&format!("k{i}"), Bytes::from(vec![i as u8; 8]))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.len(), 8);
        assert_eq!(store.used_bytes(), 64);
    }
}
