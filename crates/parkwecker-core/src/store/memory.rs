use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Cache, CacheStorage, CachedEntry};
use crate::error::StoreResult;
use crate::http::{CacheKey, Response};

/// In-process cache generation.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<CacheKey, CachedEntry>>,
    complete: AtomicBool,
}

#[async_trait]
impl Cache for MemoryCache {
    async fn match_request(&self, key: &CacheKey) -> StoreResult<Option<Response>> {
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.response.clone()))
    }

    async fn put(&self, key: CacheKey, response: Response) -> StoreResult<()> {
        let entry = CachedEntry::new(key.clone(), response);
        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(CacheKey, Response)>) -> StoreResult<()> {
        // Single write lock: readers see all of the batch or none of it
        let mut map = self.entries.write().await;
        for (key, response) in entries {
            let entry = CachedEntry::new(key.clone(), response);
            map.insert(key, entry);
        }
        Ok(())
    }

    async fn delete_entry(&self, key: &CacheKey) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn entries(&self) -> StoreResult<Vec<CachedEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn mark_complete(&self) -> StoreResult<()> {
        self.complete.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_complete(&self) -> StoreResult<bool> {
        Ok(self.complete.load(Ordering::SeqCst))
    }
}

/// In-process `CacheStorage`. Clone shares the underlying generations.
#[derive(Clone, Default)]
pub struct MemoryCacheStorage {
    generations: Arc<RwLock<BTreeMap<String, Arc<MemoryCache>>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle to a generation, without creating it.
    pub async fn generation(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.generations.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>> {
        if let Some(existing) = self.generations.read().await.get(name) {
            return Ok(existing.clone());
        }
        let mut generations = self.generations.write().await;
        let cache = generations
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::default()))
            .clone();
        Ok(cache)
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.generations.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        Ok(self.generations.write().await.remove(name).is_some())
    }
}
