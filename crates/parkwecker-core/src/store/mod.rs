//! Cache Store capability.
//!
//! A `CacheStorage` holds named cache generations; each generation is a
//! `Cache` mapping request identity to a response snapshot. Operations are
//! atomic per key only. Two backends are provided:
//! - `MemoryCacheStorage`: in-process maps
//! - `DiskCacheStorage`: one directory per generation

pub mod disk;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::http::{CacheKey, Response};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Stored response plus the time it was captured.
///
/// There is no expiry. The timestamp is informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: CacheKey,
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(key: CacheKey, response: Response) -> Self {
        Self {
            key,
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// One cache generation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a stored response by request identity.
    async fn match_request(&self, key: &CacheKey) -> StoreResult<Option<Response>>;

    /// Store a response snapshot, replacing any previous one.
    async fn put(&self, key: CacheKey, response: Response) -> StoreResult<()>;

    /// Store several snapshots as one unit. Backends prepare everything
    /// before writing; the default just writes in order.
    async fn put_all(&self, entries: Vec<(CacheKey, Response)>) -> StoreResult<()> {
        for (key, response) in entries {
            self.put(key, response).await?;
        }
        Ok(())
    }

    /// Remove one entry. Returns whether it existed.
    async fn delete_entry(&self, key: &CacheKey) -> StoreResult<bool>;

    /// All entries, in key order.
    async fn entries(&self) -> StoreResult<Vec<CachedEntry>>;

    /// Record that an install finished populating this generation.
    async fn mark_complete(&self) -> StoreResult<()>;

    /// Whether `mark_complete` succeeded for this generation.
    async fn is_complete(&self) -> StoreResult<bool>;
}

/// Named set of cache generations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>>;

    /// Names of all existing generations.
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    async fn has(&self, name: &str) -> StoreResult<bool> {
        Ok(self.keys().await?.iter().any(|n| n == name))
    }
}
