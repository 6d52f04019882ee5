//! Install and activate transitions.
//!
//! Install pre-populates the current generation with the core files as one
//! all-or-nothing unit. Activate deletes every other generation, each
//! deletion independent of the rest.

use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use reqwest::{Method, Url};
use tracing::{debug, info, warn};

use crate::error::{InstallError, StoreResult};
use crate::http::{CacheKey, Request, RequestMode, Response};
use crate::network::Fetcher;
use crate::store::{Cache, CacheStorage};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker will never control clients.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub generation: String,
    pub cached: Vec<CacheKey>,
    /// Take over without waiting for open clients to close.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivateOutcome {
    pub deleted: Vec<String>,
    /// Stale generations whose deletion failed; left for the next activation.
    pub failed: Vec<String>,
    pub clients_claimed: bool,
}

/// Install/activate operations for one cache generation.
#[derive(Clone)]
pub struct Lifecycle {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    cache_name: String,
    scope: Url,
    core_files: Vec<String>,
}

impl Lifecycle {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        cache_name: impl Into<String>,
        scope: Url,
        core_files: Vec<String>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            cache_name: cache_name.into(),
            scope,
            core_files,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Whether a finished install of the current generation is in the store.
    /// A generation left behind by an interrupted install does not count.
    pub async fn is_installed(&self) -> StoreResult<bool> {
        if !self.storage.has(&self.cache_name).await? {
            return Ok(false);
        }
        self.storage.open(&self.cache_name).await?.is_complete().await
    }

    fn core_requests(&self) -> Result<Vec<Request>, InstallError> {
        self.core_files
            .iter()
            .map(|path| {
                self.scope
                    .join(path)
                    .map(|url| Request::new(Method::GET, url, RequestMode::Cors))
                    .map_err(|e| InstallError::InvalidPath {
                        path: path.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    async fn fetch_core(&self, request: Request) -> Result<(CacheKey, Response), InstallError> {
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| InstallError::Fetch {
                url: request.url.to_string(),
                source,
            })?;
        if !response.is_cacheable() {
            return Err(InstallError::BadResponse {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        debug!(url = %request.url, bytes = response.body.len(), "Fetched core file");
        Ok((request.cache_key(), response))
    }

    /// Fetch every core file, then store them together. Nothing is written
    /// unless every fetch succeeded, and a generation the store fails to
    /// populate is removed again unless an earlier install completed it.
    pub async fn install(&self) -> Result<InstallOutcome, InstallError> {
        info!(cache = %self.cache_name, files = self.core_files.len(), "Installing");
        let requests = self.core_requests()?;
        let entries = try_join_all(requests.into_iter().map(|r| self.fetch_core(r))).await?;
        let cached: Vec<CacheKey> = entries.iter().map(|(key, _)| key.clone()).collect();

        let was_installed = self.is_installed().await?;
        if let Err(e) = self.store_core(entries).await {
            if !was_installed {
                self.discard_partial().await;
            }
            return Err(e.into());
        }

        info!(cache = %self.cache_name, "Core files cached");
        Ok(InstallOutcome {
            generation: self.cache_name.clone(),
            cached,
            skip_waiting: true,
        })
    }

    async fn store_core(&self, entries: Vec<(CacheKey, Response)>) -> StoreResult<()> {
        let cache = self.storage.open(&self.cache_name).await?;
        cache.put_all(entries).await?;
        cache.mark_complete().await
    }

    async fn discard_partial(&self) {
        match self.storage.delete(&self.cache_name).await {
            Ok(true) => warn!(cache = %self.cache_name, "Removed partially installed generation"),
            Ok(false) => {}
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "Failed to remove partially installed generation")
            }
        }
    }

    /// Delete every generation except the current one, best effort each.
    pub async fn activate(&self) -> ActivateOutcome {
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list cache generations, skipping cleanup");
                return ActivateOutcome {
                    clients_claimed: true,
                    ..Default::default()
                };
            }
        };

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        let mut outcome = ActivateOutcome::default();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => {
                    info!(cache = %name, "Deleted stale cache generation");
                    outcome.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete stale cache generation");
                    outcome.failed.push(name);
                }
            }
        }
        outcome.clients_claimed = true;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CACHE_NAME, CORE_FILES};
    use crate::store::disk::entry_file_name;
    use crate::store::{DiskCacheStorage, MemoryCacheStorage};
    use crate::testing::{ok, url, FaultyStorage, ScriptedFetcher, SCOPE};
    use crate::worker::ServiceWorker;

    fn core_files() -> Vec<String> {
        CORE_FILES.iter().map(|s| s.to_string()).collect()
    }

    fn lifecycle(storage: Arc<dyn CacheStorage>, fetcher: Arc<ScriptedFetcher>) -> Lifecycle {
        Lifecycle::new(storage, fetcher, CACHE_NAME, SCOPE.parse().unwrap(), core_files())
    }

    fn serve_core(fetcher: &ScriptedFetcher) {
        for path in CORE_FILES {
            fetcher.respond(path, ok(&format!("body of {}", path)));
        }
    }

    async fn snapshot(storage: &MemoryCacheStorage) -> Vec<(CacheKey, Response)> {
        storage
            .open(CACHE_NAME)
            .await
            .unwrap()
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.key, e.response))
            .collect()
    }

    #[tokio::test]
    async fn test_install_caches_every_core_file() {
        let storage = MemoryCacheStorage::new();
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);

        let outcome = lifecycle(Arc::new(storage.clone()), fetcher.clone())
            .install()
            .await
            .unwrap();

        assert_eq!(outcome.generation, CACHE_NAME);
        assert!(outcome.skip_waiting);
        assert_eq!(outcome.cached.len(), CORE_FILES.len());
        assert_eq!(fetcher.calls(), CORE_FILES.len());

        let cache = storage.open(CACHE_NAME).await.unwrap();
        for path in CORE_FILES {
            let hit = cache
                .match_request(&CacheKey::from_url(&url(path)))
                .await
                .unwrap();
            assert_eq!(hit.unwrap().text(), format!("body of {}", path));
        }
    }

    #[tokio::test]
    async fn test_install_marks_generation_complete() {
        let storage = MemoryCacheStorage::new();
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        let lifecycle = lifecycle(Arc::new(storage.clone()), fetcher);

        assert!(!lifecycle.is_installed().await.unwrap());
        lifecycle.install().await.unwrap();
        assert!(lifecycle.is_installed().await.unwrap());

        // A generation that merely exists is not installed
        let other = Lifecycle::new(
            Arc::new(storage.clone()),
            ScriptedFetcher::new(),
            "parkwecker-v11",
            SCOPE.parse().unwrap(),
            core_files(),
        );
        storage.open("parkwecker-v11").await.unwrap();
        assert!(!other.is_installed().await.unwrap());
    }

    /// Puts a directory where the entry file for `path` goes, so the store
    /// cannot commit that entry.
    fn block_entry(root: &std::path::Path, path: &str) {
        let dir = root.join(CACHE_NAME);
        let entry = dir.join(entry_file_name(&CacheKey::from_url(&url(path))));
        std::fs::create_dir_all(&dir).unwrap();
        let _ = std::fs::remove_file(&entry);
        std::fs::create_dir(&entry).unwrap();
    }

    #[tokio::test]
    async fn test_failed_disk_install_leaves_nothing_to_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(DiskCacheStorage::new(tmp.path().to_path_buf()).unwrap());
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        block_entry(tmp.path(), "./icon-512.png");

        let err = lifecycle(storage.clone(), fetcher.clone())
            .install()
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Store(_)));
        assert!(!storage.has(CACHE_NAME).await.unwrap());

        let restarted = ServiceWorker::new(
            storage.clone(),
            fetcher,
            CACHE_NAME,
            SCOPE.parse().unwrap(),
            core_files(),
        )
        .unwrap();
        assert!(!restarted.resume().await.unwrap());
        assert_eq!(restarted.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_failed_reinstall_keeps_completed_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(DiskCacheStorage::new(tmp.path().to_path_buf()).unwrap());
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        let lifecycle = lifecycle(storage.clone(), fetcher);
        lifecycle.install().await.unwrap();

        block_entry(tmp.path(), "./icon-512.png");
        assert!(lifecycle.install().await.is_err());

        assert!(lifecycle.is_installed().await.unwrap());
        let cache = storage.open(CACHE_NAME).await.unwrap();
        let shell = cache.match_request(&CacheKey::from_url(&url("./"))).await.unwrap();
        assert_eq!(shell.unwrap().text(), "body of ./");
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let storage = MemoryCacheStorage::new();
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        fetcher.fail("./icon-512.png");

        let err = lifecycle(Arc::new(storage.clone()), fetcher)
            .install()
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Fetch { .. }));
        assert!(!storage.has(CACHE_NAME).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_rejects_non_200_core_file() {
        let storage = MemoryCacheStorage::new();
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        fetcher.respond("./manifest.json", Response::new(404, Default::default(), ""));

        let err = lifecycle(Arc::new(storage.clone()), fetcher)
            .install()
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::BadResponse { status: 404, .. }));
        assert!(storage.generation(CACHE_NAME).await.is_none());
    }

    #[tokio::test]
    async fn test_install_store_failure_is_fatal() {
        let storage = FaultyStorage::new();
        storage.set_fail_open(true);
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);

        let err = lifecycle(storage, fetcher).install().await.unwrap_err();
        assert!(matches!(err, InstallError::Store(_)));
    }

    #[tokio::test]
    async fn test_install_twice_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        let fetcher = ScriptedFetcher::new();
        serve_core(&fetcher);
        let lifecycle = lifecycle(Arc::new(storage.clone()), fetcher);

        lifecycle.install().await.unwrap();
        let first = snapshot(&storage).await;
        lifecycle.install().await.unwrap();
        let second = snapshot(&storage).await;

        assert_eq!(first, second);
        assert_eq!(second.len(), CORE_FILES.len());
    }

    #[tokio::test]
    async fn test_activate_keeps_only_current_generation() {
        let storage = MemoryCacheStorage::new();
        storage.open("v9").await.unwrap();
        storage.open("v10").await.unwrap();

        let lifecycle = Lifecycle::new(
            Arc::new(storage.clone()),
            ScriptedFetcher::new(),
            "v10",
            SCOPE.parse().unwrap(),
            core_files(),
        );
        let outcome = lifecycle.activate().await;

        assert_eq!(outcome.deleted, vec!["v9"]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.clients_claimed);
        assert_eq!(storage.keys().await.unwrap(), vec!["v10"]);
    }

    #[tokio::test]
    async fn test_activate_deletion_failure_does_not_stop_others() {
        let storage = FaultyStorage::new();
        for name in ["parkwecker-v7", "parkwecker-v8", "parkwecker-v9", CACHE_NAME] {
            storage.open(name).await.unwrap();
        }
        storage.fail_delete_of("parkwecker-v8");

        let outcome = lifecycle(storage.clone(), ScriptedFetcher::new())
            .activate()
            .await;

        assert_eq!(outcome.deleted, vec!["parkwecker-v7", "parkwecker-v9"]);
        assert_eq!(outcome.failed, vec!["parkwecker-v8"]);
        assert_eq!(
            storage.keys().await.unwrap(),
            vec![CACHE_NAME.to_string(), "parkwecker-v8".to_string()]
        );
    }

    #[tokio::test]
    async fn test_activate_survives_enumeration_failure() {
        let storage = FaultyStorage::new();
        storage.open("parkwecker-v9").await.unwrap();
        storage.set_fail_keys(true);

        let outcome = lifecycle(storage.clone(), ScriptedFetcher::new())
            .activate()
            .await;

        assert!(outcome.deleted.is_empty());
        assert!(outcome.clients_claimed);
        assert!(storage.inner.has("parkwecker-v9").await.unwrap());
    }
}
