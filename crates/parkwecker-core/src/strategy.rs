//! Resolution strategies for intercepted GET requests.
//!
//! - Navigation: network first, then the cached shell, then a network error.
//! - Asset: cache first, then network (storing 200 non-opaque responses),
//!   then the cached shell, then the synthetic offline response.
//!
//! Neither strategy returns an error: every path ends in a `Response`.
//! Cache writes run as detached tasks collected in `PendingWrites`; the
//! response is returned without waiting for them, so a concurrent write to
//! the same key may land in either order (last write wins).

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::http::{CacheKey, Request, Response};
use crate::network::Fetcher;
use crate::store::{Cache, CacheStorage};

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached application shell served in place of the request.
    Shell,
    /// Synthetic 503 notice.
    Offline,
    /// Empty network-error result.
    NetworkError,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Shell => "shell",
            ResponseSource::Offline => "offline",
            ResponseSource::NetworkError => "network-error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub response: Response,
    pub source: ResponseSource,
}

impl Resolved {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Background cache writes started while resolving a request.
///
/// Dropping this detaches the writes; they may still complete.
#[derive(Debug, Default)]
pub struct PendingWrites {
    tasks: Vec<JoinHandle<()>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Wait until every pending write has finished (or failed).
    pub async fn settle(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background cache write task did not complete");
            }
        }
    }
}

/// Shared inputs of both strategies.
#[derive(Clone)]
pub struct Strategies {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    cache_name: Arc<str>,
    shell_key: CacheKey,
}

impl Strategies {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        cache_name: impl Into<Arc<str>>,
        shell_key: CacheKey,
    ) -> Self {
        Self {
            storage,
            fetcher,
            cache_name: cache_name.into(),
            shell_key,
        }
    }

    /// Open the current generation, treating a store failure as "no cache".
    async fn open_current(&self) -> Option<Arc<dyn Cache>> {
        match self.storage.open(&self.cache_name).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "Failed to open cache generation");
                None
            }
        }
    }

    /// Look up a key, treating a store failure as a miss.
    async fn lookup(cache: &dyn Cache, key: &CacheKey) -> Option<Response> {
        match cache.match_request(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    fn spawn_put(cache: Arc<dyn Cache>, key: CacheKey, response: Response) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = cache.put(key.clone(), response).await {
                warn!(key = %key, error = %e, "Failed to store response in cache");
            }
        })
    }

    /// Network first; on success the response also replaces the shell entry.
    pub async fn navigation(&self, request: &Request, pending: &mut PendingWrites) -> Resolved {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                // Every navigation collapses onto the one shell entry
                let storage = self.storage.clone();
                let cache_name = self.cache_name.clone();
                let key = self.shell_key.clone();
                let copy = response.clone();
                pending.push(tokio::spawn(async move {
                    match storage.open(&cache_name).await {
                        Ok(cache) => {
                            if let Err(e) = cache.put(key.clone(), copy).await {
                                warn!(key = %key, error = %e, "Failed to update cached shell");
                            }
                        }
                        Err(e) => {
                            warn!(cache = %cache_name, error = %e, "Failed to open cache generation");
                        }
                    }
                }));
                debug!(url = %request.url, status = response.status, "Navigation served from network");
                Resolved::new(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation fetch failed, trying cached shell");
                let shell = match self.open_current().await {
                    Some(cache) => Self::lookup(cache.as_ref(), &self.shell_key).await,
                    None => None,
                };
                match shell {
                    Some(shell) => Resolved::new(shell, ResponseSource::Shell),
                    None => {
                        warn!(url = %request.url, "Offline navigation with no cached shell");
                        Resolved::new(Response::network_error(), ResponseSource::NetworkError)
                    }
                }
            }
        }
    }

    /// Cache first; a hit never touches the network.
    pub async fn asset(&self, request: &Request, pending: &mut PendingWrites) -> Resolved {
        let key = request.cache_key();
        let cache = self.open_current().await;

        if let Some(cache) = &cache {
            if let Some(hit) = Self::lookup(cache.as_ref(), &key).await {
                debug!(key = %key, "Cache hit");
                return Resolved::new(hit, ResponseSource::Cache);
            }
        }
        debug!(key = %key, "Cache miss");

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    if let Some(cache) = &cache {
                        pending.push(Self::spawn_put(cache.clone(), key, response.clone()));
                    }
                } else {
                    debug!(
                        key = %key,
                        status = response.status,
                        opaque = response.is_opaque(),
                        "Response not cacheable"
                    );
                }
                Resolved::new(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Asset fetch failed, trying cached shell");
                let shell = match &cache {
                    Some(cache) => Self::lookup(cache.as_ref(), &self.shell_key).await,
                    None => None,
                };
                match shell {
                    Some(shell) => Resolved::new(shell, ResponseSource::Shell),
                    None => Resolved::new(Response::offline(), ResponseSource::Offline),
                }
            }
        }
    }
}
