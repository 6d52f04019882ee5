//! ParkWecker offline caching agent.
//!
//! Intercepts the app's requests and answers them from a local cache
//! generation where possible:
//!
//! - `worker`: `ServiceWorker`, the install/activate/fetch interface a host drives
//! - `lifecycle`: core file pre-caching and stale generation cleanup
//! - `router` + `strategy`: request classification and resolution
//! - `store`: the Cache Store capability (memory and disk backends)
//! - `network`: the Network Fetch capability (`reqwest` backend)

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod router;
pub mod store;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{Config, CACHE_NAME, CORE_FILES};
pub use error::{FetchError, InstallError, LifecycleError, StoreError};
pub use http::{CacheKey, Headers, Method, Request, RequestMode, Response, ResponseType};
pub use lifecycle::{ActivateOutcome, InstallOutcome, WorkerState};
pub use network::{Fetcher, HttpFetcher};
pub use router::Route;
pub use store::{Cache, CacheStorage, CachedEntry, DiskCacheStorage, MemoryCacheStorage};
pub use strategy::{PendingWrites, Resolved, ResponseSource};
pub use worker::{FetchOutcome, ServiceWorker};
