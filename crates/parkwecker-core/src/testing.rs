//! Fakes for the store and network capabilities, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{FetchError, StoreError, StoreResult};
use crate::http::{Headers, Request, Response};
use crate::network::Fetcher;
use crate::store::{Cache, CacheStorage, MemoryCacheStorage};

pub const SCOPE: &str = "http://localhost:8080/";

pub fn url(path: &str) -> reqwest::Url {
    reqwest::Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub fn ok(body: &str) -> Response {
    let headers: Headers = [("content-type", "text/html")].into_iter().collect();
    Response::new(200, headers, body)
}

enum Scripted {
    Respond(Response),
    Fail,
}

/// Fetcher answering from a script and counting calls.
/// Unscripted URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, Scripted>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, response: Response) {
        self.script
            .lock()
            .unwrap()
            .insert(url(path).to_string(), Scripted::Respond(response));
    }

    pub fn fail(&self, path: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(url(path).to_string(), Scripted::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline);
        }
        match self.script.lock().unwrap().get(request.url.as_str()) {
            Some(Scripted::Respond(response)) => Ok(response.clone()),
            Some(Scripted::Fail) => Err(FetchError::Offline),
            None => Ok(Response::new(404, Headers::new(), "not found")),
        }
    }
}

/// Memory storage with injectable failures.
#[derive(Default)]
pub struct FaultyStorage {
    pub inner: MemoryCacheStorage,
    fail_delete: Mutex<HashSet<String>>,
    fail_keys: AtomicBool,
    fail_open: AtomicBool,
}

impl FaultyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.fail_delete.lock().unwrap().insert(name.to_string());
    }

    pub fn set_fail_keys(&self, fail: bool) {
        self.fail_keys.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> StoreError {
        StoreError::io(what, std::io::Error::other("injected failure"))
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Self::injected(name));
        }
        self.inner.open(name).await
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        if self.fail_keys.load(Ordering::SeqCst) {
            return Err(Self::injected("keys"));
        }
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        if self.fail_delete.lock().unwrap().contains(name) {
            return Err(Self::injected(name));
        }
        self.inner.delete(name).await
    }
}
