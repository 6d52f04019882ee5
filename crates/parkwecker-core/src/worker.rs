//! The caching agent as seen by its host.
//!
//! The host drives three operations at defined lifecycle moments and awaits
//! each one: `install`, `activate` and `handle_fetch`.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, SHELL_PATH};
use crate::error::{InstallError, LifecycleError, StoreError};
use crate::http::{CacheKey, Request};
use crate::lifecycle::{ActivateOutcome, InstallOutcome, Lifecycle, WorkerState};
use crate::network::Fetcher;
use crate::router::Route;
use crate::store::CacheStorage;
use crate::strategy::{PendingWrites, Resolved, Strategies};

/// Result of one intercepted fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host performs its default network fetch.
    PassThrough(Request),
    Respond {
        resolved: Resolved,
        /// Cache writes still running after the response was produced.
        pending: PendingWrites,
    },
}

impl FetchOutcome {
    pub fn resolved(&self) -> Option<&Resolved> {
        match self {
            FetchOutcome::Respond { resolved, .. } => Some(resolved),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    /// Wait for background cache writes, if any.
    pub async fn settle(self) -> Option<Resolved> {
        match self {
            FetchOutcome::Respond { resolved, pending } => {
                pending.settle().await;
                Some(resolved)
            }
            FetchOutcome::PassThrough(_) => None,
        }
    }
}

pub struct ServiceWorker {
    lifecycle: Lifecycle,
    strategies: Strategies,
    state: watch::Sender<WorkerState>,
}

impl ServiceWorker {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        cache_name: &str,
        scope: Url,
        core_files: Vec<String>,
    ) -> Result<Self, InstallError> {
        let shell = scope
            .join(SHELL_PATH)
            .map_err(|e| InstallError::InvalidPath {
                path: SHELL_PATH.to_string(),
                reason: e.to_string(),
            })?;
        let strategies = Strategies::new(
            storage.clone(),
            fetcher.clone(),
            cache_name,
            CacheKey::from_url(&shell),
        );
        let lifecycle = Lifecycle::new(storage, fetcher, cache_name, scope, core_files);
        let (state, _) = watch::channel(WorkerState::Parsed);
        Ok(Self {
            lifecycle,
            strategies,
            state,
        })
    }

    pub fn from_config(
        config: &Config,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> anyhow::Result<Self> {
        let scope = config.scope_url()?;
        Ok(Self::new(
            storage,
            fetcher,
            &config.cache_name,
            scope,
            config.core_files.clone(),
        )?)
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn cache_name(&self) -> &str {
        self.lifecycle.cache_name()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Worker state change");
    }

    /// Pre-populate the current generation. On failure the worker becomes
    /// redundant and never activates.
    pub async fn install(&self) -> Result<InstallOutcome, InstallError> {
        let state = self.state();
        if state != WorkerState::Parsed {
            return Err(LifecycleError::InvalidState {
                operation: "install",
                state,
            }
            .into());
        }

        self.transition(WorkerState::Installing);
        match self.lifecycle.install().await {
            Ok(outcome) => {
                self.transition(WorkerState::Installed);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Install failed");
                self.transition(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Pick up a generation installed by an earlier run of the host.
    ///
    /// A fresh worker whose generation was completely installed goes straight
    /// to activated. Returns false, leaving the worker parsed, when it was not.
    pub async fn resume(&self) -> Result<bool, StoreError> {
        if self.state() != WorkerState::Parsed {
            return Ok(self.controls_clients());
        }
        if !self.lifecycle.is_installed().await? {
            return Ok(false);
        }
        info!(cache = %self.cache_name(), "Resuming installed generation");
        self.transition(WorkerState::Activated);
        Ok(true)
    }

    /// Remove stale generations and claim clients. Repeating activation of an
    /// active worker reruns the cleanup.
    pub async fn activate(&self) -> Result<ActivateOutcome, LifecycleError> {
        let state = self.state();
        if !matches!(state, WorkerState::Installed | WorkerState::Activated) {
            return Err(LifecycleError::InvalidState {
                operation: "activate",
                state,
            });
        }

        self.transition(WorkerState::Activating);
        let outcome = self.lifecycle.activate().await;
        self.transition(WorkerState::Activated);
        info!(
            cache = %self.cache_name(),
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "Activated"
        );
        Ok(outcome)
    }

    /// Whether fetches are currently intercepted.
    pub fn controls_clients(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    /// Synchronous routing decision for a request.
    pub fn route(&self, request: &Request) -> Route {
        if !self.controls_clients() {
            return Route::PassThrough;
        }
        Route::classify(request)
    }

    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        let route = self.route(&request);
        let mut pending = PendingWrites::new();
        let resolved = match route {
            Route::PassThrough => return FetchOutcome::PassThrough(request),
            Route::Navigation => self.strategies.navigation(&request, &mut pending).await,
            Route::Asset => self.strategies.asset(&request, &mut pending).await,
        };
        debug!(
            url = %request.url,
            source = %resolved.source,
            status = resolved.response.status,
            "Fetch resolved"
        );
        FetchOutcome::Respond { resolved, pending }
    }
}
