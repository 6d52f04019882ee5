//! ParkWecker CLI - host for the offline caching agent.
//!
//! Drives the worker lifecycle against the on-disk cache store and the
//! network, and routes single requests the way the page's requests would be.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parkwecker_core::{
    Cache, CacheStorage, Config, DiskCacheStorage, FetchOutcome, Fetcher, HttpFetcher, Method,
    Request, RequestMode, ServiceWorker,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: parkwecker <command>

Commands:
  install                                  Cache the core files, then activate
  activate                                 Delete stale cache generations
  fetch <url> [--navigate] [--method M]    Route one request through the cache
  status                                   List cache generations and entries
  help                                     Show this message

Environment:
  RUST_LOG            Log filter (default: warn)
  PARKWECKER_SCOPE    Override the configured application scope URL";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Everything a command needs, built from the config.
struct Host {
    config: Config,
    storage: Arc<DiskCacheStorage>,
    fetcher: Arc<HttpFetcher>,
    worker: ServiceWorker,
}

impl Host {
    fn new() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        let cache_dir = config.cache_dir()?;
        let storage = Arc::new(
            DiskCacheStorage::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?,
        );
        let fetcher = Arc::new(HttpFetcher::new(
            config.scope_url()?,
            config.request_timeout(),
        )?);
        let worker = ServiceWorker::from_config(&config, storage.clone(), fetcher.clone())?;
        Ok(Self {
            config,
            storage,
            fetcher,
            worker,
        })
    }

    /// Resume the installed generation, installing it first if needed.
    async fn ensure_active(&self) -> Result<()> {
        if !self.worker.resume().await? {
            self.install().await?;
        }
        Ok(())
    }

    async fn install(&self) -> Result<()> {
        let outcome = self
            .worker
            .install()
            .await
            .context("Install failed; previous generation stays in charge")?;
        println!(
            "Installed {} ({} core files)",
            outcome.generation,
            outcome.cached.len()
        );
        if outcome.skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        let outcome = self.worker.activate().await?;
        for name in &outcome.deleted {
            println!("Deleted stale generation {}", name);
        }
        for name in &outcome.failed {
            eprintln!("Could not delete stale generation {}", name);
        }
        println!("Active generation: {}", self.worker.cache_name());
        Ok(())
    }

    async fn fetch(&self, request: Request) -> Result<()> {
        self.ensure_active().await?;

        match self.worker.handle_fetch(request).await {
            FetchOutcome::PassThrough(request) => {
                let response = self
                    .fetcher
                    .fetch(&request)
                    .await
                    .with_context(|| format!("Request to {} failed", request.url))?;
                println!("{} {} (pass-through)", response.status, request.url);
                println!("{} bytes", response.body.len());
            }
            outcome @ FetchOutcome::Respond { .. } => {
                if let Some(resolved) = outcome.settle().await {
                    let response = &resolved.response;
                    println!("{} from {}", response.status, resolved.source);
                    if let Some(content_type) = response.content_type() {
                        println!("content-type: {}", content_type);
                    }
                    println!("{} bytes", response.body.len());
                }
            }
        }
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        println!("Scope: {}", self.config.scope);
        println!("Cache: {}", self.storage.root().display());

        let names = self.storage.keys().await?;
        if names.is_empty() {
            println!("No cache generations");
            return Ok(());
        }
        for name in names {
            let cache = self.storage.open(&name).await?;
            let current = if name == self.config.cache_name { " (current)" } else { "" };
            let unfinished = if cache.is_complete().await? { "" } else { " (incomplete)" };
            println!("{}{}{}", name, current, unfinished);
            for entry in cache.entries().await? {
                println!(
                    "  {:>3} {:>9} {:>10}  {}",
                    entry.response.status,
                    entry.response.body.len(),
                    entry.age_display(),
                    entry.key
                );
            }
        }
        Ok(())
    }
}

fn parse_fetch_args(args: &[String], host: &Host) -> Result<Request> {
    let mut url = None;
    let mut mode = RequestMode::NoCors;
    let mut method = "GET".to_string();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--navigate" => mode = RequestMode::Navigate,
            "--method" => {
                method = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--method needs a value"))?
                    .to_uppercase();
            }
            other if other.starts_with("--") => bail!("Unknown option: {}\n\n{}", other, USAGE),
            other => url = Some(other.to_string()),
        }
    }

    let url = url.ok_or_else(|| anyhow::anyhow!("fetch needs a URL\n\n{}", USAGE))?;
    // Relative URLs resolve against the scope, like the page's own requests
    let url = host
        .config
        .scope_url()?
        .join(&url)
        .with_context(|| format!("Invalid URL: {}", url))?;
    let method: Method = method
        .parse()
        .with_context(|| format!("Invalid method: {}", method))?;
    Ok(Request::new(method, url, mode))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let host = Host::new()?;
    info!(command = command, cache = %host.config.cache_name, "ParkWecker starting");

    match command {
        "install" => host.install().await,
        "activate" => {
            if !host.worker.resume().await? {
                bail!("Nothing installed yet. Run: parkwecker install");
            }
            host.activate().await
        }
        "fetch" => {
            let request = parse_fetch_args(&args[2..], &host)?;
            host.fetch(request).await
        }
        "status" => host.status().await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}
