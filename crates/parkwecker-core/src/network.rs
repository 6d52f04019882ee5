//! Network Fetch capability.
//!
//! `Fetcher` is the seam the strategies call through; `HttpFetcher` is the
//! production implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use tracing::debug;

use crate::error::FetchError;
use crate::http::{Headers, Request, RequestMode, Response, ResponseType};

/// HTTP request timeout in seconds.
/// Slow mobile links need headroom, but a dead link must still fall back to cache.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// fetch(request) -> response | transport failure
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Network fetcher for one application scope.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    scope: Url,
}

impl HttpFetcher {
    pub fn new(scope: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, scope })
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin()
    }

    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        if self.is_same_origin(final_url) {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if request.mode == RequestMode::SameOrigin && !self.is_same_origin(&request.url) {
            return Err(FetchError::Unsupported(format!(
                "cross-origin request in same-origin mode: {}",
                request.url
            )));
        }

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if request.is_navigation() {
            builder = builder.header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8");
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(request.url.to_string())
            } else {
                FetchError::Network(e)
            }
        })?;

        let final_url = response.url().clone();
        let response_type = self.classify(request, &final_url);
        if response_type == ResponseType::Opaque {
            debug!(url = %request.url, "Cross-origin no-cors response is opaque");
            return Ok(Response::opaque().with_url(final_url.as_str()));
        }

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect();
        let body = response.bytes().await?;

        debug!(url = %request.url, status = status, bytes = body.len(), "Network response");
        Ok(Response::new(status, headers, body.to_vec())
            .with_type(response_type)
            .with_url(final_url.as_str()))
    }
}
