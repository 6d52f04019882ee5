//! Request and response model shared by the router, strategies and stores.
//!
//! Responses are plain snapshots (status, headers, body) so the same value
//! can be handed to the caller and stored in a cache generation.

use std::collections::BTreeMap;
use std::fmt;

pub use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// Body of the synthetic response returned when nothing else can answer.
pub const OFFLINE_BODY: &str = "Offline – keine Verbindung.";

/// Content type of the synthetic offline response.
pub const OFFLINE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Status code of the synthetic offline response (Service Unavailable).
pub const OFFLINE_STATUS: u16 = 503;

/// How the page issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

/// Intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Headers,
}

impl Request {
    pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
        Self {
            method,
            url,
            mode,
            headers: Headers::default(),
        }
    }

    /// Subresource GET in `no-cors` mode, the default for `<img>` and friends.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::NoCors)
    }

    pub fn navigate(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::Navigate)
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Identity under which this request is stored in a cache generation.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_url(&self.url)
    }
}

/// Request identity: absolute URL without fragment. The query is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Request> for CacheKey {
    fn from(request: &Request) -> Self {
        request.cache_key()
    }
}

/// Case-insensitive header map. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Visibility class of a response, mirroring what a page may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response readable under CORS.
    Cors,
    /// Cross-origin `no-cors` response: status 0, no headers, no body.
    Opaque,
    /// Network error result.
    Error,
}

/// Response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub response_type: ResponseType,
    /// Final URL, if the response came from the network.
    pub url: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            response_type: ResponseType::Basic,
            url: None,
        }
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Opaque cross-origin response. Nothing about it can be inspected.
    pub fn opaque() -> Self {
        Self::new(0, Headers::new(), Vec::new()).with_type(ResponseType::Opaque)
    }

    /// Generic network error with no body.
    pub fn network_error() -> Self {
        Self::new(0, Headers::new(), Vec::new()).with_type(ResponseType::Error)
    }

    /// Plain-text notice served when neither cache nor network can answer.
    pub fn offline() -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type", OFFLINE_CONTENT_TYPE);
        Self::new(OFFLINE_STATUS, headers, OFFLINE_BODY.as_bytes())
    }

    pub fn is_opaque(&self) -> bool {
        self.response_type == ResponseType::Opaque
    }

    pub fn is_network_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Only complete, inspectable 200 responses are written to a generation.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && !self.is_opaque()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cache_key_drops_fragment_keeps_query() {
        let a = Request::get(url("http://localhost/app.js?v=2#top"));
        let b = Request::get(url("http://localhost/app.js?v=2"));
        let c = Request::get(url("http://localhost/app.js?v=3"));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(b.cache_key(), c.cache_key());
        assert_eq!(a.cache_key().as_str(), "http://localhost/app.js?v=2");
    }

    #[test]
    fn test_offline_response_contract() {
        let response = Response::offline();
        assert_eq!(response.status, 503);
        assert_eq!(response.content_type(), Some("text/plain; charset=utf-8"));
        assert!(!response.body.is_empty());
        assert_eq!(response.text(), OFFLINE_BODY);
    }

    #[test]
    fn test_network_error_has_no_body() {
        let response = Response::network_error();
        assert!(response.is_network_error());
        assert!(response.body.is_empty());
        assert_eq!(response.status, 0);
    }

    #[test]
    fn test_cacheable_requires_200_and_non_opaque() {
        assert!(Response::new(200, Headers::new(), "ok").is_cacheable());
        assert!(Response::new(200, Headers::new(), "ok")
            .with_type(ResponseType::Cors)
            .is_cacheable());
        assert!(!Response::new(404, Headers::new(), "missing").is_cacheable());
        assert!(!Response::new(206, Headers::new(), "part").is_cacheable());
        assert!(!Response::opaque().is_cacheable());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers: Headers = [("Content-Type", "text/html")].into_iter().collect();
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    }
}
