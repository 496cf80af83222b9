//! Throttled HTTP transports.
//!
//! A [`Transport`] issues requests through an [`HttpBackend`], spacing them
//! with its own [`Throttle`]. A transport built with an [`HttpCache`] answers
//! GET requests from disk when it can; such hits skip both the throttle and
//! the network.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use sha2::{Digest, Sha256};

use crate::config::CrawlerConfig;
use crate::error::{Error, Result, TransportError};
use crate::store::Store;
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Form fields, sent url-encoded in the body of a POST
    pub form: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            form: vec![],
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form,
        }
    }
}

/// Performs a single request and returns the raw response body.
pub trait HttpBackend: Send + Sync {
    fn execute(&self, request: &Request) -> Result<Vec<u8>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::blocking::Client,
}

impl ReqwestBackend {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(&config.user_agent).map_err(|e| {
            Error::config(format!("userAgent: {:?}, {e}", config.user_agent))
        })?;
        headers.insert(USER_AGENT, ua);

        let mut builder = reqwest::blocking::ClientBuilder::new()
            .default_headers(headers)
            .gzip(true)
            .deflate(true);
        if let Some(timeout) = config.timeout()? {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| TransportError::Request {
            url: String::new(),
            reason: e.to_string(),
        })?;

        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let failed = |e: reqwest::Error| TransportError::Request {
            url: request.url.clone(),
            reason: e.to_string(),
        };

        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        let resp = builder.send().map_err(failed)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(resp.bytes().map_err(failed)?.to_vec())
    }
}

/// Response bodies keyed by the exact request URL.
///
/// Entries never expire, use an uncached transport to fetch a fresh copy.
#[derive(Debug, Clone)]
pub struct HttpCache {
    store: Store,
}

impl HttpCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            store: Store::new(dir.as_ref()),
        }
    }

    /// File name of the entry for `url`: the hex SHA-256 of the URL.
    pub fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.store.contains(Self::key(url))
    }

    pub fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        self.store.read(Self::key(url))
    }

    pub fn put(&self, url: &str, body: &[u8]) -> Result<()> {
        self.store.save(Self::key(url), body)
    }
}

pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    throttle: Throttle,
    cache: Option<HttpCache>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("throttle", &self.throttle)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>, interval: Duration) -> Self {
        Self {
            backend,
            throttle: Throttle::new(interval),
            cache: None,
        }
    }

    pub fn cached(backend: Arc<dyn HttpBackend>, interval: Duration, cache: HttpCache) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new(backend, interval)
        }
    }

    pub fn interval(&self) -> Duration {
        self.throttle.interval()
    }

    pub fn request(&self, request: &Request) -> Result<Vec<u8>> {
        match (&self.cache, request.method) {
            (Some(cache), Method::Get) => {
                if let Some(body) = cache.get(&request.url)? {
                    log::debug!("cached {}", request.url);
                    return Ok(body);
                }
                let body = self.fetch(request)?;
                cache.put(&request.url, &body)?;
                Ok(body)
            }
            _ => self.fetch(request),
        }
    }

    fn fetch(&self, request: &Request) -> Result<Vec<u8>> {
        self.throttle.wait();
        log::info!("{} {}", request.method, request.url);
        Ok(self.backend.execute(request)?)
    }
}
