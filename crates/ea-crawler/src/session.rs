//! Crawler session: the root directory of one site crawl and the transports
//! every request of that crawl goes through.
//!
//! ```text
//! <root>/cache/   raw HTTP responses, keyed by URL
//! <root>/files/   downloaded documents
//! <root>/data/    memoized results of the site scraper
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use sws_scraper::Html;

use crate::batch::{run_batch, BatchReport, Downloadable};
use crate::config::{CrawlerConfig, OnError};
use crate::error::{Error, Result, TransportError};
use crate::memo::{MemoContext, Memoized};
use crate::store::Store;
use crate::template::{Args, Bindings, Signature};
use crate::transport::{HttpBackend, HttpCache, Method, Request, ReqwestBackend, Transport};

pub const CACHE_DIR: &str = "cache";
pub const FILES_DIR: &str = "files";
pub const DATA_DIR: &str = "data";

type FetchFile = fn(&Session, &Bindings) -> Result<Vec<u8>>;

pub struct Session {
    store: Store,
    cached_get: Transport,
    uncached_get: Transport,
    post: Transport,
    download: Memoized<Vec<u8>, FetchFile>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.store.root())
            .field("cached_get", &self.cached_get)
            .field("uncached_get", &self.uncached_get)
            .field("post", &self.post)
            .finish()
    }
}

impl MemoContext for Session {
    fn store(&self) -> &Store {
        &self.store
    }
}

impl Session {
    pub fn open(root: impl Into<PathBuf>, config: &CrawlerConfig) -> Result<Self> {
        let backend = ReqwestBackend::new(config)?;
        Self::with_backend(root, config, Arc::new(backend))
    }

    pub fn with_backend(
        root: impl Into<PathBuf>,
        config: &CrawlerConfig,
        backend: Arc<dyn HttpBackend>,
    ) -> Result<Self> {
        let throttle = &config.throttle;
        let (get_interval, get_uncached_interval, post_interval) = (
            throttle.get_interval()?,
            throttle.get_uncached_interval()?,
            throttle.post_interval()?,
        );

        let store = Store::new(root);
        for dir in [CACHE_DIR, FILES_DIR, DATA_DIR] {
            fs::create_dir_all(store.path(dir))?;
        }

        let cache = HttpCache::new(store.path(CACHE_DIR));
        let cached_get = Transport::cached(backend.clone(), get_interval, cache);
        let uncached_get = Transport::new(backend.clone(), get_uncached_interval);
        let post = Transport::new(backend, post_interval);

        let download = Memoized::new(
            "files/%(path)s",
            Signature::new()
                .param("url")
                .param("path")
                .optional("method", "GET")
                .optional("form", Value::Null),
            fetch_file as FetchFile,
        )?;

        Ok(Self {
            store,
            cached_get,
            uncached_get,
            post,
            download,
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.store.path(CACHE_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.store.path(FILES_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.store.path(DATA_DIR)
    }

    /// Cached and throttled GET, `params` being appended as a query string.
    pub fn get<K, V>(&self, url: &str, params: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.get_bytes(url, params).map(into_text)
    }

    pub fn get_bytes<K, V>(&self, url: &str, params: &[(K, V)]) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = with_query(url, params)?;
        self.cached_get.request(&Request::get(url))
    }

    /// Throttled GET that neither reads nor fills the HTTP cache.
    pub fn get_uncached<K, V>(&self, url: &str, params: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.get_uncached_bytes(url, params).map(into_text)
    }

    pub fn get_uncached_bytes<K, V>(&self, url: &str, params: &[(K, V)]) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = with_query(url, params)?;
        self.uncached_get.request(&Request::get(url))
    }

    /// Throttled POST with a form encoded body, never cached.
    pub fn post<K, V>(&self, url: &str, form: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.post_bytes(url, form).map(into_text)
    }

    pub fn post_bytes<K, V>(&self, url: &str, form: &[(K, V)]) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.post.request(&Request::post(url, owned_pairs(form)))
    }

    pub fn get_document(&self, url: &str) -> Result<Html> {
        let page = self.get::<&str, &str>(url, &[])?;
        Ok(Html::parse_document(&page))
    }

    /// Fetches `url` as a document and hands it to a site specific parser.
    pub fn get_and_parse<T, P>(&self, url: &str, parse: P) -> Result<T>
    where
        P: FnOnce(&Html) -> Result<T>,
    {
        let document = self.get_document(url)?;
        parse(&document)
    }

    /// Downloads `url` to `files/<path>` unless that file already exists.
    pub fn download(&self, url: &str, path: &str) -> Result<Vec<u8>> {
        self.check_destination(path)?;
        let args = Args::new().arg(url).arg(path);
        self.download.call(self, &args)
    }

    /// Same as [`Session::download`] for documents served in response to a
    /// form submission.
    pub fn download_form<K, V>(&self, url: &str, form: &[(K, V)], path: &str) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.check_destination(path)?;
        let form = Value::from(
            owned_pairs(form)
                .into_iter()
                .map(|(k, v)| Value::from(vec![k, v]))
                .collect::<Vec<_>>(),
        );
        let args = Args::new()
            .arg(url)
            .arg(path)
            .kwarg("method", Method::Post.to_string())
            .kwarg("form", form);
        self.download.call(self, &args)
    }

    /// `path` must be a relative file path staying under `files/`.
    fn check_destination(&self, path: &str) -> Result<()> {
        let invalid = |reason| {
            Err(Error::Destination {
                path: path.to_string(),
                reason,
            })
        };
        if path.is_empty() || path.ends_with('/') {
            return invalid("no file name");
        }
        if !Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return invalid("not a relative path below files/");
        }
        if self.files_dir().join(path).is_dir() {
            return invalid("is a directory");
        }
        Ok(())
    }

    pub fn is_downloaded(&self, path: &str) -> bool {
        self.store.contains(Path::new(FILES_DIR).join(path))
    }

    /// Downloads every item, failed items being handled with `on_error`.
    pub fn download_all<I>(&self, items: I, on_error: OnError) -> Result<BatchReport<Downloadable>>
    where
        I: IntoIterator<Item = Downloadable>,
    {
        let report = run_batch(items, on_error, |item| {
            self.download(&item.url, item.destination())
        })?;
        log::info!(
            "downloaded {} of {} files",
            report.succeeded.len(),
            report.len()
        );
        Ok(report)
    }
}

fn fetch_file(session: &Session, args: &Bindings) -> Result<Vec<u8>> {
    let url: String = args.get_as("url")?;
    match args.get_str("method") {
        Some("POST") => {
            let form: Vec<(String, String)> = args.get_as("form")?;
            session.post_bytes(&url, &form)
        }
        _ => session.get_uncached_bytes::<&str, &str>(&url, &[]),
    }
}

fn owned_pairs<K, V>(pairs: &[(K, V)]) -> Vec<(String, String)>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect()
}

fn into_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Appends `params` to the query string of `url`, which is kept verbatim
/// when there are none.
pub fn with_query<K, V>(url: &str, params: &[(K, V)]) -> Result<String, TransportError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return Ok(url.to_string());
    }
    let params = params.iter().map(|(k, v)| (k.as_ref(), v.as_ref()));
    Url::parse_with_params(url, params)
        .map(String::from)
        .map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Resolves a possibly relative link found on the page at `base`.
pub fn join_url(base: &str, href: &str) -> Result<String, TransportError> {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .map_err(|e| TransportError::InvalidUrl {
            url: href.to_string(),
            reason: e.to_string(),
        })
}

/// Last path segment of `url`, for documents without a better name.
pub fn default_file_name(url: &str) -> &str {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
