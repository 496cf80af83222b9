use std::path::Path;

use crate::batch::{BatchReport, Downloadable};
use crate::config::{CrawlerConfig, OnError};
use crate::error::Result;
use crate::session::Session;

/// Scraping logic of one site.
///
/// Implementors parse the site's pages through the [`Session`] they are
/// given, memoizing whatever they extract, and list the documents to fetch.
pub trait Site {
    type Config: Clone;

    fn new(config: &Self::Config) -> Result<Self>
    where
        Self: Sized;

    /// Directory holding the `cache/`, `files/` and `data/` of this site.
    fn root(&self) -> &Path;

    fn downloadables(&mut self, session: &Session) -> Result<Vec<Downloadable>>;

    fn finalizer(&mut self) {}
}

pub fn crawl_site<T>(
    crawler_conf: &CrawlerConfig,
    site_conf: &T::Config,
) -> Result<BatchReport<Downloadable>>
where
    T: Site,
{
    let mut site = <T as Site>::new(site_conf)?;
    let session = Session::open(site.root(), crawler_conf)?;
    crawl_with(&mut site, &session, crawler_conf.on_dl_error)
}

/// Downloads everything `site` lists through an already opened session.
pub fn crawl_with<T>(
    site: &mut T,
    session: &Session,
    on_dl_error: OnError,
) -> Result<BatchReport<Downloadable>>
where
    T: Site,
{
    let res = site
        .downloadables(session)
        .and_then(|items| session.download_all(items, on_dl_error));
    site.finalizer();
    res
}
