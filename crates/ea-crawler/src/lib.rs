mod batch;
mod config;
mod error;
pub mod memo;
mod session;
mod site;
pub mod store;
pub mod template;
mod throttle;
pub mod transport;

pub use batch::{run_batch, BatchReport, Downloadable};
pub use config::{CrawlerConfig, OnError, ThrottleConfig};
pub use error::{Error, FormatError, Result, TemplateError, TransportError};
pub use memo::{MemoContext, Memoized};
pub use session::{
    default_file_name, join_url, with_query, Session, CACHE_DIR, DATA_DIR, FILES_DIR,
};
pub use site::{crawl_site, crawl_with, Site};
pub use store::{Json, Store};
pub use template::{Args, Bindings, KeyTemplate, Signature};
pub use throttle::Throttle;
pub use transport::{HttpBackend, Method, Request, ReqwestBackend};

pub use sws_scraper;
