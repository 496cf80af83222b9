use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::OnError;
use crate::error::{Error, Result};

/// A document to fetch, as listed in a site's data files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downloadable {
    pub filename: String,
    pub url: String,
}

impl Downloadable {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
        }
    }

    /// Destination relative to the `files/` directory.
    ///
    /// Data files list documents as `files/...`, the prefix is dropped since
    /// downloads already land there.
    pub fn destination(&self) -> &str {
        self.filename
            .strip_prefix("files/")
            .unwrap_or(&self.filename)
    }
}

impl fmt::Display for Downloadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, self.url)
    }
}

#[derive(Debug)]
pub struct BatchReport<I> {
    pub succeeded: Vec<I>,
    pub failed: Vec<(I, Error)>,
}

impl<I> Default for BatchReport<I> {
    fn default() -> Self {
        Self {
            succeeded: vec![],
            failed: vec![],
        }
    }
}

impl<I> BatchReport<I> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors tied to a single item, which a skipping batch moves past.
///
/// Template, format, configuration and I/O errors point at the program or
/// the local disk and abort the batch whatever the policy.
fn is_item_error(e: &Error) -> bool {
    matches!(
        e,
        Error::Transport(_) | Error::Parse(_) | Error::Destination { .. }
    )
}

/// Runs `op` on every item, handling per item failures with `on_error`.
pub fn run_batch<I, T, F>(
    items: impl IntoIterator<Item = I>,
    on_error: OnError,
    mut op: F,
) -> Result<BatchReport<I>>
where
    I: fmt::Display,
    F: FnMut(&I) -> Result<T>,
{
    let mut report = BatchReport::default();
    for item in items {
        match op(&item) {
            Ok(_) => report.succeeded.push(item),
            Err(e) if on_error == OnError::SkipAndLog && is_item_error(&e) => {
                log::warn!("Skipping {item} got: {e}");
                report.failed.push((item, e));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
