//! Error taxonomy of the crawl substrate.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A download target that cannot name a file under `files/`.
    #[error("Invalid destination {path:?}: {reason}")]
    Destination { path: String, reason: &'static str },

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reported by caller supplied parse callbacks.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Cache key templates and argument binding.
///
/// All of these are programming errors: they are raised before any I/O and
/// retrying cannot fix them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Malformed template {template:?} at byte {offset}: {reason}")]
    Malformed {
        template: String,
        offset: usize,
        reason: String,
    },

    #[error("Placeholder %({name})s in {template:?} has no matching parameter")]
    UnknownPlaceholder { template: String, name: String },

    #[error("Too many positional arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },

    #[error("Unknown keyword argument: {name}")]
    UnknownArgument { name: String },

    #[error("Argument bound more than once: {name}")]
    DuplicateArgument { name: String },

    #[error("Missing required argument: {name}")]
    MissingArgument { name: String },

    #[error("Argument {name} has an unexpected type: {reason}")]
    ArgumentType { name: String, reason: String },
}

/// Network and HTTP level failures, never retried at this layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl TransportError {
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url, .. } | Self::Request { url, .. } | Self::Status { url, .. } => {
                url
            }
        }
    }
}

/// Stored content that does not fit the format implied by its path.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Couldn't decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Couldn't encode value for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot store {what} at {} as {format} content", path.display())]
    Unsupported {
        path: PathBuf,
        what: &'static str,
        format: &'static str,
    },
}
