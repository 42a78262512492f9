//! Error taxonomy for the scrape engine.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Errors that can occur while scraping a blog.
///
/// `NotFound` and `Gone` are internal sentinels: the download path uses
/// `NotFound` to drive the URL-variant fallback and swallows both before
/// they reach the orchestrator. Everything else aborts the blog.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// HTTP 404 on a media download.
    #[error("file not found")]
    NotFound,

    /// HTTP 403 on a media download. Media deleted upstream (e.g. DMCA)
    /// stays linked inside posts but is permanently inaccessible.
    #[error("file gone")]
    Gone,

    /// The scrape was cancelled by a signal or a failing sibling task.
    #[error("scrape cancelled")]
    Cancelled,

    #[error("GET {url} failed with status {status}")]
    UpstreamStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode listing from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{}: {source}", path.display())]
    LocalIo { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("login failed: {0}")]
    Login(#[from] AuthError),

    #[error("download task panicked: {0}")]
    TaskPanic(String),
}

impl ScrapeError {
    pub(crate) fn local_io(path: &Path, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.to_owned(),
            source,
        }
    }

    /// Whether this error was caused by cancellation rather than a real
    /// failure. The orchestrator suppresses logging for these.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
