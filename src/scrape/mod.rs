//! Scrape engine: incremental mirroring of blog media.
//!
//! The engine walks each blog's post listing page by page, extracts every
//! referenced photo and video, and downloads them in parallel. Key pieces:
//! - `PrioritySemaphore`: bounded admission for all network I/O, fair by
//!   page offset so pagination outranks stale download backlog
//! - `PathInterlock`: process-wide guard against two writers on one path
//! - `HttpFetcher`: cancellation-aware GETs on a shared pool and cookie jar
//! - `post`: payload model and media-URL extraction
//! - `Downloader`: URL-quality upgrade, filename correction, atomic publish
//! - `PageDriver`: the two-mode pagination state machine
//! - `Scraper`: per-blog lifecycle and high-water-mark commits

pub mod download;
pub mod error;
pub mod fetcher;
pub mod interlock;
mod pager;
pub mod post;
pub mod scraper;
pub mod semaphore;

pub use download::Downloader;
pub use error::ScrapeError;
pub use fetcher::{build_client, HttpFetcher};
pub use interlock::PathInterlock;
pub use scraper::Scraper;
pub use semaphore::PrioritySemaphore;

use std::sync::LazyLock;

use regex::Regex;

/// Media URL as it appears in attribute values.
static MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^http.+(?:media|vtt)\.tumblr\.com/.+$").expect("hard-coded pattern")
});

/// Media URL embedded anywhere in raw markup.
static EMBEDDED_MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"http[^"]+(?:media|vtt)\.tumblr\.com/[^"]+"#).expect("hard-coded pattern")
});

/// Avatar substitution bug marker; these URLs are never worth mirroring.
static AVATAR_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"media\.tumblr\.com/avatar_").expect("hard-coded pattern"));

/// Size suffix of video URLs, replaced by the unsuffixed original.
static VIDEO_SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(?:480|720)\.mp4$").expect("hard-coded pattern"));

/// Size suffix of image URLs, bumped to the 1280 variant.
static IMAGE_SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(?:\d+)\.(?P<ext>[a-z]+)$").expect("hard-coded pattern"));
