//! Per-blog job settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One blog to mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlogConfig {
    /// Blog identifier. A bare name is qualified to `<name>.tumblr.com`
    /// during config normalization.
    pub name: String,

    /// Directory the blog's media lands in; created on demand.
    pub target: PathBuf,

    /// Skip posts that reblog another post.
    #[serde(default)]
    pub skip_reblogs: bool,

    /// Only consider posts published before this instant (RFC 3339 string
    /// in the config file).
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,

    /// Ignore the stored high-water mark and walk the whole blog again.
    /// Existing files are still skipped, so this fills gaps rather than
    /// re-downloading.
    #[serde(default)]
    pub rescrape: bool,
}
