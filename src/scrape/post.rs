//! Post payloads and media-URL extraction.
//!
//! The upstream returns heterogeneous post objects whose fields vary by
//! post type; everything the engine does not consume is ignored during
//! deserialization. Extraction walks HTML bodies for linked media, adds the
//! structured photo and video fields, and filters out the avatar URLs that
//! an upstream bug substitutes for inline images on pre-2014 posts.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;

use super::{AVATAR_URL, EMBEDDED_MEDIA_URL, MEDIA_URL};

/// Envelope of a post-listing response.
#[derive(Debug, Clone, Deserialize)]
pub struct PostsResponse {
    pub response: PostsPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostsPayload {
    #[serde(default)]
    pub posts: Vec<Post>,
}

/// One post, reduced to the fields the engine consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: i64,
    pub timestamp: i64,

    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub video_url: Option<String>,

    /// Non-empty only for reblogs.
    #[serde(default)]
    pub reblogged_from_id: Option<String>,
}

impl Post {
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }

    pub fn is_reblog(&self) -> bool {
        self.reblogged_from_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Photo {
    pub original_size: PhotoVariant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoVariant {
    #[serde(default)]
    pub url: String,
}

/// Attributes that carry media links inside post bodies.
const MEDIA_ATTRS: &[&str] = &["href", "src", "data-big-photo"];

/// Collect every media URL referenced by `post`, in document order:
/// HTML bodies first, then the photo list, then the video URL.
pub fn media_urls(post: &Post) -> Vec<String> {
    let mut urls = Vec::new();

    for text in [post.body.as_deref(), post.answer.as_deref()]
        .into_iter()
        .flatten()
    {
        if !text.is_empty() {
            collect_from_markup(text, &mut urls);
        }
    }

    for photo in &post.photos {
        if !photo.original_size.url.is_empty() {
            urls.push(photo.original_size.url.clone());
        }
    }

    if let Some(video) = post.video_url.as_deref() {
        if !video.is_empty() {
            urls.push(video.to_string());
        }
    }

    urls.retain(|url| !AVATAR_URL.is_match(url));
    urls
}

/// Walk an HTML fragment for media links in `href`/`src`/`data-big-photo`
/// attributes. html5ever recovers from nearly any input, so a "failed"
/// parse shows up as a walk that finds nothing; in that case fall back to
/// a raw pattern scan of the text.
fn collect_from_markup(text: &str, out: &mut Vec<String>) {
    let before = out.len();
    let fragment = Html::parse_fragment(text);

    let selector = match Selector::parse("[href], [src], [data-big-photo]") {
        Ok(s) => s,
        Err(_) => return,
    };

    for element in fragment.select(&selector) {
        for attr in MEDIA_ATTRS {
            if let Some(value) = element.value().attr(attr) {
                if MEDIA_URL.is_match(value) {
                    out.push(value.to_string());
                }
            }
        }
    }

    if out.len() == before {
        for found in EMBEDDED_MEDIA_URL.find_iter(text) {
            out.push(found.as_str().to_string());
        }
    }
}
