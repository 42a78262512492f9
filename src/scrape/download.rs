//! Media download path: URL upgrade, filename correction, atomic publish.
//!
//! Downloads are tried against the best-quality variant of the source URL
//! first and fall back to the original on 404. The on-disk name starts as
//! the URL basename and is corrected from response headers; the body is
//! streamed to a `.tmp` sibling under the path interlock, stamped with the
//! chosen timestamp, and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures_util::StreamExt;
use reqwest::header::{self, HeaderMap};
use reqwest::StatusCode;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::error::ScrapeError;
use super::fetcher::HttpFetcher;
use super::interlock::PathInterlock;
use super::{IMAGE_SIZE_SUFFIX, VIDEO_SIZE_SUFFIX};

/// MIME types whose extension sets the upstream is known to mislabel.
/// The first extension of each entry is the canonical replacement.
const REGISTERED_EXTENSIONS: &[(&str, &[&str])] = &[
    ("image/bmp", &["bmp"]),
    ("image/gif", &["gif"]),
    ("image/jpeg", &["jpg", "jpeg", "jpe"]),
    ("image/png", &["png"]),
    ("image/tiff", &["tiff", "tif"]),
    ("image/webp", &["webp"]),
    ("video/webm", &["webm"]),
];

/// Downloads media files into blog target directories.
pub struct Downloader {
    fetcher: Arc<HttpFetcher>,
    interlock: PathInterlock,
}

impl Downloader {
    pub fn new(fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            fetcher,
            interlock: PathInterlock::new(),
        }
    }

    /// Download one media URL into `target_dir`.
    ///
    /// Tries the upgraded (highest-quality) variant first and falls back to
    /// the original on 404; a second 404 means the media is gone upstream
    /// and counts as success, as does 403 (permanently censored content).
    pub async fn fetch_media(
        &self,
        target_dir: &Path,
        post_time: DateTime<Utc>,
        raw_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        let optimal = upgrade_url(raw_url);

        let mut result = self
            .fetch_media_once(target_dir, post_time, &optimal, cancel)
            .await;
        if matches!(result, Err(ScrapeError::NotFound)) && optimal != raw_url {
            result = self
                .fetch_media_once(target_dir, post_time, raw_url, cancel)
                .await;
        }

        match result {
            Err(ScrapeError::NotFound) => {
                debug!("did not find {}", raw_url);
                Ok(())
            }
            Err(ScrapeError::Gone) => Ok(()),
            other => other,
        }
    }

    async fn fetch_media_once(
        &self,
        target_dir: &Path,
        post_time: DateTime<Utc>,
        raw_url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        let url = Url::parse(raw_url)
            .map_err(|_| ScrapeError::InvalidUrl(raw_url.to_string()))?;

        let mut path = target_dir.join(url_basename(&url));
        if fs::symlink_metadata(&path).await.is_ok() {
            debug!("skipping {}", path.display());
            return Ok(());
        }

        let response = self
            .fetcher
            .get(url, HeaderMap::new(), cancel)
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN => return Err(ScrapeError::Gone),
            StatusCode::NOT_FOUND => return Err(ScrapeError::NotFound),
            status => {
                return Err(ScrapeError::UpstreamStatus {
                    url: raw_url.to_string(),
                    status,
                })
            }
        }

        let file_time = choose_file_time(post_time, response.headers());

        let fixed = fixup_filepath(target_dir, &path, response.headers());
        if fixed != path {
            path = fixed;
            if fs::symlink_metadata(&path).await.is_ok() {
                debug!("skipping {}", path.display());
                return Ok(());
            }
        }

        let temp = temp_path(&path);
        let Some(_guard) = self.interlock.acquire(&temp) else {
            // Another task is already producing this file.
            return Ok(());
        };

        self.publish(response, &temp, &path, file_time, cancel).await?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    /// Stream the body into `temp`, stamp it, and rename it to `path`.
    /// Any failure after the temp file exists removes it.
    async fn publish(
        &self,
        response: reqwest::Response,
        temp: &Path,
        path: &Path,
        file_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        let mut file = fs::File::create(temp)
            .await
            .map_err(|e| ScrapeError::local_io(temp, e))?;

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = fs::remove_file(temp).await;
                    return Err(ScrapeError::Cancelled);
                }
            };
            match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        drop(file);
                        let _ = fs::remove_file(temp).await;
                        return Err(ScrapeError::local_io(temp, e));
                    }
                }
                Some(Err(e)) => {
                    drop(file);
                    let _ = fs::remove_file(temp).await;
                    return Err(ScrapeError::Http(e));
                }
                None => break,
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            let _ = fs::remove_file(temp).await;
            return Err(ScrapeError::local_io(temp, e));
        }
        drop(file);

        // A failed stamp is non-fatal; the file is kept either way.
        let stamp = FileTime::from_unix_time(file_time.timestamp(), 0);
        if let Err(e) = filetime::set_file_times(temp, stamp, stamp) {
            warn!("failed to set file times on {}: {}", temp.display(), e);
        }

        if let Err(e) = fs::rename(temp, path).await {
            let _ = fs::remove_file(temp).await;
            return Err(ScrapeError::local_io(path, e));
        }

        Ok(())
    }
}

/// Rewrite a media URL to its best-quality variant.
///
/// Videos lose their `_480`/`_720` size suffix; image basenames of the form
/// `_<digits>.<ext>` are bumped to `_1280`.
pub fn upgrade_url(raw_url: &str) -> String {
    if raw_url.ends_with(".mp4") {
        VIDEO_SIZE_SUFFIX.replace(raw_url, ".mp4").into_owned()
    } else {
        IMAGE_SIZE_SUFFIX
            .replace(raw_url, "_1280.${ext}")
            .into_owned()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

/// Last path segment of the URL; the initial on-disk basename.
fn url_basename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("unnamed")
        .to_string()
}

/// Use `Last-Modified` as the file time when it lies more than 24 hours
/// before the post timestamp; otherwise keep the post timestamp.
fn choose_file_time(post_time: DateTime<Utc>, headers: &HeaderMap) -> DateTime<Utc> {
    let Some(value) = headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
    else {
        return post_time;
    };

    match DateTime::parse_from_rfc2822(value) {
        Ok(last_modified) => {
            let last_modified = last_modified.with_timezone(&Utc);
            if post_time - last_modified > chrono::Duration::hours(24) {
                last_modified
            } else {
                post_time
            }
        }
        Err(e) => {
            warn!("failed to parse Last-Modified header {:?}: {}", value, e);
            post_time
        }
    }
}

/// Correct the on-disk path from response headers.
///
/// The upstream suffixes some files with a bogus extension (`.gifv` for
/// instance) and then sends a `Content-Disposition` with the intended
/// filename; the `Content-Type` MIME type serves as a fallback signal.
fn fixup_filepath(target_dir: &Path, path: &Path, headers: &HeaderMap) -> PathBuf {
    if let Some(filename) = content_disposition_filename(headers) {
        return target_dir.join(filename);
    }

    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return path.to_owned();
    };

    let extensions = known_extensions(content_type);
    if extensions.is_empty() {
        return path.to_owned();
    }

    let current = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    if let Some(current) = &current {
        if extensions.iter().any(|ext| ext == current) {
            // The extension already agrees with the Content-Type.
            return path.to_owned();
        }
    }

    path.with_extension(&extensions[0])
}

/// Filename parameter of the `Content-Disposition` header, reduced to its
/// final path component so a hostile header cannot escape the target dir.
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(header::CONTENT_DISPOSITION)?
        .to_str()
        .ok()?;

    for param in value.split(';').skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("filename") {
            continue;
        }
        let val = val.trim().trim_matches('"');
        let name = Path::new(val).file_name()?.to_string_lossy().into_owned();
        if !name.is_empty() {
            return Some(name);
        }
    }
    None
}

/// Known extensions for a MIME type, canonical replacement first.
fn known_extensions(content_type: &str) -> Vec<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if let Some((_, extensions)) = REGISTERED_EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == essence)
    {
        return extensions.iter().map(|e| e.to_string()).collect();
    }

    mime_guess::get_mime_extensions_str(&essence)
        .map(|extensions| extensions.iter().map(|e| e.to_string()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn upgrades_video_size_suffix() {
        assert_eq!(
            upgrade_url("https://vt.media.tumblr.com/tumblr_abc_480.mp4"),
            "https://vt.media.tumblr.com/tumblr_abc.mp4"
        );
        assert_eq!(
            upgrade_url("https://vt.media.tumblr.com/tumblr_abc_720.mp4"),
            "https://vt.media.tumblr.com/tumblr_abc.mp4"
        );
        // Already optimal.
        assert_eq!(
            upgrade_url("https://vt.media.tumblr.com/tumblr_abc.mp4"),
            "https://vt.media.tumblr.com/tumblr_abc.mp4"
        );
    }

    #[test]
    fn upgrades_image_size_suffix() {
        assert_eq!(
            upgrade_url("https://64.media.tumblr.com/tumblr_x_500.jpg"),
            "https://64.media.tumblr.com/tumblr_x_1280.jpg"
        );
        assert_eq!(
            upgrade_url("https://64.media.tumblr.com/tumblr_x_250.gif"),
            "https://64.media.tumblr.com/tumblr_x_1280.gif"
        );
        // No size suffix to rewrite.
        assert_eq!(
            upgrade_url("https://64.media.tumblr.com/tumblr_x.png"),
            "https://64.media.tumblr.com/tumblr_x.png"
        );
    }

    #[test]
    fn basename_is_last_path_segment() {
        let url = Url::parse("https://media.tumblr.com/a/b/tumblr_1_500.jpg").unwrap();
        assert_eq!(url_basename(&url), "tumblr_1_500.jpg");
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/data/blog/a.jpg")),
            PathBuf::from("/data/blog/a.jpg.tmp")
        );
    }

    #[test]
    fn content_disposition_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"clip.mp4\""),
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/gif"),
        );

        let fixed = fixup_filepath(Path::new("/d"), Path::new("/d/clip.gifv"), &headers);
        assert_eq!(fixed, PathBuf::from("/d/clip.mp4"));
    }

    #[test]
    fn content_disposition_filename_is_sanitized() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"../../etc/passwd\""),
        );
        let fixed = fixup_filepath(Path::new("/d"), Path::new("/d/x.bin"), &headers);
        assert_eq!(fixed, PathBuf::from("/d/passwd"));
    }

    #[test]
    fn content_type_corrects_mismatched_extension() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/jpeg"),
        );
        let fixed = fixup_filepath(Path::new("/d"), Path::new("/d/photo.png"), &headers);
        assert_eq!(fixed, PathBuf::from("/d/photo.jpg"));
    }

    #[test]
    fn content_type_keeps_matching_extension() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("image/jpeg"),
        );
        // .jpeg is in the registered set for image/jpeg, so no rename.
        let fixed = fixup_filepath(Path::new("/d"), Path::new("/d/photo.jpeg"), &headers);
        assert_eq!(fixed, PathBuf::from("/d/photo.jpeg"));
    }

    #[test]
    fn registered_mime_table_is_complete() {
        for (mime, first) in [
            ("image/bmp", "bmp"),
            ("image/gif", "gif"),
            ("image/jpeg", "jpg"),
            ("image/png", "png"),
            ("image/tiff", "tiff"),
            ("image/webp", "webp"),
            ("video/webm", "webm"),
        ] {
            let extensions = known_extensions(mime);
            assert_eq!(extensions.first().map(String::as_str), Some(first), "{mime}");
        }
    }

    #[test]
    fn unknown_content_type_leaves_path_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-nonexistent-type"),
        );
        let fixed = fixup_filepath(Path::new("/d"), Path::new("/d/file.bin"), &headers);
        assert_eq!(fixed, PathBuf::from("/d/file.bin"));
    }

    #[test]
    fn file_time_prefers_old_last_modified() {
        let post_time = DateTime::parse_from_rfc3339("2015-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // More than 24 h before the post: wins.
        let mut headers = HeaderMap::new();
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Mon, 03 Mar 2014 10:00:00 GMT"),
        );
        let chosen = choose_file_time(post_time, &headers);
        assert_eq!(
            chosen,
            DateTime::parse_from_rfc2822("Mon, 03 Mar 2014 10:00:00 GMT")
                .unwrap()
                .with_timezone(&Utc)
        );

        // Within 24 h of the post: the post time wins.
        let mut headers = HeaderMap::new();
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Sun, 31 May 2015 12:00:00 GMT"),
        );
        assert_eq!(choose_file_time(post_time, &headers), post_time);

        // Unparseable header: the post time wins.
        let mut headers = HeaderMap::new();
        headers.insert(header::LAST_MODIFIED, HeaderValue::from_static("not a date"));
        assert_eq!(choose_file_time(post_time, &headers), post_time);
    }
}
