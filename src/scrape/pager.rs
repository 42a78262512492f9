//! Per-blog pagination driver.
//!
//! Walks a blog's post listing page by page, newest first. Pages come from
//! the public API until it denies access; with credentials configured a 404
//! there triggers a single process-wide login and a permanent switch to the
//! session-authenticated dashboard endpoint. Every fetch and every download
//! spawned from a page contends on the shared semaphore with the current
//! page offset as its priority.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Authenticator;
use crate::config::{self, BlogConfig};

use super::download::Downloader;
use super::error::ScrapeError;
use super::fetcher::HttpFetcher;
use super::post::{self, Post, PostsResponse};
use super::scraper::Scraper;
use super::semaphore::PrioritySemaphore;

/// Page size of both listing endpoints.
const PAGE_LIMIT: &str = "20";

/// Which endpoint the driver currently uses.
///
/// `TryPublic` becomes `Public` on the first successful public response or
/// `Authenticated` after a login-triggering 404; neither of the latter two
/// ever transitions again within the same blog's scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    TryPublic,
    Public,
    Authenticated,
}

pub(super) struct PageDriver {
    fetcher: Arc<HttpFetcher>,
    downloader: Arc<Downloader>,
    semaphore: PrioritySemaphore,
    auth: Option<Arc<Authenticator>>,
    api_key: String,
    api_base: Url,
    web_base: Url,
    blog: BlogConfig,
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), ScrapeError>>,

    mode: FetchMode,
    offset: usize,
    before: Option<DateTime<Utc>>,
    lowest_id: i64,
    highest_id: i64,
}

impl PageDriver {
    pub(super) fn new(
        scraper: &Scraper,
        blog: BlogConfig,
        initial_highest_id: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher: Arc::clone(&scraper.fetcher),
            downloader: Arc::clone(&scraper.downloader),
            semaphore: scraper.semaphore.clone(),
            auth: scraper.auth.clone(),
            api_key: scraper.api_key.clone(),
            api_base: scraper.api_base.clone(),
            web_base: scraper.web_base.clone(),
            before: blog.before,
            blog,
            cancel,
            tasks: JoinSet::new(),
            mode: FetchMode::TryPublic,
            offset: 0,
            lowest_id: i64::MAX,
            highest_id: initial_highest_id,
        }
    }

    pub(super) fn highest_id(&self) -> i64 {
        self.highest_id
    }

    /// Drive pagination to exhaustion or first error.
    pub(super) async fn run(&mut self) -> Result<(), ScrapeError> {
        let initial_highest_id = self.highest_id;

        loop {
            match self.before {
                Some(before) => {
                    info!("{}: fetching posts before {}", self.blog.name, before.to_rfc3339())
                }
                None => info!("{}: fetching posts", self.blog.name),
            }

            let page = self.fetch_page().await?;
            let posts = page.response.posts;
            if posts.is_empty() {
                return Ok(());
            }
            let page_len = posts.len();

            // The upstream repeats entries whose timestamp equals the
            // previous `before` cursor; the fresh slice starts at the first
            // id below everything seen so far.
            let fresh = match fresh_start(&posts, self.lowest_id) {
                Some(idx) => &posts[idx..],
                None => &[],
            };
            if fresh.is_empty() {
                return Ok(());
            }

            for post in fresh {
                self.lowest_id = self.lowest_id.min(post.id);
                self.highest_id = self.highest_id.max(post.id);

                let timestamp = post.time();
                self.before = Some(match self.before {
                    Some(before) => before.min(timestamp),
                    None => timestamp,
                });

                if post.id <= initial_highest_id {
                    // Caught up with the previous scrape.
                    return Ok(());
                }

                if self.blog.skip_reblogs && post.is_reblog() {
                    debug!("{}: skipping reblog {}", self.blog.name, post.id);
                    continue;
                }

                self.enqueue_downloads(post).await?;
            }

            // Raw page length, pre-dedup, to stay aligned with upstream
            // pagination.
            self.offset += page_len;
        }
    }

    /// Wait for every outstanding download, returning the most useful error:
    /// the first non-cancelled failure if any, else the first cancellation.
    pub(super) async fn drain(&mut self) -> Option<ScrapeError> {
        let mut first = None;
        let mut first_cancelled = None;

        while let Some(joined) = self.tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => ScrapeError::TaskPanic(join_err.to_string()),
            };
            if err.is_cancelled() {
                first_cancelled.get_or_insert(err);
            } else {
                first.get_or_insert(err);
            }
        }

        first.or(first_cancelled)
    }

    async fn fetch_page(&mut self) -> Result<PostsResponse, ScrapeError> {
        loop {
            if let Some(page) = self.fetch_page_maybe().await? {
                return Ok(page);
            }
        }
    }

    /// Fetch one listing page, or `None` when the fetch mode changed and the
    /// caller should retry.
    async fn fetch_page_maybe(&mut self) -> Result<Option<PostsResponse>, ScrapeError> {
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        let _permit = tokio::select! {
            permit = self.semaphore.acquire(self.offset as i64) => permit,
            _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
        };

        let (url, headers) = match self.mode {
            FetchMode::Authenticated => (self.dashboard_posts_url()?, dashboard_headers()),
            FetchMode::TryPublic | FetchMode::Public => {
                (self.public_posts_url()?, HeaderMap::new())
            }
        };

        let response = self
            .fetcher
            .get(url.clone(), headers, &self.cancel)
            .await?;
        let status = response.status();

        if status != StatusCode::OK {
            if self.mode == FetchMode::TryPublic && status == StatusCode::NOT_FOUND {
                if let Some(auth) = &self.auth {
                    auth.login_once().await?;
                    self.mode = FetchMode::Authenticated;
                    return Ok(None);
                }
            }
            return Err(ScrapeError::UpstreamStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = tokio::select! {
            body = response.bytes() => body?,
            _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
        };

        let page: PostsResponse =
            serde_json::from_slice(&body).map_err(|source| ScrapeError::Decode {
                url: url.to_string(),
                source,
            })?;

        if self.mode == FetchMode::TryPublic {
            self.mode = FetchMode::Public;
        }

        Ok(Some(page))
    }

    /// Queue one download task per media URL in `post`, each admitted at the
    /// current page offset so the whole page competes as a cohort.
    async fn enqueue_downloads(&mut self, post: &Post) -> Result<(), ScrapeError> {
        for media_url in post::media_urls(post) {
            let permit = tokio::select! {
                permit = self.semaphore.acquire(self.offset as i64) => permit,
                _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
            };

            let downloader = Arc::clone(&self.downloader);
            let target = self.blog.target.clone();
            let blog_name = self.blog.name.clone();
            let post_time = post.time();
            let cancel = self.cancel.clone();

            self.tasks.spawn(async move {
                let _permit = permit;
                match downloader
                    .fetch_media(&target, post_time, &media_url, &cancel)
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if !err.is_cancelled() {
                            warn!("{}: failed to download {}: {}", blog_name, media_url, err);
                            // First failure aborts the whole blog.
                            cancel.cancel();
                        }
                        Err(err)
                    }
                }
            });
        }
        Ok(())
    }

    fn public_posts_url(&self) -> Result<Url, ScrapeError> {
        let mut url = self
            .api_base
            .join(&format!("v2/blog/{}/posts", self.blog.name))
            .map_err(|_| ScrapeError::InvalidUrl(self.blog.name.clone()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.api_key);
            query.append_pair("limit", PAGE_LIMIT);
            if self.blog.skip_reblogs {
                query.append_pair("reblog_info", "1");
            }
            if let Some(before) = self.before {
                query.append_pair("before", &before.timestamp().to_string());
            }
        }

        Ok(url)
    }

    fn dashboard_posts_url(&self) -> Result<Url, ScrapeError> {
        let mut url = self
            .web_base
            .join("svc/indash_blog")
            .map_err(|_| ScrapeError::InvalidUrl(self.blog.name.clone()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("tumblelog_name_or_id", config::host_to_name(&self.blog.name));
            query.append_pair("post_id", "");
            query.append_pair("limit", PAGE_LIMIT);
            query.append_pair("offset", &self.offset.to_string());
            query.append_pair("should_bypass_safemode_forpost", "true");
            query.append_pair("should_bypass_safemode_forblog", "true");
            query.append_pair("should_bypass_tagfiltering", "true");
            query.append_pair("can_modify_safe_mode", "true");
        }

        Ok(url)
    }
}

fn dashboard_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::REFERER,
        HeaderValue::from_static("https://www.tumblr.com/dashboard"),
    );
    headers.insert(
        "X-Requested-With",
        HeaderValue::from_static("XMLHttpRequest"),
    );
    headers
}

/// Index of the first post of the fresh (not yet seen) slice of a page.
fn fresh_start(posts: &[Post], lowest_id: i64) -> Option<usize> {
    posts.iter().position(|post| post.id < lowest_id)
}
