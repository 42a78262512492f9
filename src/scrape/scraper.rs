//! Scrape orchestration across configured blogs.

use std::sync::Arc;

use reqwest::Client;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::auth::Authenticator;
use crate::config::{BlogConfig, Config};
use crate::store::MarkStore;

use super::download::Downloader;
use super::error::ScrapeError;
use super::fetcher::HttpFetcher;
use super::pager::PageDriver;
use super::semaphore::PrioritySemaphore;

const DEFAULT_API_BASE: &str = "https://api.tumblr.com";
const DEFAULT_WEB_BASE: &str = "https://www.tumblr.com";

/// Runs scrapes for configured blogs, one blog at a time, fanning each
/// blog's downloads out through the shared semaphore.
///
/// All shared state (the semaphore, the downloader's path interlock, the
/// connection pool, the optional authenticator) is owned here and injected
/// into per-blog drivers; nothing reaches into globals.
pub struct Scraper {
    pub(super) fetcher: Arc<HttpFetcher>,
    pub(super) downloader: Arc<Downloader>,
    pub(super) semaphore: PrioritySemaphore,
    pub(super) auth: Option<Arc<Authenticator>>,
    pub(super) api_key: String,
    pub(super) api_base: Url,
    pub(super) web_base: Url,
}

impl Scraper {
    pub fn new(client: Client, config: &Config, auth: Option<Arc<Authenticator>>) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(client));
        let downloader = Arc::new(Downloader::new(Arc::clone(&fetcher)));
        Self {
            fetcher,
            downloader,
            semaphore: PrioritySemaphore::new(config.concurrency),
            auth,
            api_key: config.api_key.clone(),
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base parses"),
            web_base: Url::parse(DEFAULT_WEB_BASE).expect("default web base parses"),
        }
    }

    /// Point the scraper at alternate endpoints. Tests use this to aim the
    /// driver at a local stand-in for the upstream.
    pub fn with_endpoints(mut self, api_base: Url, web_base: Url) -> Self {
        self.api_base = api_base;
        self.web_base = web_base;
        self
    }

    /// Scrape every blog in order, committing each blog's high-water mark to
    /// `store` only after its run completes cleanly. The first failed blog
    /// aborts the run.
    pub async fn sync(
        &self,
        blogs: &[BlogConfig],
        store: &mut MarkStore,
        cancel: &CancellationToken,
    ) -> Result<(), ScrapeError> {
        for blog in blogs {
            let initial = if blog.rescrape {
                0
            } else {
                store.highest_id(&blog.name).max(0)
            };

            match self.scrape_blog(blog, initial, cancel).await {
                Ok(highest_id) => {
                    store.set_highest_id(&blog.name, highest_id);
                    store.save()?;
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        error!("{}: scrape failed: {}", blog.name, err);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Scrape a single blog starting above `initial_highest_id`; returns the
    /// highest post id observed.
    pub async fn scrape_blog(
        &self,
        blog: &BlogConfig,
        initial_highest_id: i64,
        cancel: &CancellationToken,
    ) -> Result<i64, ScrapeError> {
        fs::create_dir_all(&blog.target)
            .await
            .map_err(|e| ScrapeError::local_io(&blog.target, e))?;

        let child = cancel.child_token();
        let mut driver = PageDriver::new(self, blog.clone(), initial_highest_id, child);

        info!("{}: scraping starting at {}", blog.name, initial_highest_id);
        let drive_result = driver.run().await;
        let task_err = driver.drain().await;
        info!("{}: scraping finished at {}", blog.name, driver.highest_id());

        // The driver's error wins, except that a cancellation it suffered
        // because a download failed is noise next to the download's error.
        let err = match (drive_result, task_err) {
            (Err(drive_err), Some(task_err))
                if drive_err.is_cancelled() && !task_err.is_cancelled() =>
            {
                Some(task_err)
            }
            (Err(drive_err), _) => Some(drive_err),
            (Ok(()), task_err) => task_err,
        };

        match err {
            None => Ok(driver.highest_id()),
            Some(err) => Err(err),
        }
    }
}
