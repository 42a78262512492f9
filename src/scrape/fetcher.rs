//! Cancellation-aware HTTP issuance on a shared connection pool.
//!
//! One `reqwest::Client` serves the whole process: listing fetches, media
//! downloads, and the login flow all reuse its pool and cookie jar. The
//! fetcher wraps it with header merging and a race against the scrape's
//! cancellation token so that blocked requests unwind promptly on shutdown.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::ScrapeError;

const USER_AGENT: &str = concat!("tumblr-mirror/", env!("CARGO_PKG_VERSION"));

/// Build the process-wide HTTP client.
///
/// Timeouts: 10 s connect, 60 s per request, 60 s TCP keep-alive, 90 s pool
/// idle, up to 100 idle connections per host. The jar is shared with the
/// login flow so session cookies established there apply to every
/// subsequent request.
pub fn build_client(jar: Arc<Jar>) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .cookie_provider(jar)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Issues GET requests for the scrape engine.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, for collaborators that share the pool.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issue a GET, racing it against `cancel`.
    ///
    /// `headers` are merged over the client defaults. Cancellation yields
    /// [`ScrapeError::Cancelled`]; transport failures surface as
    /// [`ScrapeError::Http`]. Status codes are the caller's problem.
    pub async fn get(
        &self,
        url: Url,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Response, ScrapeError> {
        let request = self.client.get(url).headers(headers);
        tokio::select! {
            response = request.send() => Ok(response?),
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
        }
    }
}
