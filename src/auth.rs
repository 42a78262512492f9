//! Session login against the upstream web frontend.
//!
//! The public listing API refuses some blogs (dashboard-only ones); for
//! those the driver switches to the session-authenticated endpoint, which
//! requires cookies established by this flow: scrape the form key off the
//! login page, acknowledge the GDPR consent dialog, then post the
//! credential form. Cookies land in the jar shared with every other
//! request.
//!
//! Login is a process-wide single shot: any number of blogs racing into the
//! fallback observe at most one attempt.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::LazyLock;

use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use url::Url;

const DEFAULT_WEB_BASE: &str = "https://www.tumblr.com";

const LOGGED_OUT: u8 = 0;
const LOGGED_IN: u8 = 1;

/// Form key embedded as a meta tag on consent and login pages.
static FORM_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="tumblr-form-key".+?content="([^"]+)"#).expect("hard-coded pattern")
});

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing username/password")]
    MissingCredentials,

    #[error("GET {url} failed with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to find form key on {url}")]
    FormKey { url: String },

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ConsentRequest {
    eu_resident: bool,
    gdpr_is_acceptable_age: bool,
    gdpr_consent_core: bool,
    gdpr_consent_first_party_ads: bool,
    gdpr_consent_third_party_ads: bool,
    gdpr_consent_search_history: bool,
}

/// Performs the login flow on the shared client, at most once per process.
pub struct Authenticator {
    client: Client,
    username: String,
    password: String,
    web_base: Url,

    /// Fast-path state; transitions are serialized by `transition`.
    state: AtomicU8,
    transition: Mutex<()>,
}

impl Authenticator {
    pub fn new(client: Client, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client,
            username: username.into(),
            password: password.into(),
            web_base: Url::parse(DEFAULT_WEB_BASE).expect("default web base parses"),
            state: AtomicU8::new(LOGGED_OUT),
            transition: Mutex::new(()),
        }
    }

    /// Point the flow at an alternate frontend (tests).
    pub fn with_web_base(mut self, web_base: Url) -> Self {
        self.web_base = web_base;
        self
    }

    /// Log in unless some caller already did. Concurrent callers serialize;
    /// all but the first return without touching the network.
    pub async fn login_once(&self) -> Result<(), AuthError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        if self.state.load(Ordering::Acquire) != LOGGED_OUT {
            return Ok(());
        }

        let _guard = self.transition.lock().await;
        if self.state.load(Ordering::Acquire) != LOGGED_OUT {
            return Ok(());
        }

        info!("logging in as {}", self.username);
        self.consent().await?;
        self.login().await?;

        self.state.store(LOGGED_IN, Ordering::Release);
        Ok(())
    }

    /// Invalidate the session. A no-op unless logged in.
    pub async fn logout(&self) -> Result<(), AuthError> {
        if self.state.load(Ordering::Acquire) != LOGGED_IN {
            return Ok(());
        }

        let _guard = self.transition.lock().await;
        if self.state.load(Ordering::Acquire) != LOGGED_IN {
            return Ok(());
        }

        info!("logging out");
        let url = self.endpoint("logout")?;
        let response = self.client.get(url.clone()).send().await?;
        expect_ok(&url, response.status())?;

        self.state.store(LOGGED_OUT, Ordering::Release);
        Ok(())
    }

    async fn consent(&self) -> Result<(), AuthError> {
        let page_url = self.endpoint("privacy/consent")?;
        let form_key = self.fetch_form_key(&page_url).await?;

        let svc_url = self.endpoint("svc/privacy/consent")?;
        let response = self
            .client
            .post(svc_url.clone())
            .header(reqwest::header::REFERER, page_url.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-tumblr-form-key", form_key)
            .json(&ConsentRequest {
                eu_resident: true,
                gdpr_is_acceptable_age: true,
                gdpr_consent_core: true,
                gdpr_consent_first_party_ads: true,
                gdpr_consent_third_party_ads: false,
                gdpr_consent_search_history: true,
            })
            .send()
            .await?;

        expect_ok(&svc_url, response.status())
    }

    async fn login(&self) -> Result<(), AuthError> {
        let url = self.endpoint("login")?;
        let form_key = self.fetch_form_key(&url).await?;

        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::REFERER, url.as_str())
            .form(&[
                ("version", "STANDARD"),
                ("form_key", form_key.as_str()),
                ("user[email]", self.username.as_str()),
                ("user[password]", self.password.as_str()),
            ])
            .send()
            .await?;

        expect_ok(&url, response.status())
    }

    async fn fetch_form_key(&self, url: &Url) -> Result<String, AuthError> {
        let response = self.client.get(url.clone()).send().await?;
        expect_ok(url, response.status())?;

        let body = response.text().await?;
        FORM_KEY
            .captures(&body)
            .and_then(|captures| captures.get(1))
            .map(|key| key.as_str().to_string())
            .ok_or_else(|| AuthError::FormKey {
                url: url.to_string(),
            })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.web_base
            .join(path)
            .map_err(|_| AuthError::Endpoint(path.to_string()))
    }
}

fn expect_ok(url: &Url, status: StatusCode) -> Result<(), AuthError> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(AuthError::Status {
            url: url.to_string(),
            status,
        })
    }
}
