use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use browserless_client::{BrowserlessClient, Cookie};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use redarchive_common::Politeness;

use crate::error::ExtractError;
use crate::listing::parse_listing;
use crate::traits::{ArtifactExtractor, Credentials, ListingPage, ListingScraper, MediaFetcher};

const USER_AGENT: &str = "redarchive/0.1 (archival crawler)";
const SESSION_COOKIE: &str = "reddit_session";
const COOKIE_DOMAIN: &str = ".reddit.com";
pub const DEFAULT_LOGIN_ORIGIN: &str = "https://old.reddit.com";

#[derive(Deserialize)]
struct LoginResponse {
    json: LoginBody,
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    data: Option<LoginData>,
}

#[derive(Deserialize)]
struct LoginData {
    cookie: Option<String>,
}

// --- Browserless-backed session ---

/// One logged-in browsing session. Listing pages and screenshots go through
/// Browserless; the raw `.json` documents are plain HTTP with the same
/// session cookie. Every outbound request is preceded by a politeness pause.
pub struct RedditBrowser {
    browserless: BrowserlessClient,
    http: reqwest::Client,
    login_origin: String,
    cookies: RwLock<Vec<Cookie>>,
    politeness: Politeness,
}

impl RedditBrowser {
    pub fn new(browserless_url: &str, token: Option<&str>, politeness: Politeness) -> Result<Self> {
        info!(browserless_url, "Using Browserless session");
        let browserless =
            BrowserlessClient::new(browserless_url, token).context("Failed to build Browserless client")?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            browserless,
            http,
            login_origin: DEFAULT_LOGIN_ORIGIN.to_string(),
            cookies: RwLock::new(Vec::new()),
            politeness,
        })
    }

    pub fn with_login_origin(mut self, origin: &str) -> Self {
        self.login_origin = origin.trim_end_matches('/').to_string();
        self
    }

    async fn cookies(&self) -> Vec<Cookie> {
        self.cookies.read().await.clone()
    }

    async fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.read().await;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[async_trait]
impl ListingScraper for RedditBrowser {
    async fn login(&self, credentials: &Credentials) -> Result<()> {
        let url = format!("{}/api/login/{}", self.login_origin, credentials.username);
        info!(user = credentials.username.as_str(), "Logging in");

        self.politeness.pause().await;
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("user", credentials.username.as_str()),
                ("passwd", credentials.password.as_str()),
                ("api_type", "json"),
            ])
            .send()
            .await
            .context("Login request failed")?
            .error_for_status()
            .context("Login rejected")?;

        let body: LoginResponse = resp.json().await.context("Unparseable login response")?;
        if !body.json.errors.is_empty() {
            bail!("Login failed: {}", serde_json::Value::from(body.json.errors));
        }
        let session = body
            .json
            .data
            .and_then(|d| d.cookie)
            .context("Login response carried no session cookie")?;

        *self.cookies.write().await = vec![Cookie {
            name: SESSION_COOKIE.to_string(),
            value: session,
            domain: COOKIE_DOMAIN.to_string(),
        }];
        info!("Login succeeded, session cookie captured");
        Ok(())
    }

    async fn scrape_page(&self, url: &str) -> Result<ListingPage> {
        info!(url, scraper = "browserless", "Scraping listing page");

        self.politeness.pause().await;
        let html = self
            .browserless
            .content(url, &self.cookies().await)
            .await
            .context("Browserless content request failed")?;

        if html.trim().is_empty() {
            warn!(url, scraper = "browserless", "Empty HTML response");
        }

        let page = parse_listing(&html, url);
        info!(
            url,
            posts = page.entries.len(),
            has_next = page.next_page.is_some(),
            "Parsed listing page"
        );
        Ok(page)
    }
}

#[async_trait]
impl ArtifactExtractor for RedditBrowser {
    async fn capture_screenshot(&self, url: &str) -> std::result::Result<Bytes, ExtractError> {
        self.politeness.pause().await;
        let png = self.browserless.screenshot(url, &self.cookies().await).await?;
        info!(url, bytes = png.len(), "Captured screenshot");
        Ok(png)
    }

    async fn capture_raw_json(&self, url: &str) -> std::result::Result<Bytes, ExtractError> {
        let json_url = format!("{url}.json");

        self.politeness.pause().await;
        let mut request = self.http.get(&json_url);
        if let Some(cookie) = self.cookie_header().await {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let bytes = request.send().await?.error_for_status()?.bytes().await?;

        if bytes.is_empty() {
            return Err(ExtractError::Empty {
                what: "post json",
                url: json_url,
            });
        }
        info!(url = json_url.as_str(), bytes = bytes.len(), "Captured raw JSON");
        Ok(bytes)
    }
}

// --- Plain HTTP media ---

pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?
            .bytes()
            .await
            .with_context(|| format!("Reading body of {url} failed"))?;
        Ok(bytes)
    }
}
