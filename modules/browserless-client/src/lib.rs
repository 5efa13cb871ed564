pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

/// A browser cookie forwarded with every navigation (e.g. a login session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

#[derive(Serialize)]
struct NavigateBody<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "<[Cookie]>::is_empty")]
    cookies: &'a [Cookie],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ScreenshotOptions>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotOptions {
    full_page: bool,
    #[serde(rename = "type")]
    image_type: &'static str,
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    async fn post(&self, path: &str, body: &NavigateBody<'_>) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// Fetch fully-rendered HTML content for a URL via Browserless /content endpoint.
    pub async fn content(&self, url: &str, cookies: &[Cookie]) -> Result<String> {
        let body = NavigateBody {
            url,
            cookies,
            options: None,
        };
        let resp = self.post("content", &body).await?;
        Ok(resp.text().await?)
    }

    /// Capture a full-page PNG screenshot via the /screenshot endpoint.
    pub async fn screenshot(&self, url: &str, cookies: &[Cookie]) -> Result<Bytes> {
        let body = NavigateBody {
            url,
            cookies,
            options: Some(ScreenshotOptions {
                full_page: true,
                image_type: "png",
            }),
        };
        let resp = self.post("screenshot", &body).await?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(BrowserlessError::Empty(url.to_string()));
        }
        tracing::debug!(url, bytes = bytes.len(), "browserless: captured screenshot");
        Ok(bytes)
    }
}
