use browserless_client::BrowserlessError;

/// Why an artifact could not be captured. Never fatal on its own: the
/// orchestrator skips the post and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserlessError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Empty {what} for {url}")]
    Empty { what: &'static str, url: String },
}
