use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedArchiveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed post JSON: {0}")]
    MalformedPost(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
