/// Result type alias for relational store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redarchive_common::RedArchiveError> for StoreError {
    fn from(err: redarchive_common::RedArchiveError) -> Self {
        StoreError::Validation(err.to_string())
    }
}

/// Blob failures keep "nothing there" apart from "could not ask".
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob not found: {container}/{path}")]
    NotFound { container: String, path: String },

    #[error("Blob transport error: {0}")]
    Transport(String),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}
