pub mod config;
pub mod error;
pub mod identity;
pub mod politeness;
pub mod types;

pub use config::{BlobBackend, DbEngine, IngestConfig};
pub use error::RedArchiveError;
pub use identity::{derive_id, derive_post_id, DELETED_USER_ID, NOT_FOUND_USER_ID};
pub use politeness::Politeness;
pub use types::*;
