pub mod blob;
pub mod error;
mod postgres;
pub mod relational;
mod sqlite;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use blob::{BlobStore, OpendalBlobStore, UploadOptions};
pub use error::{BlobError, StoreError};
pub use postgres::PgPostStore;
pub use relational::{connect, PostStore};
pub use sqlite::SqlitePostStore;
