pub mod browser;
pub mod comments;
pub mod error;
pub mod gate;
pub mod ingest;
pub mod legacy;
pub mod listing;
pub mod manifest;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod video;
