//! Deterministic, name-based ids.
//!
//! Every entity that can be scraped twice (posts, authors, day buckets,
//! resolved content) gets a UUIDv3 derived from a stable natural key, so a
//! re-run of any pass lands on the ids already in the store. Posts hash
//! under the DNS namespace; everything else under the URL namespace.
//! Neither namespace may change: stored rows are keyed by them.

use std::sync::LazyLock;

use uuid::Uuid;

/// Natural key shared by every author whose account was deleted.
pub const DELETED_USER_KEY: &str = "deleted_user";
/// Natural key shared by every author that could not be read at all.
pub const NOT_FOUND_USER_KEY: &str = "not_found";

pub static DELETED_USER_ID: LazyLock<Uuid> = LazyLock::new(|| derive_id(DELETED_USER_KEY));
pub static NOT_FOUND_USER_ID: LazyLock<Uuid> = LazyLock::new(|| derive_id(NOT_FOUND_USER_KEY));

/// Id for any non-post entity keyed by `key` (author full-name, ISO day,
/// blob path of a resolved artifact).
pub fn derive_id(key: &str) -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// Id for a post, keyed by the platform-native listing id (e.g. `thing_t3_1jc301u`).
pub fn derive_post_id(native_id: &str) -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_DNS, native_id.as_bytes())
}

/// Id of the calendar-day bucket for an ISO date (`YYYY-MM-DD`).
pub fn day_bucket_id(iso_day: &str) -> Uuid {
    derive_id(iso_day)
}
