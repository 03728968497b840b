//! In-memory response caching.
//!
//! The first `200 OK` response for a cache key is captured as it is written
//! and replayed, status, headers and body, to later requests with the same
//! key until its TTL runs out.
//!
//! - [`CacheStore`] — shared key → entry map with per-entry expiry.
//! - [`CachingWriter`] — [`ResponseWriter`](crate::http::ResponseWriter)
//!   decorator that commits eligible writes to the store.
//! - [`CacheIntercept`] / [`cache_intercept`] — cache-or-compute wrapper for a
//!   handler, also usable as a [`Middleware`](crate::middleware::Middleware).
//! - [`KeyBuilder`] / [`KeyExtractor`] — request → [`CacheKey`] derivation.
//!
//! Two concurrent misses on the same key both run the handler; whichever
//! commits last is the entry that stays.

mod config;
mod entry;
mod error;
mod intercept;
mod key;
mod store;
mod writer;

pub use config::{CacheConfig, MAX_CONFIG_DURATION};
pub use entry::{CacheEntry, CachedResponse, EncodedResponse};
pub use error::{CacheError, CacheWriteError};
pub use intercept::{CacheIntercept, cache_intercept};
pub use key::{CacheKey, KeyBuilder, KeyExtractor};
pub use store::CacheStore;
pub use writer::CachingWriter;
