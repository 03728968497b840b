//! # respcache
//!
//! In-memory HTTP response caching for an async HTTP/1.1 handler stack.
//!
//! A handler wrapped with [`cache::cache_intercept`] runs once per cache key;
//! its first `200 OK` response is captured while it is written and replayed
//! to later requests with the same key until the TTL runs out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use respcache::cache::{CacheStore, cache_intercept};
//! use respcache::context::Context;
//! use respcache::{Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CacheStore::default();
//!     store.spawn_sweeper();
//!
//!     let handler = cache_intercept(store, Duration::from_secs(300), |_ctx: Context| async {
//!         Response::new(StatusCode::Ok).body("Hello, World!")
//!     });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(handler).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
