use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, error};

use super::{
    CacheEntry, CacheKey, CacheStore, CachedResponse, CachingWriter, KeyBuilder, KeyExtractor,
};
use crate::{
    Response, StatusCode,
    context::Context,
    http::{ResponseBuffer, ResponseWriter, writer::DEFAULT_BODY_LIMIT},
    middleware::{IntoHandler, Middleware, Next, ResponseFuture},
};

/// Cache-or-compute wrapper around a handler.
///
/// For each request the key is derived with the configured [`KeyExtractor`]
/// (default: [`KeyBuilder::new`]). A live entry is replayed without calling
/// the handler. Otherwise the handler runs and its response is written
/// through a [`CachingWriter`], which commits it when the status is `200 OK`.
/// If the handler aborted the exchange, the key is invalidated afterwards.
///
/// Use it per route with [`wrap`](Self::wrap) / [`cache_intercept`], or as a
/// [`Middleware`] layer in a [`Pipeline`](crate::middleware::Pipeline).
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use respcache::{Response, StatusCode, Server};
/// use respcache::cache::{CacheStore, cache_intercept};
/// use respcache::context::Context;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = CacheStore::default();
///     store.spawn_sweeper();
///
///     let widgets = cache_intercept(store, Duration::from_secs(300), |_ctx: Context| async {
///         Response::new(StatusCode::Ok)
///             .header("Content-Type", "application/json")
///             .body(r#"{"id":1}"#)
///     });
///
///     Server::bind("127.0.0.1:8080").await?.run(widgets).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CacheIntercept {
    store: CacheStore,
    ttl: Duration,
    keys: Arc<dyn KeyExtractor>,
    body_limit: usize,
}

impl CacheIntercept {
    /// Caches responses in `store` for `ttl`. A `ttl` too large to put a
    /// deadline on (such as [`Duration::MAX`]) keeps entries until they are
    /// deleted or overwritten.
    pub fn new(store: CacheStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            keys: Arc::new(KeyBuilder::new()),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Replaces the key derivation.
    #[must_use]
    pub fn key_with(mut self, keys: impl KeyExtractor + 'static) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    /// Sets the largest body the response sink accepts, for fresh and replayed
    /// responses alike.
    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serves `ctx` from the cache, or by running `handler` and capturing its
    /// response.
    ///
    /// Always resolves to a response: a replay or forward-write failure yields
    /// `500 Internal Server Error`. The abort flag is read only after the
    /// handler's future has completed.
    pub async fn serve<H, Fut>(&self, ctx: Context, handler: H) -> Response
    where
        H: FnOnce(Context) -> Fut,
        Fut: Future<Output = Response>,
    {
        let key = self.keys.key(ctx.request());

        if let Some(entry) = self.store.get(&key) {
            debug!(key = %key, "cache hit");
            return self.replay(&key, entry);
        }
        debug!(key = %key, "cache miss");

        let abort = ctx.abort_handle();
        let response = handler(ctx).await;
        let keep_alive = response.is_keep_alive();

        let mut sink = CachingWriter::new(
            ResponseBuffer::with_body_limit(self.body_limit),
            self.store.clone(),
            key.clone(),
            self.ttl,
        )
        .keep_alive(keep_alive);
        let delivered = response.write_to(&mut sink);

        if abort.is_aborted() {
            self.store.delete(&key);
            debug!(key = %key, "request aborted — cached response discarded");
        }

        match delivered {
            Ok(()) => sink.into_inner().into_response().keep_alive(keep_alive),
            Err(e) => {
                error!(key = %key, error = %e, "failed to write response");
                internal_error()
            }
        }
    }

    /// Wraps `handler` so every call goes through [`serve`](Self::serve).
    pub fn wrap(self, handler: impl IntoHandler) -> impl IntoHandler {
        let intercept = Arc::new(self);
        let handler = Arc::new(handler);
        move |ctx: Context| -> ResponseFuture {
            let intercept = Arc::clone(&intercept);
            let handler = Arc::clone(&handler);
            Box::pin(async move { intercept.serve(ctx, |ctx| handler.call(ctx)).await })
        }
    }

    fn replay(&self, key: &CacheKey, entry: CacheEntry) -> Response {
        let CachedResponse {
            status,
            headers,
            body,
            keep_alive,
        } = entry.response;

        let mut sink = ResponseBuffer::with_body_limit(self.body_limit);
        for (name, value) in headers.iter() {
            sink.headers_mut().insert(name, value);
        }
        sink.write_header(status);

        match sink.write(&body) {
            Ok(_) => sink.into_response().keep_alive(keep_alive),
            Err(e) => {
                self.store.delete(key);
                error!(key = %key, error = %e, "cannot replay cached response — entry discarded");
                internal_error()
            }
        }
    }
}

impl Middleware for CacheIntercept {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        let intercept = self.clone();
        Box::pin(async move { intercept.serve(ctx, |ctx| next.run(ctx)).await })
    }
}

/// Wraps `handler` with a response cache backed by `store`, caching each
/// successful response for `ttl` under a [`KeyBuilder::new`] key.
pub fn cache_intercept(
    store: CacheStore,
    ttl: Duration,
    handler: impl IntoHandler,
) -> impl IntoHandler {
    CacheIntercept::new(store, ttl).wrap(handler)
}

fn internal_error() -> Response {
    Response::new(StatusCode::InternalServerError).body("Internal Server Error")
}
