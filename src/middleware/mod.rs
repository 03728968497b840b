//! Handlers and the middleware pipeline.
//!
//! ## Core types
//!
//! - [`IntoHandler`] — anything that turns a [`Context`] into a [`Response`].
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer. The last layer hands off to the endpoint.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`] — an endpoint handler wrapped by an ordered middleware stack.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Response, context::Context};

/// The boxed future every handler and middleware produces.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// threads without copying the underlying closure.
pub type Handler = Arc<dyn Fn(Context) -> ResponseFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> ResponseFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> ResponseFuture {
        Box::pin((self)(ctx))
    }
}

/// Erases the concrete type of `handler`.
pub fn into_handler(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx| handler.call(ctx))
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl Next {
    /// Creates a new `Next` positioned at the start of `middlewares`, ending at `endpoint`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain, or the endpoint once every
    /// middleware has run, and returns its response.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            (self.endpoint)(ctx).await
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations **must** be `Send + Sync` because middleware is shared across
/// Tokio tasks, and **should not** hold `&mut` references to shared state across
/// an `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}

/// An endpoint handler wrapped by an ordered stack of middleware.
///
/// The first layer added is the outermost one.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use respcache::{Response, StatusCode};
/// use respcache::cache::{CacheIntercept, CacheStore};
/// use respcache::context::Context;
/// use respcache::middleware::Pipeline;
///
/// let store = CacheStore::default();
/// let endpoint = |_ctx: Context| async { Response::new(StatusCode::Ok).body("hi") };
/// let pipeline = Pipeline::new(endpoint)
///     .layer(CacheIntercept::new(store, Duration::from_secs(60)));
/// ```
#[derive(Clone)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
    endpoint: Handler,
}

impl Pipeline {
    /// Creates a pipeline with no middleware in front of `endpoint`.
    pub fn new(endpoint: impl IntoHandler) -> Self {
        Self {
            middlewares: Vec::new(),
            endpoint: into_handler(endpoint),
        }
    }

    /// Appends a middleware layer inside every layer added so far.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Number of middleware layers.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl IntoHandler for Pipeline {
    fn call(&self, ctx: Context) -> ResponseFuture {
        let next = Next::new(self.middlewares.clone().into(), self.endpoint.clone());
        Box::pin(next.run(ctx))
    }
}
