//! Per-request context — the exchange a handler receives.
//!
//! A [`Context`] owns the inbound [`Request`] and an [`AbortHandle`]. Handlers
//! call [`Context::abort`] to signal that the exchange ended abnormally;
//! layers that wrapped the handler keep a clone of the handle and inspect it
//! once the handler's future has resolved.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::Request;

/// Shared flag recording whether an exchange was aborted.
///
/// Cloning the handle shares the flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Creates a handle in the not-aborted state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the exchange as aborted.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Returns `true` once [`abort`](Self::abort) has been called on any clone.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Per-request context handed to handlers and middleware.
pub struct Context {
    request: Request,
    abort: AbortHandle,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request,
            abort: AbortHandle::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Marks this exchange as aborted. A response may still be returned; layers
    /// such as the response cache treat it as abnormal and discard it.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Returns a handle sharing this context's abort flag.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}
