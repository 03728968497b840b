use std::{io, time::Duration};

use tracing::{debug, error};

use super::{CacheKey, CacheStore, CacheWriteError, CachedResponse};
use crate::http::{Headers, ResponseWriter, StatusCode};

/// A [`ResponseWriter`] decorator that commits successful responses to a
/// [`CacheStore`].
///
/// Every write is forwarded to the wrapped sink first. When the forward
/// succeeds and the status is exactly `200 OK`, a snapshot of the status, the
/// full header set and the bytes just written is stored under the request's
/// key. Only the first successful write of a response is cached; later writes
/// are forwarded untouched.
///
/// Status, header and `written` queries report the wrapped sink's state.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use respcache::cache::{CacheKey, CacheStore, CachingWriter};
/// use respcache::http::{ResponseBuffer, ResponseWriter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = CacheStore::default();
/// let key = CacheKey::from("GET:/widgets");
/// let mut sink = CachingWriter::new(
///     ResponseBuffer::new(),
///     store.clone(),
///     key.clone(),
///     Duration::from_secs(300),
/// );
/// sink.headers_mut().insert("X-Source", "origin");
/// sink.write(br#"{"id":1}"#).unwrap();
///
/// let entry = store.get(&key).unwrap();
/// assert_eq!(entry.response.body, br#"{"id":1}"#);
/// # }
/// ```
pub struct CachingWriter<W> {
    inner: W,
    store: CacheStore,
    key: CacheKey,
    ttl: Duration,
    keep_alive: bool,
    committed: bool,
}

impl<W: ResponseWriter> CachingWriter<W> {
    pub fn new(inner: W, store: CacheStore, key: CacheKey, ttl: Duration) -> Self {
        Self {
            inner,
            store,
            key,
            ttl,
            keep_alive: true,
            committed: false,
        }
    }

    /// Records whether replays of the cached response keep the connection open.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns `true` once a write has been committed to the store.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Unwraps the decorated sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Forwards `data` and, if the response is eligible, commits it to the store.
    ///
    /// # Errors
    ///
    /// - [`CacheWriteError::Forward`] — the wrapped sink rejected the write;
    ///   nothing was cached.
    /// - [`CacheWriteError::NotCacheable`] — the bytes were delivered but the
    ///   status is not `200 OK`.
    /// - [`CacheWriteError::Encode`] — the bytes were delivered but the
    ///   snapshot could not be encoded.
    pub fn write_and_cache(&mut self, data: &[u8]) -> Result<usize, CacheWriteError> {
        let written = self.inner.write(data)?;
        self.commit(data, written)
    }

    /// String variant of [`write_and_cache`](Self::write_and_cache).
    pub fn write_str_and_cache(&mut self, data: &str) -> Result<usize, CacheWriteError> {
        let written = self.inner.write_str(data)?;
        self.commit(data.as_bytes(), written)
    }

    fn commit(&mut self, data: &[u8], written: usize) -> Result<usize, CacheWriteError> {
        let status = self.inner.status();
        if status != StatusCode::Ok {
            return Err(CacheWriteError::NotCacheable { status, written });
        }
        if self.committed {
            debug!(key = %self.key, "response already cached — forwarding extra write only");
            return Ok(written);
        }

        let snapshot = CachedResponse::new(status, self.inner.headers().clone(), data)
            .keep_alive(self.keep_alive);
        let payload = snapshot
            .encode()
            .map_err(|source| CacheWriteError::Encode { written, source })?;

        self.store.set(self.key.clone(), payload, Some(self.ttl));
        self.committed = true;
        debug!(key = %self.key, ttl = ?self.ttl, bytes = data.len(), "response cached");
        Ok(written)
    }

    // Cache-layer failures never reach the caller; only forward failures do.
    fn absorb(&self, result: Result<usize, CacheWriteError>) -> io::Result<usize> {
        match result {
            Ok(written) => Ok(written),
            Err(CacheWriteError::Forward(e)) => Err(e),
            Err(CacheWriteError::NotCacheable { status, written }) => {
                debug!(key = %self.key, status = %status, "response not cached");
                Ok(written)
            }
            Err(CacheWriteError::Encode { written, source }) => {
                error!(key = %self.key, error = %source, "failed to cache response");
                Ok(written)
            }
        }
    }
}

impl<W: ResponseWriter> ResponseWriter for CachingWriter<W> {
    fn write_header(&mut self, status: StatusCode) {
        self.inner.write_header(status);
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let result = self.write_and_cache(data);
        self.absorb(result)
    }

    fn write_str(&mut self, data: &str) -> io::Result<usize> {
        let result = self.write_str_and_cache(data);
        self.absorb(result)
    }

    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn written(&self) -> bool {
        self.inner.written()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBuffer;

    const TTL: Duration = Duration::from_secs(300);

    fn writer(store: &CacheStore) -> CachingWriter<ResponseBuffer> {
        CachingWriter::new(
            ResponseBuffer::new(),
            store.clone(),
            CacheKey::from("GET:/widgets"),
            TTL,
        )
    }

    #[tokio::test]
    async fn ok_write_is_forwarded_and_cached() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        sink.headers_mut().insert("X-Source", "origin");
        sink.write_header(StatusCode::Ok);

        assert_eq!(sink.write_and_cache(b"{\"id\":1}").unwrap(), 8);
        assert!(sink.is_committed());

        let entry = store.get(sink.key()).unwrap();
        assert_eq!(entry.response.status, StatusCode::Ok);
        assert_eq!(entry.response.headers.get("x-source"), Some("origin"));
        assert_eq!(entry.response.body, b"{\"id\":1}");

        let inner = sink.into_inner();
        assert_eq!(inner.body(), b"{\"id\":1}");
    }

    #[tokio::test]
    async fn connection_close_is_recorded() {
        let store = CacheStore::default();
        let mut sink = writer(&store).keep_alive(false);
        sink.write(b"bye").unwrap();
        assert!(!store.get(sink.key()).unwrap().response.keep_alive);
    }

    #[tokio::test]
    async fn write_str_caches_the_string() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        assert_eq!(sink.write_str_and_cache("plain").unwrap(), 5);
        assert_eq!(store.get(sink.key()).unwrap().response.body, b"plain");
    }

    #[tokio::test]
    async fn non_ok_status_is_delivered_but_not_cached() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        sink.write_header(StatusCode::InternalServerError);

        let err = sink.write_and_cache(b"\"error\"").unwrap_err();
        assert!(matches!(
            err,
            CacheWriteError::NotCacheable {
                status: StatusCode::InternalServerError,
                written: 7
            }
        ));
        assert_eq!(err.written(), Some(7));
        assert!(store.get(sink.key()).is_none());
        assert_eq!(sink.into_inner().body(), b"\"error\"");
    }

    #[tokio::test]
    async fn other_success_codes_are_not_cached() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        sink.write_header(StatusCode::Created);
        assert!(sink.write_and_cache(b"made").is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn trait_write_absorbs_ineligibility() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        sink.write_header(StatusCode::NotFound);
        assert_eq!(sink.write(b"missing").unwrap(), 7);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn forward_failure_propagates_and_skips_cache() {
        let store = CacheStore::default();
        let mut sink = CachingWriter::new(
            ResponseBuffer::with_body_limit(2),
            store.clone(),
            CacheKey::from("GET:/big"),
            TTL,
        );
        let err = sink.write_and_cache(b"too big").unwrap_err();
        assert!(matches!(err, CacheWriteError::Forward(_)));
        assert!(!sink.is_committed());
        assert!(store.is_empty());

        // and through the trait the io error surfaces as-is
        assert!(sink.write(b"also too big").is_err());
    }

    #[tokio::test]
    async fn first_successful_write_wins() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        sink.write(b"first").unwrap();
        sink.write(b"second").unwrap();

        assert_eq!(store.get(sink.key()).unwrap().response.body, b"first");
        assert_eq!(sink.into_inner().body(), b"firstsecond");
    }

    #[tokio::test]
    async fn commit_overwrites_previous_entry() {
        let store = CacheStore::default();
        writer(&store).write(b"old").unwrap();
        writer(&store).write(b"new").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&CacheKey::from("GET:/widgets")).unwrap().response.body,
            b"new"
        );
    }

    #[test]
    fn status_and_written_mirror_inner_sink() {
        let store = CacheStore::default();
        let mut sink = writer(&store);
        assert!(!sink.written());
        assert_eq!(sink.status(), StatusCode::Ok);

        sink.write_header(StatusCode::Accepted);
        assert!(sink.written());
        assert_eq!(sink.status(), StatusCode::Accepted);

        let inner = sink.into_inner();
        assert!(inner.written());
        assert_eq!(inner.status(), StatusCode::Accepted);
    }
}
