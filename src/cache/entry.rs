use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::CacheError;
use crate::http::{Headers, StatusCode};

/// Snapshot of a response captured for replay: status, every header value in
/// write order, the exact body bytes and whether the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

#[derive(Serialize)]
struct HeadRef<'a> {
    status: StatusCode,
    headers: &'a Headers,
    keep_alive: bool,
}

#[derive(Deserialize)]
struct Head {
    status: StatusCode,
    headers: Headers,
    keep_alive: bool,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            keep_alive: true,
        }
    }

    /// Sets whether a replay keeps the connection open.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Encodes the snapshot into the store's opaque representation.
    ///
    /// Layout: a big-endian `u32` head length, the JSON head (status, headers,
    /// keep-alive), then the raw body bytes.
    pub fn encode(&self) -> Result<EncodedResponse, CacheError> {
        let head = serde_json::to_vec(&HeadRef {
            status: self.status,
            headers: &self.headers,
            keep_alive: self.keep_alive,
        })
        .map_err(CacheError::Encode)?;
        let head_len = u32::try_from(head.len()).map_err(|_| CacheError::HeadTooLarge)?;

        let mut buf = BytesMut::with_capacity(4 + head.len() + self.body.len());
        buf.put_u32(head_len);
        buf.put_slice(&head);
        buf.put_slice(&self.body);
        Ok(EncodedResponse(buf.freeze()))
    }

    /// Decodes a snapshot previously produced by [`encode`](Self::encode).
    pub fn decode(encoded: &EncodedResponse) -> Result<Self, CacheError> {
        let mut raw = encoded.0.clone();
        if raw.remaining() < 4 {
            return Err(CacheError::Truncated);
        }
        let head_len = raw.get_u32() as usize;
        if raw.remaining() < head_len {
            return Err(CacheError::Truncated);
        }
        let head = raw.split_to(head_len);
        let Head {
            status,
            headers,
            keep_alive,
        } = serde_json::from_slice(&head).map_err(CacheError::Decode)?;

        Ok(Self {
            status,
            headers,
            body: raw.to_vec(),
            keep_alive,
        })
    }
}

/// An encoded [`CachedResponse`]. Nothing outside the crate reads the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse(Bytes);

impl From<Bytes> for EncodedResponse {
    fn from(raw: Bytes) -> Self {
        Self(raw)
    }
}

/// A live cache hit: the decoded snapshot plus the instant it stops being
/// served, or `None` if it never expires.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: CachedResponse,
    pub expires_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_restores_snapshot() {
        let mut headers = Headers::new();
        headers.insert("X-Source", "origin");
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        let snapshot =
            CachedResponse::new(StatusCode::Ok, headers, &b"{\"id\":1}"[..]).keep_alive(false);

        let encoded = snapshot.encode().unwrap();
        assert_eq!(CachedResponse::decode(&encoded).unwrap(), snapshot);
    }

    #[test]
    fn body_is_stored_raw() {
        let body = vec![0xAB_u8; 4096];
        let snapshot = CachedResponse::new(StatusCode::Ok, Headers::new(), body.clone());
        let encoded = snapshot.encode().unwrap();

        assert!(encoded.0.len() < body.len() + 64);
        assert!(encoded.0.ends_with(&body));
        assert_eq!(CachedResponse::decode(&encoded).unwrap().body, body);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let short = EncodedResponse::from(Bytes::from_static(b"\x00"));
        assert!(matches!(
            CachedResponse::decode(&short),
            Err(CacheError::Truncated)
        ));

        let overlong = EncodedResponse::from(Bytes::from_static(b"\x00\x00\x00\xffnot json"));
        assert!(matches!(
            CachedResponse::decode(&overlong),
            Err(CacheError::Truncated)
        ));

        let bad_head = EncodedResponse::from(Bytes::from_static(b"\x00\x00\x00\x03{{{body"));
        assert!(matches!(
            CachedResponse::decode(&bad_head),
            Err(CacheError::Decode(_))
        ));
    }
}
