use std::fmt::{self, Write};

use crate::Request;

/// Deterministic identifier of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Derives the cache key for a request.
///
/// Implemented by [`KeyBuilder`] and by any `Fn(&Request) -> CacheKey`.
pub trait KeyExtractor: Send + Sync {
    fn key(&self, request: &Request) -> CacheKey;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Request) -> CacheKey + Send + Sync,
{
    fn key(&self, request: &Request) -> CacheKey {
        (self)(request)
    }
}

/// Builds keys of the form `METHOD:path[?query][|header=value...]`.
///
/// Query parameters are sorted so that `?a=1&b=2` and `?b=2&a=1` share a key.
/// Each vary header contributes `|name=value`, with repeated values joined by
/// `,`, or a bare `|name` when the request lacks the header.
///
/// `%` and any delimiter that could end a part early are percent-escaped
/// inside that part, so distinct requests never share a key.
///
/// # Examples
///
/// ```
/// use respcache::Request;
/// use respcache::cache::{KeyBuilder, KeyExtractor};
///
/// let raw = b"GET /widgets?page=2&sort=asc HTTP/1.1\r\nAccept: application/json\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
///
/// assert_eq!(KeyBuilder::path_only().key(&request).as_str(), "GET:/widgets");
///
/// let key = KeyBuilder::new().vary_on("Accept").key(&request);
/// assert_eq!(key.as_str(), "GET:/widgets?page=2&sort=asc|accept=application/json");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    include_query: bool,
    vary_headers: Vec<String>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBuilder {
    /// Method, path and query string.
    pub fn new() -> Self {
        Self {
            include_query: true,
            vary_headers: Vec::new(),
        }
    }

    /// Method and path only.
    pub fn path_only() -> Self {
        Self {
            include_query: false,
            vary_headers: Vec::new(),
        }
    }

    /// Adds a request header whose value discriminates cached responses.
    #[must_use]
    pub fn vary_on(mut self, header: impl Into<String>) -> Self {
        self.vary_headers.push(header.into().to_ascii_lowercase());
        self
    }
}

impl KeyExtractor for KeyBuilder {
    fn key(&self, request: &Request) -> CacheKey {
        let mut key = String::new();
        push_escaped(&mut key, request.method().as_str(), &[':', '|']);
        key.push(':');
        push_escaped(&mut key, request.path(), &['?', '|']);

        if self.include_query {
            let mut pairs: Vec<&str> = request
                .query_string()
                .unwrap_or_default()
                .split('&')
                .filter(|pair| !pair.is_empty())
                .collect();
            if !pairs.is_empty() {
                pairs.sort_unstable();
                key.push('?');
                for (i, pair) in pairs.into_iter().enumerate() {
                    if i > 0 {
                        key.push('&');
                    }
                    push_escaped(&mut key, pair, &['|']);
                }
            }
        }

        for name in &self.vary_headers {
            key.push('|');
            push_escaped(&mut key, name, &['|', '=']);

            let mut values = request.headers().get_all(name).peekable();
            if values.peek().is_none() {
                continue;
            }
            key.push('=');
            for (i, value) in values.enumerate() {
                if i > 0 {
                    key.push(',');
                }
                push_escaped(&mut key, value, &['|', ',']);
            }
        }

        CacheKey(key)
    }
}

// Appends `part`, percent-escaping `%` and every char in `reserved`.
fn push_escaped(key: &mut String, part: &str, reserved: &[char]) {
    for c in part.chars() {
        if c == '%' || reserved.contains(&c) {
            // Infallible for String.
            let _ = write!(key, "%{:02X}", u32::from(c));
        } else {
            key.push(c);
        }
    }
}
