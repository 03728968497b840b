//! TCP front end: accepts HTTP/1.1 connections and hands each request to a
//! handler.
//!
//! Any [`IntoHandler`] can be served, including handlers wrapped by
//! [`cache_intercept`](crate::cache::cache_intercept) and whole
//! [`Pipeline`](crate::middleware::Pipeline)s. Connections stay open between
//! requests unless either side asks to close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::middleware::IntoHandler;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Largest request (head plus body) buffered for one exchange.
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

const READ_CAPACITY: usize = 4096;

/// A bound listener ready to serve a handler.
///
/// # Examples
///
/// ```rust,no_run
/// use respcache::server::Server;
/// use respcache::context::Context;
/// use respcache::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_ctx: Context| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds a listener to `addr`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address is unavailable.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound, useful after binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `handler` on every accepted connection, one task per
    /// connection. Each request gets a fresh [`Context`].
    ///
    /// Runs until the process exits; failed accepts are logged and skipped.
    pub async fn run<H>(self, handler: H) -> Result<(), ServerError>
    where
        H: IntoHandler,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "serving");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, handler.as_ref()).await {
                    warn!(peer = %peer, error = %e, "connection dropped");
                }
            });
        }
    }
}

/// What the bytes buffered so far amount to.
#[derive(Debug)]
enum Frame {
    /// Head or body still arriving.
    Partial,
    /// A complete request spanning the first `consumed` bytes.
    Ready { request: Request, consumed: usize },
    /// The connection must be answered with this response and closed.
    Rejected(Response),
}

fn next_frame(buf: &[u8]) -> Frame {
    if buf.len() > MAX_BUFFERED {
        return Frame::Rejected(
            Response::new(StatusCode::PayloadTooLarge).body("Request entity too large"),
        );
    }

    let (head, body_offset) = match Request::parse(buf) {
        Ok(parsed) => parsed,
        Err(RequestError::Incomplete) => return Frame::Partial,
        Err(e) => {
            return Frame::Rejected(
                Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
            );
        }
    };

    let consumed = body_offset + head.content_length().unwrap_or(0);
    if buf.len() < consumed {
        return Frame::Partial;
    }

    // The first parse saw any pipelined bytes as body; cut them off.
    match Request::parse(&buf[..consumed]) {
        Ok((request, _)) => Frame::Ready { request, consumed },
        Err(e) => Frame::Rejected(
            Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}")),
        ),
    }
}

async fn serve_connection<H>(mut stream: TcpStream, peer: SocketAddr, handler: &H) -> io::Result<()>
where
    H: IntoHandler,
{
    let mut buf = BytesMut::with_capacity(READ_CAPACITY);

    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            debug!(peer = %peer, "peer closed connection");
            return Ok(());
        }

        let (request, consumed) = match next_frame(&buf) {
            Frame::Partial => continue,
            Frame::Rejected(response) => {
                warn!(peer = %peer, status = %response.status(), "rejecting request");
                stream.write_all(&response.keep_alive(false).into_bytes()).await?;
                return Ok(());
            }
            Frame::Ready { request, consumed } => (request, consumed),
        };

        debug!(peer = %peer, method = %request.method(), path = %request.path(), "request");
        let client_keep_alive = request.is_keep_alive();
        let response = handler.call(Context::new(request)).await;
        let keep_alive = client_keep_alive && response.is_keep_alive();

        stream.write_all(&response.keep_alive(keep_alive).into_bytes()).await?;
        stream.flush().await?;
        let _ = buf.split_to(consumed);

        if !keep_alive {
            debug!(peer = %peer, "closing connection");
            return Ok(());
        }
    }
}
