//! Client (C8): dial-or-reuse a pooled connection, serialize a request,
//! read a response, retry idempotent failures, and optionally follow
//! redirects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use memchr::memmem;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use talon_config::ClientConfig;
use talon_core::body::ChunkedWriter;
use talon_core::header::{ResponseHeader, CONTENT_LENGTH_CHUNKED, CONTENT_LENGTH_IDENTITY};
use talon_core::{Body, Request, Response};

use crate::error::{ClientError, Result};
use crate::pool::{ConnectionPool, Dialer, PooledConnection};

/// HTTP/1.1 client: acquires pooled connections, drives the request/
/// response exchange, and applies the configured retry and redirect policy.
pub struct Client<D: Dialer> {
    pool: Arc<ConnectionPool<D>>,
    config: Arc<ClientConfig>,
}

impl<D: Dialer> Client<D> {
    pub fn new(dialer: D, config: Arc<ClientConfig>) -> Self {
        let pool = Arc::new(ConnectionPool::new(dialer, config.clone()));
        Self { pool, config }
    }

    /// The underlying connection pool, for callers that want pool-level
    /// metrics (`total_for`/`idle_count_for`) alongside the client.
    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    /// Performs a single request/response exchange, with idempotent-retry
    /// but no redirect following. See [`Client::do_follow_redirects`] for
    /// the variant that follows 3xx responses.
    pub async fn do_request(&self, req: &mut Request, resp: &mut Response) -> Result<()> {
        self.ensure_host(req)?;
        let host = String::from_utf8_lossy(req.header().host()).into_owned();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut conn = self.pool.acquire(&host).await?;
            match self.exchange(&mut conn, req, resp).await {
                Ok(keep_alive) => {
                    conn.discard = !keep_alive;
                    self.pool.release(conn);
                    return Ok(());
                }
                Err((err, wrote_any, received_any)) => {
                    conn.discard = true;
                    self.pool.release(conn);

                    let idempotent = req.header().is_idempotent();
                    let retry_disabled = req.header().connection_close();
                    let retryable = !received_any && !retry_disabled && (idempotent || !wrote_any);

                    if retryable {
                        if attempt < self.config.max_idempotent_call_attempts {
                            tracing::warn!(host = %host, attempt, "retrying after connection failure");
                            continue;
                        }
                        return Err(ClientError::RetriesExhausted(attempt));
                    }
                    return Err(err);
                }
            }
        }
    }

    /// As [`Client::do_request`], following 301/302/303/307/308 redirects
    /// up to `MaxRedirectsCount`. A 303 downgrades the method to `GET` and
    /// drops the body.
    pub async fn do_follow_redirects(&self, req: &mut Request, resp: &mut Response) -> Result<()> {
        let mut redirects = 0u32;
        loop {
            self.do_request(req, resp).await?;
            let status = resp.header().status_code();
            if !matches!(status, 301 | 302 | 303 | 307 | 308) {
                return Ok(());
            }
            redirects += 1;
            if redirects > self.config.max_redirects_count {
                return Err(ClientError::TooManyRedirects(self.config.max_redirects_count));
            }

            let location = resp
                .header()
                .other_headers()
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(b"location"))
                .map(|h| h.value.clone())
                .unwrap_or_default();
            if location.is_empty() {
                return Ok(());
            }

            let is_tls = req.header().request_uri().starts_with(b"https://");
            let mut current = req.uri(is_tls)?.clone();
            current.update(&location)?;
            req.header_mut().set_request_uri(&current.request_uri());
            req.header_mut().set_host(current.host().as_bytes());

            if status == 303 {
                req.header_mut().set_method(b"GET");
                req.swap_body(Vec::new());
            }
        }
    }

    /// `DoTimeout(req, resp, t)` == `DoDeadline(req, resp, now+t)`.
    pub async fn do_timeout(&self, req: &mut Request, resp: &mut Response, t: Duration) -> Result<()> {
        self.do_deadline(req, resp, Instant::now() + t).await
    }

    /// Runs `do_request` racing an absolute deadline. On timeout the
    /// in-flight attempt is abandoned (its connection is discarded once
    /// that task's I/O unblocks) and [`ClientError::Timeout`] is
    /// returned; the response is untouched in that case.
    pub async fn do_deadline(&self, req: &mut Request, resp: &mut Response, deadline: Instant) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, self.do_request(req, resp)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    fn ensure_host(&self, req: &mut Request) -> Result<()> {
        if !req.header().host().is_empty() {
            return Ok(());
        }
        let is_tls = req.header().request_uri().starts_with(b"https://");
        let uri = req.uri(is_tls)?;
        if uri.host().is_empty() {
            return Err(ClientError::HostRequired);
        }
        let host = uri.host().as_bytes().to_vec();
        req.header_mut().set_host(&host);
        Ok(())
    }

    /// Runs one write+read exchange over an acquired connection. Returns
    /// whether the connection may be kept alive, or `(error, wrote_any,
    /// received_any)` so the retry policy in [`Client::do_request`] can
    /// decide whether this attempt is safe to retry.
    async fn exchange(
        &self,
        conn: &mut PooledConnection<D::Stream>,
        req: &mut Request,
        resp: &mut Response,
    ) -> std::result::Result<bool, (ClientError, bool, bool)> {
        // `D::Stream` isn't guaranteed to expose a socket-level write
        // deadline (a TLS-wrapped stream, for one), so the timeout is
        // enforced by wrapping the future rather than a `setsockopt`;
        // `next_write_deadline` still tracks drift so a future dialer
        // that does own a raw fd can reuse this same bookkeeping.
        let write_budget = self.config.write_timeout().unwrap_or(Duration::from_secs(30));
        let _ = conn.next_write_deadline(Instant::now() + write_budget, write_budget);

        let wrote = tokio::time::timeout(write_budget, write_request(conn, req)).await;
        let wrote_any = true;
        match wrote {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err((e, wrote_any, false)),
            Err(_) => return Err((ClientError::Timeout, wrote_any, false)),
        }

        let read_budget = self.config.read_timeout().unwrap_or(Duration::from_secs(30));
        let _ = conn.next_read_deadline(Instant::now() + read_budget, read_budget);
        let read_result = tokio::time::timeout(read_budget, read_response(conn, resp, self.config.max_response_body_size)).await;
        let received_any = !conn.read_buf.is_empty();
        match read_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err((e, wrote_any, received_any)),
            Err(_) => return Err((ClientError::Timeout, wrote_any, received_any)),
        }

        conn.used = true;
        Ok(!resp.header().connection_close())
    }
}

/// Writes `req`'s header, handling `Expect: 100-continue` by sending the
/// header alone and waiting for either a `100` interim response (then
/// sending the body) or a final non-100 response (then abandoning the
/// body, leaving the final response bytes in `conn.read_buf` for the
/// caller to parse).
async fn write_request<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    conn: &mut PooledConnection<S>,
    req: &mut Request,
) -> Result<()> {
    set_content_length_for_body(req);

    let mut header_buf = Vec::new();
    req.header().write_to(&mut header_buf)?;
    conn.stream.write_all(&header_buf).await?;

    if !req.may_continue() {
        write_body(conn, req).await?;
        return Ok(());
    }

    conn.stream.flush().await?;
    if wait_for_continue(conn).await? {
        write_body(conn, req).await?;
    }
    // else: peer already sent a final response without waiting for the
    // body; those bytes are sitting in `conn.read_buf` for `read_response`.
    Ok(())
}

fn set_content_length_for_body(req: &mut Request) {
    let framing = match req.body() {
        Body::Inline(b) => b.len() as i64,
        Body::Reader { declared_size: Some(n), .. } => *n as i64,
        Body::Reader { declared_size: None, .. } => CONTENT_LENGTH_CHUNKED,
        Body::Writer(_) => CONTENT_LENGTH_CHUNKED,
    };
    req.header_mut().set_content_length(framing);
}

async fn write_body<S: tokio::io::AsyncWrite + Unpin>(
    conn: &mut PooledConnection<S>,
    req: &mut Request,
) -> Result<()> {
    match req.body_mut() {
        Body::Inline(body) => {
            conn.stream.write_all(body).await?;
        }
        Body::Reader { reader, declared_size } => {
            let mut buf = [0u8; 8192];
            match declared_size {
                Some(_) => loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    conn.stream.write_all(&buf[..n]).await?;
                },
                None => {
                    loop {
                        let n = reader.read(&mut buf)?;
                        let mut framed = Vec::new();
                        if n == 0 {
                            ChunkedWriter::new(&mut framed).finish(&[])?;
                            conn.stream.write_all(&framed).await?;
                            break;
                        }
                        ChunkedWriter::new(&mut framed).write_chunk(&buf[..n])?;
                        conn.stream.write_all(&framed).await?;
                    }
                }
            }
        }
        Body::Writer(writer) => {
            let mut framed = Vec::new();
            {
                let mut sink = ChunkedSinkBuf(&mut framed);
                writer(&mut sink)?;
            }
            ChunkedWriter::new(&mut framed).finish(&[])?;
            conn.stream.write_all(&framed).await?;
        }
    }
    Ok(())
}

/// Adapts a `Vec<u8>` sink so each `write()` call from a body-writer
/// callback becomes one chunked frame, mirroring `talon_core`'s internal
/// `ChunkedSink` (not exported) for the client's async write path.
struct ChunkedSinkBuf<'a>(&'a mut Vec<u8>);

impl std::io::Write for ChunkedSinkBuf<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        ChunkedWriter::new(self.0).write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Reads interim responses until either a `100 Continue` is seen (returns
/// `true`, body should follow) or a final response arrives first (returns
/// `false`, its bytes remain buffered in `conn.read_buf`).
async fn wait_for_continue<S: tokio::io::AsyncRead + Unpin>(conn: &mut PooledConnection<S>) -> Result<bool> {
    loop {
        if let Some(pos) = memmem::find(&conn.read_buf, b"\r\n\r\n") {
            let block = &conn.read_buf[..pos];
            if block.starts_with(b"HTTP/1.1 100") || block.starts_with(b"HTTP/1.0 100") {
                conn.read_buf.advance(pos + 4);
                return Ok(true);
            }
            return Ok(false);
        }
        let mut tmp = [0u8; 512];
        let n = conn.stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(ClientError::Core(talon_core::Error::UnexpectedEof));
        }
        conn.read_buf.extend_from_slice(&tmp[..n]);
    }
}

/// Reads a full response (header plus body) off `conn`, growing
/// `conn.read_buf` as needed. Identity-framed (sentinel `-2`) bodies are
/// read to EOF before being handed to [`Response::read`], since the codec
/// itself has no notion of "keep reading until the peer closes".
async fn read_response<S: tokio::io::AsyncRead + Unpin>(
    conn: &mut PooledConnection<S>,
    resp: &mut Response,
    max_body: Option<usize>,
) -> Result<()> {
    let max_header = talon_core::header::DEFAULT_MAX_HEADER_SIZE;
    let max_body = max_body.unwrap_or(usize::MAX);

    let header_len = loop {
        match ResponseHeader::parse_with_limit(&conn.read_buf, max_header) {
            Ok(Some((_, len))) => break len,
            Ok(None) => read_more(conn, max_header).await?,
            Err(e) => return Err(e.into()),
        }
    };

    let (peek, _) = ResponseHeader::parse_with_limit(&conn.read_buf, max_header)?.unwrap();
    if peek.content_length() == CONTENT_LENGTH_IDENTITY && !peek.skip_body() {
        loop {
            let body_so_far = conn.read_buf.len().saturating_sub(header_len);
            if body_so_far > max_body {
                return Err(talon_core::Error::BodyTooLarge.into());
            }
            let n = conn.stream.read_buf(&mut conn.read_buf).await?;
            if n == 0 {
                break;
            }
        }
    }

    loop {
        match resp.read(&conn.read_buf, max_body) {
            Ok(Some(consumed)) => {
                conn.read_buf.advance(consumed);
                return Ok(());
            }
            Ok(None) => read_more(conn, max_header.max(max_body)).await?,
            Err(e) => return Err(e.into()),
        }
    }
}

async fn read_more<S: tokio::io::AsyncRead + Unpin>(conn: &mut PooledConnection<S>, cap_hint: usize) -> Result<()> {
    let _ = cap_hint;
    let n = conn.stream.read_buf(&mut conn.read_buf).await?;
    if n == 0 {
        return Err(talon_core::Error::UnexpectedEof.into());
    }
    Ok(())
}
