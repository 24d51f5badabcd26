//! Per-connection serving routine (`WorkerFunc`): read a request, dispatch
//! it to the handler, apply the shadow-response substitution, serialize
//! the result, and decide whether to keep the connection alive.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use talon_config::ServerConfig;
use talon_core::header::{RequestHeader, DEFAULT_MAX_HEADER_SIZE};
use talon_core::{Body, HttpDate, Request, Response};

use crate::error::{Result, ServerError};
use crate::handler::{HijackedIo, Outcome, RequestHandler, ServerContext};

const DEFAULT_SERVER_NAME: &str = concat!("talon/", env!("CARGO_PKG_VERSION"));

enum ConnectionEnd {
    Closed,
    Hijacked(Box<dyn FnOnce(Box<dyn HijackedIo>) + Send>),
}

/// Serves every pipelined request on one accepted connection until the
/// peer closes it, `Connection: close` is negotiated, or the handler
/// hijacks the stream. Never panics: failures are logged and the
/// connection is dropped.
pub async fn worker_func<H: RequestHandler>(
    mut stream: TcpStream,
    handler: Arc<H>,
    config: Arc<ServerConfig>,
    clock: Arc<HttpDate>,
) {
    match serve_connection(&mut stream, &handler, &config, &clock).await {
        Ok(ConnectionEnd::Closed) => {}
        Ok(ConnectionEnd::Hijacked(callback)) => {
            callback(Box::new(stream));
        }
        Err(e) => {
            tracing::debug!(error = %e, "connection ended with error");
        }
    }
}

async fn serve_connection<H: RequestHandler>(
    stream: &mut TcpStream,
    handler: &Arc<H>,
    config: &ServerConfig,
    clock: &HttpDate,
) -> Result<ConnectionEnd> {
    let mut read_buf = BytesMut::with_capacity(config.read_buffer_size);

    loop {
        let mut req = Request::new();
        let consumed = match read_request(stream, &mut read_buf, &mut req, config).await {
            Ok(Some(n)) => n,
            Ok(None) => return Ok(ConnectionEnd::Closed),
            Err(e) => {
                let _ = send_error_response(stream, &e, config, clock).await;
                return Ok(ConnectionEnd::Closed);
            }
        };
        let _ = read_buf.split_to(consumed);

        let is_head = req.header().method() == b"HEAD";
        let request_wants_close = req.header().connection_close();

        let ctx = ServerContext::new();
        let mut resp = Response::new();
        let outcome = match handler.call(&ctx, &mut req, &mut resp).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut err_resp = Response::new();
                build_error_body(&mut err_resp, &e);
                apply_default_headers(&mut err_resp, config, clock);
                write_response(stream, &mut err_resp).await?;
                return Ok(ConnectionEnd::Closed);
            }
        };

        apply_default_headers(&mut resp, config, clock);
        resp.set_skip_body(is_head);

        let response_wants_close = match ctx.take_shadow() {
            Some(shadow) => {
                write_shadow_response(stream, &shadow).await?;
                shadow.header().connection_close()
            }
            None => {
                let close = resp.header().connection_close();
                write_response(stream, &mut resp).await?;
                close
            }
        };

        if let Outcome::Hijack(callback) = outcome {
            return Ok(ConnectionEnd::Hijacked(callback));
        }

        if request_wants_close || response_wants_close {
            return Ok(ConnectionEnd::Closed);
        }
    }
}

async fn read_request(
    stream: &mut TcpStream,
    read_buf: &mut BytesMut,
    req: &mut Request,
    config: &ServerConfig,
) -> Result<Option<usize>> {
    let mut sent_continue = false;
    loop {
        if read_buf.is_empty() {
            if fill_buffer(stream, read_buf, config.read_timeout()).await? == 0 {
                return Ok(None);
            }
        }

        match req.read(&read_buf[..], config.max_request_body_size) {
            Ok(Some(consumed)) => return Ok(Some(consumed)),
            Ok(None) => {
                if !sent_continue {
                    if let Ok(Some((header, _))) =
                        RequestHeader::parse_with_limit(&read_buf[..], DEFAULT_MAX_HEADER_SIZE)
                    {
                        if header.may_continue() {
                            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
                            stream.flush().await?;
                            sent_continue = true;
                        }
                    }
                }
                if fill_buffer(stream, read_buf, config.read_timeout()).await? == 0 {
                    return Err(ServerError::Core(talon_core::Error::UnexpectedEof));
                }
            }
            Err(e) => return Err(ServerError::Core(e)),
        }
    }
}

async fn fill_buffer(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    timeout: Option<std::time::Duration>,
) -> Result<usize> {
    let mut chunk = [0u8; 8192];
    let n = match timeout {
        Some(d) => match tokio::time::timeout(d, stream.read(&mut chunk)).await {
            Ok(result) => result?,
            Err(_) => return Err(ServerError::Timeout),
        },
        None => stream.read(&mut chunk).await?,
    };
    if n > 0 {
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(n)
}

async fn write_response(stream: &mut TcpStream, resp: &mut Response) -> Result<()> {
    let mut out = Vec::new();
    resp.write_to(&mut out).map_err(ServerError::Io)?;
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

/// Shadow responses are always constructed in full (headers and body)
/// before being installed, so serializing them never needs `&mut self`.
async fn write_shadow_response(stream: &mut TcpStream, resp: &Response) -> Result<()> {
    let mut out = Vec::new();
    resp.header().write_to(&mut out, resp.skip_body()).map_err(ServerError::Io)?;
    if !resp.skip_body() {
        if let Body::Inline(body) = resp.body() {
            out.extend_from_slice(body);
        }
    }
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}

fn apply_default_headers(resp: &mut Response, config: &ServerConfig, clock: &HttpDate) {
    if !config.no_default_server_header && resp.header().server().is_empty() {
        let name = config.name.as_deref().unwrap_or(DEFAULT_SERVER_NAME);
        resp.header_mut().set_server(name.as_bytes());
    }
    if !config.no_default_date && resp.header().date().is_empty() {
        resp.header_mut().set_date(clock.header_value().as_bytes());
    }
}

fn build_error_body(resp: &mut Response, err: &ServerError) {
    resp.header_mut().set_status_code(err.status_code());
    resp.header_mut().set_connection_close(true);
    resp.header_mut().set_content_type(b"text/plain; charset=utf-8");
    resp.swap_body(err.to_string().into_bytes());
}

async fn send_error_response(
    stream: &mut TcpStream,
    err: &ServerError,
    config: &ServerConfig,
    clock: &HttpDate,
) -> Result<()> {
    let mut resp = Response::new();
    build_error_body(&mut resp, err);
    apply_default_headers(&mut resp, config, clock);
    write_response(stream, &mut resp).await
}

