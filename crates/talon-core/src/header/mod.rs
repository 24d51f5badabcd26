//! HTTP/1.1 header block parsing and serialization.
//!
//! The parser operates over an already-buffered byte slice containing a
//! complete header block (start line through the blank line); the caller
//! (client/server connection loop) is responsible for reading bytes off
//! the wire until the terminating CRLFCRLF is found.

mod cookie;
mod request;
mod response;

pub use cookie::{Cookie, SameSite};
pub use request::RequestHeader;
pub use response::ResponseHeader;

use crate::error::{Error, Result};

/// Sentinel for `Transfer-Encoding: chunked` bodies.
pub const CONTENT_LENGTH_CHUNKED: i64 = -1;
/// Sentinel for identity bodies of unknown length (read until EOF).
pub const CONTENT_LENGTH_IDENTITY: i64 = -2;

/// Default header-block buffer budget (8 KiB); exceeding it raises
/// [`crate::error::Error::HeaderTooLarge`].
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// A single generic (name, value) header not promoted to a typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// Splits `buf` into header lines (handling obs-fold) up to and including
/// the terminating blank line. Returns the lines and the number of bytes
/// consumed from `buf` (i.e. the offset where the body begins), or `None`
/// if the header block is not yet complete (more bytes are needed).
fn split_lines(buf: &[u8], max_size: usize) -> Result<Option<(Vec<(Vec<u8>, Vec<u8>)>, usize)>> {
    if buf.len() > max_size && memchr::memmem::find(buf, b"\r\n\r\n").is_none() {
        return Err(Error::HeaderTooLarge);
    }

    let mut lines: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut pos = 0usize;

    loop {
        let line_end = match memchr::memmem::find(&buf[pos..], b"\r\n") {
            Some(rel) => pos + rel,
            None => return Ok(None),
        };
        let line = &buf[pos..line_end];
        let next_pos = line_end + 2;

        if line.is_empty() {
            return Ok(Some((lines, next_pos)));
        }

        if line[0] == b' ' || line[0] == b'\t' {
            // obs-fold: append to previous value separated by a single space.
            let folded = trim_ows(line);
            match lines.last_mut() {
                Some((_, value)) => {
                    value.push(b' ');
                    value.extend_from_slice(folded);
                }
                None => return Err(Error::InvalidHeader("fold on first line".into())),
            }
        } else {
            let colon = memchr::memchr(b':', line)
                .ok_or_else(|| Error::InvalidHeader("missing ':'".into()))?;
            let name = &line[..colon];
            validate_token(name)?;
            let value = trim_ows(&line[colon + 1..]);
            validate_field_value(value)?;
            lines.push((name.to_vec(), value.to_vec()));
        }

        pos = next_pos;
        if pos > buf.len() {
            return Ok(None);
        }
    }
}

fn trim_ows(input: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = input.len();
    while start < end && (input[start] == b' ' || input[start] == b'\t') {
        start += 1;
    }
    while end > start && (input[end - 1] == b' ' || input[end - 1] == b'\t') {
        end -= 1;
    }
    &input[start..end]
}

fn validate_token(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidHeader("empty header name".into()));
    }
    for &b in name {
        if !is_tchar(b) {
            return Err(Error::InvalidHeader("invalid header name byte".into()));
        }
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn validate_field_value(value: &[u8]) -> Result<()> {
    for &b in value {
        if b == b'\r' || b == b'\n' || b == 0 {
            return Err(Error::InvalidHeader("invalid byte in header value".into()));
        }
    }
    Ok(())
}

/// Canonicalizes a header name to the wire's customary casing: the first
/// letter and every letter following a `-` are uppercased, everything else
/// lowercased. Comparisons remain case-insensitive regardless of whether
/// this is applied.
pub fn canonicalize_name(name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len());
    let mut start_of_word = true;
    for &b in name {
        if start_of_word {
            out.push(b.to_ascii_uppercase());
        } else {
            out.push(b.to_ascii_lowercase());
        }
        start_of_word = b == b'-';
    }
    out
}

pub(crate) fn eq_ignore_case(a: &[u8], b: &str) -> bool {
    a.eq_ignore_ascii_case(b.as_bytes())
}

/// Parses `Content-Length` as a non-negative integer.
pub(crate) fn parse_content_length(value: &[u8]) -> Result<i64> {
    let s = std::str::from_utf8(value)
        .map_err(|_| Error::InvalidHeader("content-length not utf8".into()))?;
    let n: i64 = s
        .trim()
        .parse()
        .map_err(|_| Error::InvalidHeader("invalid content-length".into()))?;
    if n < 0 {
        return Err(Error::InvalidHeader("negative content-length".into()));
    }
    Ok(n)
}

/// Whether a `Transfer-Encoding` value's last token is `chunked`. Unknown
/// tokens other than `chunked`/`identity` are treated as identity rather
/// than rejected outright.
pub(crate) fn is_chunked_transfer_encoding(value: &[u8]) -> bool {
    value
        .rsplit(|&b| b == b',')
        .next()
        .map(trim_ows)
        .map(|tok| eq_ignore_case(tok, "chunked"))
        .unwrap_or(false)
}

pub(crate) fn is_connection_close(value: &[u8]) -> bool {
    value.split(|&b| b == b',').any(|tok| eq_ignore_case(trim_ows(tok), "close"))
}

pub(crate) fn is_expect_100_continue(value: &[u8]) -> bool {
    eq_ignore_case(trim_ows(value), "100-continue")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"HTTP/1.1" => Ok(HttpVersion::Http11),
            b"HTTP/1.0" => Ok(HttpVersion::Http10),
            _ => Err(Error::InvalidHeader("unsupported HTTP version".into())),
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            HttpVersion::Http11 => b"HTTP/1.1",
            HttpVersion::Http10 => b"HTTP/1.0",
        }
    }

    /// Default `Connection` behavior: close on HTTP/1.0, keep-alive on 1.1.
    pub fn default_close(self) -> bool {
        matches!(self, HttpVersion::Http10)
    }
}
