//! Body framing: fixed-length, `chunked`, and identity-to-EOF reads, plus a
//! streaming chunked writer.
//!
//! Readers operate over an already-buffered `&[u8]` (the bytes read off the
//! wire so far) and return `Ok(None)` when more bytes are needed, mirroring
//! the header parsers in [`crate::header`].

use crate::error::{Error, Result};
use crate::header::RawHeader;
use std::io::Write;

/// An upper bound on a single chunk's declared size, independent of
/// `maxBodySize`, so a corrupt or hostile chunk-size line can't be used to
/// pre-allocate an unbounded buffer before the overall body cap kicks in.
const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Reads a fixed-length (`Content-Length`) body out of `buf`.
///
/// Returns the body slice and bytes consumed, or `None` if `buf` doesn't yet
/// contain `len` bytes.
pub fn read_fixed_body(buf: &[u8], len: u64, max_size: usize) -> Result<Option<(&[u8], usize)>> {
    if len as usize > max_size {
        return Err(Error::BodyTooLarge);
    }
    let len = len as usize;
    if buf.len() < len {
        return Ok(None);
    }
    Ok(Some((&buf[..len], len)))
}

/// Reads a `Transfer-Encoding: chunked` body out of `buf`, decoding chunk
/// framing and collecting any trailer header block.
///
/// Returns the decoded body, trailers, and total bytes consumed from `buf`
/// (through the terminating trailer blank line), or `None` if incomplete.
pub fn read_chunked_body(
    buf: &[u8],
    max_size: usize,
) -> Result<Option<(Vec<u8>, Vec<RawHeader>, usize)>> {
    let mut body = Vec::new();
    let mut pos = 0usize;

    loop {
        let line_end = match memchr::memmem::find(&buf[pos..], b"\r\n") {
            Some(rel) => pos + rel,
            None => return Ok(None),
        };
        let chunk_size = parse_chunk_size(&buf[pos..line_end])?;
        pos = line_end + 2;

        if chunk_size == 0 {
            return read_trailers(buf, pos, body, max_size);
        }

        if body.len() + chunk_size as usize > max_size {
            return Err(Error::BodyTooLarge);
        }

        let data_end = pos + chunk_size as usize;
        if buf.len() < data_end + 2 {
            return Ok(None);
        }
        if &buf[data_end..data_end + 2] != b"\r\n" {
            return Err(Error::InvalidHeader("missing chunk terminator".into()));
        }
        body.extend_from_slice(&buf[pos..data_end]);
        pos = data_end + 2;
    }
}

fn read_trailers(
    buf: &[u8],
    mut pos: usize,
    body: Vec<u8>,
    _max_size: usize,
) -> Result<Option<(Vec<u8>, Vec<RawHeader>, usize)>> {
    let mut trailers = Vec::new();
    loop {
        let line_end = match memchr::memmem::find(&buf[pos..], b"\r\n") {
            Some(rel) => pos + rel,
            None => return Ok(None),
        };
        let line = &buf[pos..line_end];
        if line.is_empty() {
            return Ok(Some((body, trailers, line_end + 2)));
        }
        let colon = memchr::memchr(b':', line)
            .ok_or_else(|| Error::InvalidHeader("malformed trailer".into()))?;
        trailers.push(RawHeader {
            name: line[..colon].to_vec(),
            value: trim_ows(&line[colon + 1..]).to_vec(),
        });
        pos = line_end + 2;
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

/// Parses a chunk-size line (`<hex size>[;ext...]`), ignoring extensions.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let hex_part = match memchr::memchr(b';', line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let hex_part = trim_ows(hex_part);
    if hex_part.is_empty() {
        return Err(Error::InvalidHeader("empty chunk size".into()));
    }
    let mut value: u64 = 0;
    for &b in hex_part {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return Err(Error::InvalidHeader("invalid chunk size digit".into())),
        };
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| Error::InvalidHeader("chunk size overflow".into()))?;
    }
    if value > MAX_CHUNK_SIZE {
        return Err(Error::InvalidHeader("chunk size exceeds limit".into()));
    }
    Ok(value)
}

/// Writes `data` as a single `chunked` frame (chunk-size line, data, CRLF,
/// then the zero-length terminating chunk). Used for one-shot buffered
/// bodies; [`ChunkedWriter`] covers incremental streaming.
pub fn write_chunked_body<W: Write>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    if !data.is_empty() {
        write!(out, "{:x}\r\n", data.len())?;
        out.write_all(data)?;
        out.write_all(b"\r\n")?;
    }
    out.write_all(b"0\r\n\r\n")
}

/// Incrementally encodes a body as `chunked`, one `write()` call per chunk.
pub struct ChunkedWriter<'w, W: Write> {
    out: &'w mut W,
}

impl<'w, W: Write> ChunkedWriter<'w, W> {
    pub fn new(out: &'w mut W) -> Self {
        Self { out }
    }

    /// Writes one chunk. A zero-length call is a no-op (chunked framing has
    /// no representation for an empty intermediate chunk).
    pub fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        write!(self.out, "{:x}\r\n", data.len())?;
        self.out.write_all(data)?;
        self.out.write_all(b"\r\n")
    }

    /// Writes the terminating zero-length chunk and optional trailers.
    pub fn finish(self, trailers: &[RawHeader]) -> std::io::Result<()> {
        self.out.write_all(b"0\r\n")?;
        for t in trailers {
            self.out.write_all(&t.name)?;
            self.out.write_all(b": ")?;
            self.out.write_all(&t.value)?;
            self.out.write_all(b"\r\n")?;
        }
        self.out.write_all(b"\r\n")
    }
}
