use super::Body;
use crate::args::ArgMap;
use crate::body::{read_chunked_body, read_fixed_body};
use crate::error::{Error, Result};
use crate::header::{RawHeader, RequestHeader, CONTENT_LENGTH_CHUNKED, CONTENT_LENGTH_IDENTITY};
use crate::multipart::{MultipartDecoder, MultipartForm};
use crate::uri::Uri;
use std::io::Write;

/// An HTTP/1.1 request: header plus body, with lazily-derived fields.
#[derive(Default)]
pub struct Request {
    header: RequestHeader,
    body: Body,
    uri: Option<Uri>,
    post_args: Option<ArgMap>,
    multipart: Option<MultipartForm>,
    trailer: Option<Vec<RawHeader>>,
    capture_trailer: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the message back to its zero value, releasing any parsed
    /// multipart form and trailer data. No byte slice previously exposed
    /// from this message may be read after this call.
    pub fn reset(&mut self) {
        self.header.reset();
        self.body = Body::Inline(Vec::new());
        self.uri = None;
        self.post_args = None;
        self.multipart = None;
        self.trailer = None;
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RequestHeader {
        &mut self.header
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Exchanges the inline body for `new_body` in O(1), returning the
    /// previous body bytes (or an empty vec if the body wasn't inline).
    pub fn swap_body(&mut self, new_body: Vec<u8>) -> Vec<u8> {
        match self.body.swap(Body::Inline(new_body)) {
            Body::Inline(old) => old,
            _ => Vec::new(),
        }
    }

    pub fn set_body_stream(&mut self, reader: Box<dyn std::io::Read + Send>, declared_size: Option<u64>) {
        self.body = Body::Reader { reader, declared_size };
    }

    pub fn set_body_stream_writer(
        &mut self,
        writer: Box<dyn FnMut(&mut dyn std::io::Write) -> std::io::Result<()> + Send>,
    ) {
        self.body = Body::Writer(writer);
    }

    pub fn may_continue(&self) -> bool {
        self.header.may_continue()
    }

    pub fn set_trailer_capture(&mut self, capture: bool) {
        self.capture_trailer = capture;
    }

    pub fn trailer(&self) -> Option<&[RawHeader]> {
        self.trailer.as_deref()
    }

    /// Parses a header block and its body out of `buf`. Returns the number
    /// of bytes consumed, or `None` if `buf` doesn't yet hold a complete
    /// message.
    pub fn read(&mut self, buf: &[u8], max_body_size: usize) -> Result<Option<usize>> {
        let (mut header, header_len) = match RequestHeader::parse(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let rest = &buf[header_len..];

        let was_chunked = header.content_length() == CONTENT_LENGTH_CHUNKED;
        let (body, trailers, body_len) = match header.content_length() {
            CONTENT_LENGTH_CHUNKED => match read_chunked_body(rest, max_body_size)? {
                Some((body, trailers, consumed)) => (body, trailers, consumed),
                None => return Ok(None),
            },
            CONTENT_LENGTH_IDENTITY => (Vec::new(), Vec::new(), 0),
            n if n >= 0 => match read_fixed_body(rest, n as u64, max_body_size)? {
                Some((body, consumed)) => (body.to_vec(), Vec::new(), consumed),
                None => return Ok(None),
            },
            _ => return Err(Error::InvalidHeader("invalid content-length sentinel".into())),
        };

        if was_chunked {
            header.set_content_length(body.len() as i64);
        }

        self.header = header;
        self.body = Body::Inline(body);
        self.uri = None;
        self.post_args = None;
        self.multipart = None;
        self.trailer = if self.capture_trailer && !trailers.is_empty() {
            Some(trailers)
        } else {
            None
        };

        Ok(Some(header_len + body_len))
    }

    /// Serializes the header and body into `out`. Streamed (`Reader`)
    /// bodies of unknown size and `Writer` callbacks are framed as
    /// `chunked`; known sizes use `Content-Length`.
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        if self.header.host().is_empty() {
            if let Some(uri) = &self.uri {
                let host = uri.host().as_bytes().to_vec();
                self.header.set_host(&host);
            }
        }
        if self.header.host().is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                Error::HostRequired,
            ));
        }

        match &mut self.body {
            Body::Inline(body) => {
                self.header.set_content_length(body.len() as i64);
                self.header.write_to(out)?;
                out.write_all(body)
            }
            Body::Reader { reader, declared_size } => match declared_size {
                Some(n) => {
                    self.header.set_content_length(*n as i64);
                    self.header.write_to(out)?;
                    let copied = std::io::copy(reader, out)?;
                    if copied != *n {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "stream body length mismatch",
                        ));
                    }
                    Ok(())
                }
                None => {
                    self.header.set_content_length(CONTENT_LENGTH_CHUNKED);
                    self.header.write_to(out)?;
                    let mut writer = crate::body::ChunkedWriter::new(out);
                    let mut buf = [0u8; 8192];
                    loop {
                        let n = reader.read(&mut buf)?;
                        if n == 0 {
                            break;
                        }
                        writer.write_chunk(&buf[..n])?;
                    }
                    writer.finish(&[])
                }
            },
            Body::Writer(writer) => {
                self.header.set_content_length(CONTENT_LENGTH_CHUNKED);
                self.header.write_to(out)?;
                let mut sink = super::ChunkedSink::new(out);
                writer(&mut sink)?;
                sink.finish()
            }
        }
    }

    /// Lazily parses the request URI against the header's request-target
    /// and host. `is_tls` selects the default scheme.
    pub fn uri(&mut self, is_tls: bool) -> Result<&Uri> {
        if self.uri.is_none() {
            let parsed = Uri::parse(self.header.host(), self.header.request_uri(), is_tls)?;
            self.uri = Some(parsed);
        }
        Ok(self.uri.as_ref().unwrap())
    }

    /// Lazily parses `application/x-www-form-urlencoded` bodies into an
    /// [`ArgMap`]. Returns an empty map for any other content type.
    pub fn post_args(&mut self) -> &ArgMap {
        if self.post_args.is_none() {
            let parsed = if self.header.content_type() == b"application/x-www-form-urlencoded" {
                match &self.body {
                    Body::Inline(b) => ArgMap::parse(b),
                    _ => ArgMap::new(),
                }
            } else {
                ArgMap::new()
            };
            self.post_args = Some(parsed);
        }
        self.post_args.as_ref().unwrap()
    }

    /// Lazily decodes a `multipart/form-data` body using the supplied
    /// black-box decoder.
    pub fn multipart_form(&mut self, decoder: &dyn MultipartDecoder) -> Result<&MultipartForm> {
        if self.multipart.is_none() {
            let content_type = self.header.content_type().to_vec();
            let boundary = extract_boundary(&content_type).ok_or(Error::NoMultipartForm)?;
            let body = match &self.body {
                Body::Inline(b) => b.clone(),
                _ => return Err(Error::NoMultipartForm),
            };
            self.multipart = Some(decoder.decode(&boundary, &body)?);
        }
        Ok(self.multipart.as_ref().unwrap())
    }
}

fn extract_boundary(content_type: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(content_type).ok()?;
    if !s.starts_with("multipart/form-data") {
        return None;
    }
    s.split(';')
        .map(|part| part.trim())
        .find_map(|part| part.strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fixed_body_request() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let mut req = Request::new();
        let consumed = req.read(raw, 4096).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(req.body().as_inline(), Some(&b"hello"[..]));
    }

    #[test]
    fn incomplete_body_returns_none() {
        let raw = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhel";
        let mut req = Request::new();
        assert!(req.read(raw, 4096).unwrap().is_none());
    }

    #[test]
    fn write_derives_host_from_uri() {
        let mut req = Request::new();
        req.header_mut().set_request_uri(b"http://example.com/path");
        let _ = req.uri(false).unwrap();
        let mut out = Vec::new();
        req.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Host: example.com"));
    }

    #[test]
    fn write_without_host_fails() {
        let mut req = Request::new();
        let mut out = Vec::new();
        assert!(req.write_to(&mut out).is_err());
    }

    #[test]
    fn post_args_parses_form_body() {
        let raw =
            b"POST /f HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\na=1&b=2";
        let mut req = Request::new();
        req.read(raw, 4096).unwrap();
        assert_eq!(req.post_args().peek(b"a"), Some(&b"1"[..]));
        assert_eq!(req.post_args().peek(b"b"), Some(&b"2"[..]));
    }

    #[test]
    fn chunked_request_round_trip() {
        // A chunked POST decodes to the concatenated chunk payloads, with
        // content-length set to the decoded size.
        let raw = b"POST /foo HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\nContent-Type: t\r\n\r\n3\r\nabc\r\n5\r\n12345\r\n0\r\n\r\n";
        let mut req = Request::new();
        let consumed = req.read(raw, 4096).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(req.body().as_inline(), Some(&b"abc12345"[..]));
        assert_eq!(req.body().as_inline().unwrap().len(), 8);
        assert_eq!(req.header().content_length(), 8);
    }

    #[test]
    fn swap_body_exchanges_in_place() {
        let mut req = Request::new();
        req.body_mut().swap(Body::Inline(b"abc".to_vec()));
        let old = req.swap_body(b"xyz".to_vec());
        assert_eq!(old, b"abc");
        assert_eq!(req.body().as_inline(), Some(&b"xyz"[..]));
    }
}
