use super::Body;
use crate::body::{read_chunked_body, read_fixed_body};
use crate::error::{Error, Result};
use crate::header::{RawHeader, ResponseHeader, CONTENT_LENGTH_CHUNKED, CONTENT_LENGTH_IDENTITY};
use std::io::Write;

/// An HTTP/1.1 response: header plus body, with the `SkipBody` flag a
/// server derives from the originating request's method (`HEAD`).
#[derive(Default)]
pub struct Response {
    header: ResponseHeader,
    body: Body,
    skip_body: bool,
    trailer: Option<Vec<RawHeader>>,
    capture_trailer: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.header.reset();
        self.body = Body::Inline(Vec::new());
        self.skip_body = false;
        self.trailer = None;
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        &mut self.header
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

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

    /// Whether this response omits a body on the wire: either the header's
    /// own 1xx/204/304 rule, or an explicit override set via
    /// [`Response::set_skip_body`] (the server sets this for `HEAD`
    /// requests).
    pub fn skip_body(&self) -> bool {
        self.skip_body || self.header.skip_body()
    }

    pub fn set_skip_body(&mut self, skip: bool) {
        self.skip_body = skip;
    }

    pub fn set_trailer_capture(&mut self, capture: bool) {
        self.capture_trailer = capture;
    }

    pub fn trailer(&self) -> Option<&[RawHeader]> {
        self.trailer.as_deref()
    }

    pub fn read(&mut self, buf: &[u8], max_body_size: usize) -> Result<Option<usize>> {
        let (mut header, header_len) = match ResponseHeader::parse(buf)? {
            Some(v) => v,
            None => return Ok(None),
        };
        let rest = &buf[header_len..];

        if header.skip_body() {
            self.header = header;
            self.body = Body::Inline(Vec::new());
            self.trailer = None;
            return Ok(Some(header_len));
        }

        let was_chunked = header.content_length() == CONTENT_LENGTH_CHUNKED;
        let (body, trailers, body_len) = match header.content_length() {
            CONTENT_LENGTH_CHUNKED => match read_chunked_body(rest, max_body_size)? {
                Some(v) => v,
                None => return Ok(None),
            },
            CONTENT_LENGTH_IDENTITY => {
                // Read-until-close is driven by the caller (it alone knows
                // when the underlying stream has reached EOF); here we only
                // accept whatever has already been buffered.
                if rest.len() > max_body_size {
                    return Err(Error::BodyTooLarge);
                }
                (rest.to_vec(), Vec::new(), rest.len())
            }
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
        self.trailer = if self.capture_trailer && !trailers.is_empty() {
            Some(trailers)
        } else {
            None
        };

        Ok(Some(header_len + body_len))
    }

    pub fn write_to<W: Write>(&mut self, out: &mut W) -> std::io::Result<()> {
        let skip_body = self.skip_body();

        match &mut self.body {
            Body::Inline(body) => {
                if !skip_body {
                    self.header.set_content_length(body.len() as i64);
                }
                self.header.write_to(out, skip_body)?;
                if !skip_body {
                    out.write_all(body)?;
                }
                Ok(())
            }
            Body::Reader { reader, declared_size } => {
                if skip_body {
                    self.header.write_to(out, true)?;
                    return Ok(());
                }
                match declared_size {
                    Some(n) => {
                        self.header.set_content_length(*n as i64);
                        self.header.write_to(out, false)?;
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
                        self.header.write_to(out, false)?;
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
                }
            }
            Body::Writer(writer) => {
                if skip_body {
                    self.header.write_to(out, true)?;
                    return Ok(());
                }
                self.header.set_content_length(CONTENT_LENGTH_CHUNKED);
                self.header.write_to(out, false)?;
                let mut sink = super::ChunkedSink::new(out);
                writer(&mut sink)?;
                sink.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fixed_body_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        let mut resp = Response::new();
        let consumed = resp.read(raw, 4096).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(resp.body().as_inline(), Some(&b"hi"[..]));
    }

    #[test]
    fn not_modified_reports_length_skips_body_leaves_remainder() {
        // Status 304, content-length 1235, body empty, remaining buffer
        // beginning with `foobar`.
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Type: x\r\nContent-Length: 1235\r\n\r\nfoobar";
        let mut resp = Response::new();
        let consumed = resp.read(raw, 4096).unwrap().unwrap();
        assert_eq!(resp.header().status_code(), 304);
        assert_eq!(resp.header().content_length(), 1235);
        assert!(resp.skip_body());
        assert!(resp.body().as_inline().unwrap().is_empty());
        assert_eq!(&raw[consumed..], b"foobar");
    }

    #[test]
    fn reads_chunked_body_and_reports_decoded_length() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let mut resp = Response::new();
        let consumed = resp.read(raw, 4096).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(resp.body().as_inline(), Some(&b"abc"[..]));
        assert_eq!(resp.header().content_length(), 3);
    }

    #[test]
    fn head_override_skips_body_on_write() {
        let mut resp = Response::new();
        resp.swap_body(b"ignored".to_vec());
        resp.set_skip_body(true);
        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("ignored"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn write_known_size_sets_content_length() {
        let mut resp = Response::new();
        resp.swap_body(b"hello".to_vec());
        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 5"));
        assert!(text.ends_with("hello"));
    }
}
