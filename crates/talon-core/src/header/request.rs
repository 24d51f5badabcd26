use super::{
    canonicalize_name, eq_ignore_case, is_chunked_transfer_encoding, is_connection_close,
    is_expect_100_continue, parse_content_length, split_lines, Cookie, HttpVersion, RawHeader,
    CONTENT_LENGTH_CHUNKED, DEFAULT_MAX_HEADER_SIZE,
};
use crate::error::{Error, Result};
use std::io::Write;

/// A parsed (or in-progress) HTTP/1.1 request header.
///
/// Well-known headers (Host, Content-Type, Content-Length, Connection,
/// Transfer-Encoding, User-Agent) are promoted to dedicated fields;
/// setting them through [`RequestHeader::set_header`] mutates the field
/// instead of appending to the generic list.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    method: Vec<u8>,
    request_uri: Vec<u8>,
    version: HttpVersion,
    host: Vec<u8>,
    content_type: Vec<u8>,
    content_length: i64,
    user_agent: Vec<u8>,
    connection_close: bool,
    may_continue: bool,
    other: Vec<RawHeader>,
    cookies: Option<Vec<Cookie>>,
    normalize_names: bool,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self {
            method: b"GET".to_vec(),
            request_uri: b"/".to_vec(),
            version: HttpVersion::Http11,
            host: Vec::new(),
            content_type: Vec::new(),
            content_length: 0,
            user_agent: Vec::new(),
            connection_close: false,
            may_continue: false,
            other: Vec::new(),
            cookies: None,
            normalize_names: true,
        }
    }
}

impl RequestHeader {
    /// Resets every field to its zero value, as if freshly acquired from
    /// a pool.
    pub fn reset(&mut self) {
        *self = RequestHeader {
            normalize_names: self.normalize_names,
            ..Default::default()
        };
    }

    /// Disables canonical-casing of header names on serialization
    /// (comparisons stay case-insensitive regardless).
    pub fn set_normalize_names(&mut self, normalize: bool) {
        self.normalize_names = normalize;
    }

    /// Parses a complete header block from `buf`. Returns `Ok(None)` if
    /// the block is not yet fully buffered (caller should read more).
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        Self::parse_with_limit(buf, DEFAULT_MAX_HEADER_SIZE)
    }

    /// As [`Self::parse`], with an explicit header-block size budget.
    pub fn parse_with_limit(buf: &[u8], max_size: usize) -> Result<Option<(Self, usize)>> {
        if buf.is_empty() {
            return Err(Error::Eof);
        }
        let line_end = match memchr::memmem::find(buf, b"\r\n") {
            Some(pos) => pos,
            None => {
                if buf.len() > max_size {
                    return Err(Error::HeaderTooLarge);
                }
                return Ok(None);
            }
        };
        let start_line = &buf[..line_end];
        let (method, rest) = split_at_space(start_line)
            .ok_or_else(|| Error::InvalidHeader("malformed request line".into()))?;
        let (uri, version_bytes) = split_at_space(rest)
            .ok_or_else(|| Error::InvalidHeader("malformed request line".into()))?;
        let version = HttpVersion::parse(version_bytes)?;

        let (lines, consumed_after_start) = match split_lines(&buf[line_end + 2..], max_size)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut header = RequestHeader {
            method: method.to_vec(),
            request_uri: uri.to_vec(),
            version,
            connection_close: version.default_close(),
            ..Default::default()
        };

        let mut has_content_length = false;
        let mut is_chunked = false;

        for (name, value) in lines {
            if eq_ignore_case(&name, "host") {
                header.host = value;
            } else if eq_ignore_case(&name, "content-type") {
                header.content_type = value;
            } else if eq_ignore_case(&name, "content-length") {
                if has_content_length {
                    return Err(Error::InvalidHeader("duplicate content-length".into()));
                }
                has_content_length = true;
                if !is_chunked {
                    header.content_length = parse_content_length(&value)?;
                }
            } else if eq_ignore_case(&name, "transfer-encoding") {
                if is_chunked_transfer_encoding(&value) {
                    is_chunked = true;
                    header.content_length = CONTENT_LENGTH_CHUNKED;
                }
            } else if eq_ignore_case(&name, "connection") {
                if is_connection_close(&value) {
                    header.connection_close = true;
                } else if eq_ignore_case(&value, "keep-alive") {
                    header.connection_close = false;
                }
            } else if eq_ignore_case(&name, "user-agent") {
                header.user_agent = value;
            } else if eq_ignore_case(&name, "expect") {
                if is_expect_100_continue(&value) {
                    header.may_continue = true;
                }
            } else if eq_ignore_case(&name, "cookie") {
                let mut parsed = Cookie::parse_request_line(&value);
                header
                    .cookies
                    .get_or_insert_with(Vec::new)
                    .append(&mut parsed);
            } else {
                header.other.push(RawHeader { name, value });
            }
        }

        // Both headers present is a smuggling-adjacent conflict regardless
        // of which one the wire listed first; chunked framing wins (it's
        // what gets read), but the connection can't be trusted for reuse.
        if is_chunked && has_content_length {
            header.connection_close = true;
        }

        if header.host.is_empty() {
            if let Some(pos) = memchr::memmem::find(&header.request_uri, b"://") {
                let after = &header.request_uri[pos + 3..];
                let host_end = memchr::memchr(b'/', after).unwrap_or(after.len());
                header.host = after[..host_end].to_vec();
            }
        }

        Ok(Some((header, line_end + 2 + consumed_after_start)))
    }

    /// Serializes the start line and header block, ending with a blank
    /// line, to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.method)?;
        out.write_all(b" ")?;
        out.write_all(&self.request_uri)?;
        out.write_all(b" ")?;
        out.write_all(self.version.as_bytes())?;
        out.write_all(b"\r\n")?;

        if !self.host.is_empty() {
            self.write_field(out, b"Host", &self.host)?;
        }
        if !self.user_agent.is_empty() {
            self.write_field(out, b"User-Agent", &self.user_agent)?;
        }
        if !self.content_type.is_empty() {
            self.write_field(out, b"Content-Type", &self.content_type)?;
        }
        match self.content_length {
            CONTENT_LENGTH_CHUNKED => {
                self.write_field(out, b"Transfer-Encoding", b"chunked")?;
            }
            n if n >= 0 => {
                self.write_field(out, b"Content-Length", n.to_string().as_bytes())?;
            }
            _ => {}
        }
        if self.connection_close {
            self.write_field(out, b"Connection", b"close")?;
        }
        if let Some(cookies) = &self.cookies {
            if !cookies.is_empty() {
                let mut value = Vec::new();
                for (i, c) in cookies.iter().enumerate() {
                    if i > 0 {
                        value.extend_from_slice(b"; ");
                    }
                    value.extend_from_slice(&c.name);
                    value.push(b'=');
                    value.extend_from_slice(&c.value);
                }
                self.write_field(out, b"Cookie", &value)?;
            }
        }
        for h in &self.other {
            self.write_field(out, &h.name, &h.value)?;
        }
        out.write_all(b"\r\n")
    }

    fn write_field<W: Write>(&self, out: &mut W, name: &[u8], value: &[u8]) -> std::io::Result<()> {
        if self.normalize_names {
            out.write_all(&canonicalize_name(name))?;
        } else {
            out.write_all(name)?;
        }
        out.write_all(b": ")?;
        out.write_all(value)?;
        out.write_all(b"\r\n")
    }

    pub fn method(&self) -> &[u8] {
        &self.method
    }

    pub fn set_method(&mut self, method: &[u8]) {
        self.method = method.to_vec();
    }

    /// Typed view of the method for callers that want `http::Method`'s
    /// constants instead of matching on raw bytes. `None` for methods
    /// `http` doesn't recognize as a valid token.
    pub fn method_enum(&self) -> Option<http::Method> {
        http::Method::from_bytes(&self.method).ok()
    }

    pub fn request_uri(&self) -> &[u8] {
        &self.request_uri
    }

    pub fn set_request_uri(&mut self, uri: &[u8]) {
        self.request_uri = uri.to_vec();
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn host(&self) -> &[u8] {
        &self.host
    }

    pub fn set_host(&mut self, host: &[u8]) {
        self.host = host.to_vec();
    }

    pub fn content_type(&self) -> &[u8] {
        &self.content_type
    }

    pub fn set_content_type(&mut self, ct: &[u8]) {
        self.content_type = ct.to_vec();
    }

    /// Content-length sentinel: `>= 0` fixed, [`CONTENT_LENGTH_CHUNKED`]
    /// for chunked.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, n: i64) {
        self.content_length = n;
    }

    pub fn user_agent(&self) -> &[u8] {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, ua: &[u8]) {
        self.user_agent = ua.to_vec();
    }

    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn set_connection_close(&mut self, close: bool) {
        self.connection_close = close;
    }

    pub fn may_continue(&self) -> bool {
        self.may_continue
    }

    /// Headers not promoted to a typed field, in arrival order.
    pub fn other_headers(&self) -> &[RawHeader] {
        &self.other
    }

    pub fn add_header(&mut self, name: &[u8], value: &[u8]) {
        self.other.push(RawHeader {
            name: name.to_vec(),
            value: value.to_vec(),
        });
    }

    /// Request cookies, parsed lazily from the `Cookie:` header on first
    /// access.
    pub fn cookies(&self) -> &[Cookie] {
        self.cookies.as_deref().unwrap_or(&[])
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        self.cookies.get_or_insert_with(Vec::new).push(cookie);
    }

    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method.as_slice(),
            b"GET" | b"HEAD" | b"PUT" | b"DELETE" | b"OPTIONS"
        )
    }
}

fn split_at_space(input: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = memchr::memchr(b' ', input)?;
    Some((&input[..pos], &input[pos + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_get() {
        let raw = b"GET /foo HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (header, consumed) = RequestHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.method(), b"GET");
        assert_eq!(header.request_uri(), b"/foo");
        assert_eq!(header.host(), b"example.com");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn returns_none_when_incomplete() {
        let raw = b"GET /foo HTTP/1.1\r\nHost: example";
        assert!(RequestHeader::parse(raw).unwrap().is_none());
    }

    #[test]
    fn chunked_sets_sentinel_and_ignores_conflicting_length() {
        let raw = b"POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\nContent-Length: 10\r\n\r\n";
        let (header, _) = RequestHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.content_length(), CONTENT_LENGTH_CHUNKED);
        assert!(header.connection_close());
    }

    #[test]
    fn obs_fold_appends_with_single_space() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\nX-Thing: a\r\n b\r\n\r\n";
        let (header, _) = RequestHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.other_headers()[0].value, b"a b");
    }

    #[test]
    fn expect_continue_sets_may_continue() {
        let raw = b"POST / HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\n\r\n";
        let (header, _) = RequestHeader::parse(raw).unwrap().unwrap();
        assert!(header.may_continue());
    }

    #[test]
    fn rejects_invalid_header_name() {
        let raw = b"GET / HTTP/1.1\r\nBad Name: v\r\n\r\n";
        assert!(RequestHeader::parse(raw).is_err());
    }

    #[test]
    fn http10_defaults_to_close() {
        let raw = b"GET / HTTP/1.0\r\nHost: h\r\n\r\n";
        let (header, _) = RequestHeader::parse(raw).unwrap().unwrap();
        assert!(header.connection_close());
    }

    #[test]
    fn round_trips_through_serialize_and_reparse() {
        let raw = b"GET /foo?x=1 HTTP/1.1\r\nHost: example.com\r\nX-Custom: v\r\n\r\n";
        let (header, _) = RequestHeader::parse(raw).unwrap().unwrap();
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        let (reparsed, _) = RequestHeader::parse(&out).unwrap().unwrap();
        assert_eq!(reparsed.method(), header.method());
        assert_eq!(reparsed.request_uri(), header.request_uri());
        assert_eq!(reparsed.host(), header.host());
    }
}
