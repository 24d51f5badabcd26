use super::{
    canonicalize_name, eq_ignore_case, is_chunked_transfer_encoding, is_connection_close,
    parse_content_length, split_lines, Cookie, HttpVersion, RawHeader, CONTENT_LENGTH_CHUNKED,
    CONTENT_LENGTH_IDENTITY, DEFAULT_MAX_HEADER_SIZE,
};
use crate::error::{Error, Result};
use std::io::Write;

/// A parsed (or in-progress) HTTP/1.1 response header.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    version: HttpVersion,
    status_code: u16,
    status_text: Option<Vec<u8>>,
    content_type: Vec<u8>,
    content_length: i64,
    server: Vec<u8>,
    connection_close: bool,
    date: Vec<u8>,
    other: Vec<RawHeader>,
    set_cookies: Vec<Cookie>,
    normalize_names: bool,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self {
            version: HttpVersion::Http11,
            status_code: 200,
            status_text: None,
            content_type: Vec::new(),
            content_length: 0,
            server: Vec::new(),
            connection_close: false,
            date: Vec::new(),
            other: Vec::new(),
            set_cookies: Vec::new(),
            normalize_names: true,
        }
    }
}

impl ResponseHeader {
    pub fn reset(&mut self) {
        *self = ResponseHeader {
            normalize_names: self.normalize_names,
            ..Default::default()
        };
    }

    pub fn set_normalize_names(&mut self, normalize: bool) {
        self.normalize_names = normalize;
    }

    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        Self::parse_with_limit(buf, DEFAULT_MAX_HEADER_SIZE)
    }

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
        let (version_bytes, rest) = split_at_space(start_line)
            .ok_or_else(|| Error::InvalidHeader("malformed status line".into()))?;
        let version = HttpVersion::parse(version_bytes)?;
        let (code_bytes, reason) = match split_at_space(rest) {
            Some((c, r)) => (c, r),
            None => (rest, &rest[0..0]),
        };
        let status_code: u16 = std::str::from_utf8(code_bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidHeader("invalid status code".into()))?;

        let (lines, consumed_after_start) = match split_lines(&buf[line_end + 2..], max_size)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut header = ResponseHeader {
            version,
            status_code,
            status_text: if reason.is_empty() {
                None
            } else {
                Some(reason.to_vec())
            },
            connection_close: version.default_close(),
            // Responses without Content-Length or Transfer-Encoding are
            // read until connection close (identity, sentinel -2).
            content_length: CONTENT_LENGTH_IDENTITY,
            ..Default::default()
        };

        let mut has_content_length = false;
        let mut is_chunked = false;

        for (name, value) in lines {
            if eq_ignore_case(&name, "content-type") {
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
            } else if eq_ignore_case(&name, "server") {
                header.server = value;
            } else if eq_ignore_case(&name, "date") {
                header.date = value;
            } else if eq_ignore_case(&name, "set-cookie") {
                if let Some(cookie) = Cookie::parse_set_cookie(&value) {
                    header.set_cookies.push(cookie);
                }
            } else {
                header.other.push(RawHeader { name, value });
            }
        }

        Ok(Some((header, line_end + 2 + consumed_after_start)))
    }

    pub fn write_to<W: Write>(&self, out: &mut W, skip_body_override: bool) -> std::io::Result<()> {
        out.write_all(self.version.as_bytes())?;
        out.write_all(b" ")?;
        out.write_all(self.status_code.to_string().as_bytes())?;
        out.write_all(b" ")?;
        out.write_all(self.status_text().as_bytes())?;
        out.write_all(b"\r\n")?;

        if !self.server.is_empty() {
            self.write_field(out, b"Server", &self.server)?;
        }
        if !self.content_type.is_empty() {
            self.write_field(out, b"Content-Type", &self.content_type)?;
        }

        let skip_body = skip_body_override || self.skip_body();
        if !skip_body {
            match self.content_length {
                CONTENT_LENGTH_CHUNKED => {
                    self.write_field(out, b"Transfer-Encoding", b"chunked")?;
                }
                CONTENT_LENGTH_IDENTITY => {}
                n if n >= 0 => {
                    self.write_field(out, b"Content-Length", n.to_string().as_bytes())?;
                }
                _ => {}
            }
        }
        if self.connection_close {
            self.write_field(out, b"Connection", b"close")?;
        }
        for cookie in &self.set_cookies {
            self.write_field(out, b"Set-Cookie", cookie.to_set_cookie_string().as_bytes())?;
        }
        if !self.date.is_empty() {
            self.write_field(out, b"Date", &self.date)?;
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

    /// Whether this status never carries a body, regardless of headers
    /// (1xx, 204, 304). `HEAD` responses are handled by the caller, which
    /// knows the request method.
    pub fn skip_body(&self) -> bool {
        matches!(self.status_code, 100..=199 | 204 | 304)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = code;
        self.status_text = None;
    }

    /// Typed view of the status for callers that want `http::StatusCode`.
    /// Falls back to 500 if the stored code is outside the valid range.
    pub fn status(&self) -> http::StatusCode {
        http::StatusCode::from_u16(self.status_code)
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status_text(&self) -> std::borrow::Cow<'_, str> {
        match &self.status_text {
            Some(t) => String::from_utf8_lossy(t),
            None => std::borrow::Cow::Borrowed(default_reason_phrase(self.status_code)),
        }
    }

    pub fn set_status_text(&mut self, text: &[u8]) {
        self.status_text = Some(text.to_vec());
    }

    pub fn content_type(&self) -> &[u8] {
        &self.content_type
    }

    pub fn set_content_type(&mut self, ct: &[u8]) {
        self.content_type = ct.to_vec();
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, n: i64) {
        self.content_length = n;
    }

    pub fn server(&self) -> &[u8] {
        &self.server
    }

    pub fn set_server(&mut self, server: &[u8]) {
        self.server = server.to_vec();
    }

    pub fn date(&self) -> &[u8] {
        &self.date
    }

    pub fn set_date(&mut self, date: &[u8]) {
        self.date = date.to_vec();
    }

    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn set_connection_close(&mut self, close: bool) {
        self.connection_close = close;
    }

    pub fn other_headers(&self) -> &[RawHeader] {
        &self.other
    }

    pub fn add_header(&mut self, name: &[u8], value: &[u8]) {
        self.other.push(RawHeader {
            name: name.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn set_cookies(&self) -> &[Cookie] {
        &self.set_cookies
    }

    pub fn add_set_cookie(&mut self, cookie: Cookie) {
        self.set_cookies.push(cookie);
    }
}

fn split_at_space(input: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = memchr::memchr(b' ', input)?;
    Some((&input[..pos], &input[pos + 1..]))
}

fn default_reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_line_and_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\n";
        let (header, consumed) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.status_code(), 200);
        assert_eq!(header.content_length(), 5);
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn tolerates_missing_reason_phrase() {
        let raw = b"HTTP/1.1 200\r\n\r\n";
        let (header, _) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.status_code(), 200);
        assert_eq!(header.status_text(), "OK");
    }

    #[test]
    fn no_length_no_encoding_is_identity() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\n";
        let (header, _) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.content_length(), CONTENT_LENGTH_IDENTITY);
    }

    #[test]
    fn head_like_response_reports_length_but_skips_body() {
        // A 304 reports its Content-Length field as parsed (1235) even
        // though the caller must not read a body for it.
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Type: x\r\nContent-Length: 1235\r\n\r\n";
        let (header, consumed) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.status_code(), 304);
        assert_eq!(header.content_length(), 1235);
        assert!(header.skip_body());
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn chunked_sets_sentinel() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let (header, _) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.content_length(), CONTENT_LENGTH_CHUNKED);
    }

    #[test]
    fn set_cookie_parsed() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1; Path=/\r\nSet-Cookie: b=2\r\n\r\n";
        let (header, _) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.set_cookies().len(), 2);
    }

    #[test]
    fn date_stays_in_fixed_slot_ahead_of_handler_added_headers() {
        // A handler's custom header is added before the server fills in
        // the default Date; the written order must still put Date first.
        let mut header = ResponseHeader::default();
        header.add_header(b"X-Custom", b"late");
        header.set_date(b"Thu, 01 Jan 1970 00:00:00 GMT");

        let mut out = Vec::new();
        header.write_to(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        let date_pos = text.find("Date:").unwrap();
        let custom_pos = text.find("X-Custom:").unwrap();
        assert!(date_pos < custom_pos, "Date must precede generic headers: {text}");
    }

    #[test]
    fn parses_date_into_typed_field() {
        let raw = b"HTTP/1.1 200 OK\r\nDate: Thu, 01 Jan 1970 00:00:00 GMT\r\n\r\n";
        let (header, _) = ResponseHeader::parse(raw).unwrap().unwrap();
        assert_eq!(header.date(), b"Thu, 01 Jan 1970 00:00:00 GMT");
        assert!(header.other_headers().is_empty());
    }
}
