//! URI parsing, path normalization, and composition.

use crate::args::{percent_decode, ArgMap};
use crate::error::{Error, Result};

/// A parsed, normalized URI.
///
/// Invariants: `scheme` and `host` are lowercase; `path` begins with `/`;
/// the path never contains a `..` segment that escapes the root.
#[derive(Debug, Clone, Default)]
pub struct Uri {
    scheme: String,
    host: String,
    /// Raw, pre-normalization path as it appeared on the wire.
    raw_path: Vec<u8>,
    /// Normalized path.
    path: Vec<u8>,
    query: Vec<u8>,
    hash: Vec<u8>,
    query_args: Option<ArgMap>,
}

impl Uri {
    /// Parses `uri` (a request-target, e.g. `/a/b?q=1` or an absolute
    /// `scheme://host/path`) with `host` supplying the default authority
    /// when `uri` does not carry one. `is_tls` selects the default scheme
    /// when `uri` has none (`https` vs `http`).
    pub fn parse(host: &[u8], uri: &[u8], is_tls: bool) -> Result<Self> {
        let (scheme, rest) = split_scheme(uri, is_tls);

        let (authority, path_and_query) = if uri_has_authority(uri) {
            split_at_first(rest, b'/')
        } else {
            (host, rest)
        };

        let authority = if authority.is_empty() { host } else { authority };
        let host = validate_and_lower_host(authority)?;

        let (path_part, query_and_hash) = split_at_first(path_and_query, b'?');
        let (query, hash) = if path_and_query.contains(&b'?') {
            split_at_first(query_and_hash, b'#')
        } else {
            let (p, h) = split_at_first(path_part, b'#');
            return Self::finish(scheme, host, prefix_slash(p), &[], h);
        };

        Self::finish(scheme, host, prefix_slash(path_part), query, hash)
    }

    fn finish(
        scheme: String,
        host: String,
        raw_path: Vec<u8>,
        query: &[u8],
        hash: &[u8],
    ) -> Result<Self> {
        let path = normalize_path(&raw_path);
        Ok(Self {
            scheme,
            host,
            raw_path,
            path,
            query: query.to_vec(),
            hash: hash.to_vec(),
            query_args: None,
        })
    }

    /// Scheme, always lowercase (`http` or `https` by default).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host, always lowercase.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Normalized path, always beginning with `/`.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Path exactly as it appeared before normalization.
    pub fn raw_path(&self) -> &[u8] {
        &self.raw_path
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> &[u8] {
        &self.query
    }

    /// Raw fragment, without the leading `#`. Never sent over the wire.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Lazily parses and caches the query string as an [`ArgMap`].
    pub fn query_args(&mut self) -> &ArgMap {
        if self.query_args.is_none() {
            self.query_args = Some(ArgMap::parse(&self.query));
        }
        self.query_args.as_ref().unwrap()
    }

    /// `scheme://host` + [`Uri::request_uri`].
    pub fn full_uri(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.scheme.as_bytes());
        out.extend_from_slice(b"://");
        out.extend_from_slice(self.host.as_bytes());
        out.extend_from_slice(&self.request_uri());
        out
    }

    /// Path (re-quoted) + optional `?query`. The fragment is never
    /// included: clients must not transmit it over the wire.
    pub fn request_uri(&self) -> Vec<u8> {
        let mut out = requote_path(&self.path);
        if !self.query.is_empty() {
            out.push(b'?');
            out.extend_from_slice(&self.query);
        }
        out
    }

    /// Applies fasthttp-style `Update` semantics: an absolute `scheme://`
    /// value replaces the URI wholesale; a leading `/` replaces
    /// path+query+hash, keeping scheme/host; a leading `?` replaces only
    /// the query; anything else is a relative path resolved against the
    /// current directory.
    pub fn update(&mut self, new: &[u8]) -> Result<()> {
        if uri_has_authority(new) {
            let is_tls = self.scheme == "https";
            *self = Uri::parse(self.host.as_bytes(), new, is_tls)?;
            return Ok(());
        }
        if new.first() == Some(&b'/') {
            let (path_part, query_and_hash) = split_at_first(new, b'?');
            let (query, hash) = if new.contains(&b'?') {
                split_at_first(query_and_hash, b'#')
            } else {
                let (p, h) = split_at_first(path_part, b'#');
                self.raw_path = p.to_vec();
                self.path = normalize_path(p);
                self.query.clear();
                self.hash = h.to_vec();
                self.query_args = None;
                return Ok(());
            };
            self.raw_path = path_part.to_vec();
            self.path = normalize_path(path_part);
            self.query = query.to_vec();
            self.hash = hash.to_vec();
            self.query_args = None;
            return Ok(());
        }
        if new.first() == Some(&b'?') {
            self.query = new[1..].to_vec();
            self.query_args = None;
            return Ok(());
        }

        // Relative path: resolve against the current directory.
        let mut dir = self.path.clone();
        if let Some(pos) = dir.iter().rposition(|&b| b == b'/') {
            dir.truncate(pos + 1);
        } else {
            dir = b"/".to_vec();
        }
        dir.extend_from_slice(new);
        self.raw_path = dir.clone();
        self.path = normalize_path(&dir);
        Ok(())
    }
}

fn split_scheme(uri: &[u8], is_tls: bool) -> (String, &[u8]) {
    if let Some(pos) = find_subslice(uri, b"://") {
        let scheme = String::from_utf8_lossy(&uri[..pos]).to_lowercase();
        (scheme, &uri[pos + 3..])
    } else {
        let default = if is_tls { "https" } else { "http" };
        (default.to_string(), uri)
    }
}

fn uri_has_authority(uri: &[u8]) -> bool {
    find_subslice(uri, b"://").is_some()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

fn split_at_first(input: &[u8], sep: u8) -> (&[u8], &[u8]) {
    match memchr::memchr(sep, input) {
        Some(pos) => (&input[..pos], &input[pos + 1..]),
        None => (input, &input[0..0]),
    }
}

fn prefix_slash(path: &[u8]) -> Vec<u8> {
    if path.first() == Some(&b'/') {
        path.to_vec()
    } else {
        let mut out = Vec::with_capacity(path.len() + 1);
        out.push(b'/');
        out.extend_from_slice(path);
        out
    }
}

fn validate_and_lower_host(host: &[u8]) -> Result<String> {
    if host.first() == Some(&b'[') {
        validate_ipv6_literal(host)?;
    }
    Ok(String::from_utf8_lossy(host).to_lowercase())
}

/// Validates a bracketed IPv6 literal (optionally with a zone id). The
/// bracketed literal may be followed by `:port`; only the bracketed part
/// itself is validated.
fn validate_ipv6_literal(host: &[u8]) -> Result<()> {
    let closing = host
        .iter()
        .position(|&b| b == b']')
        .ok_or_else(|| Error::InvalidUri("unterminated IPv6 literal".into()))?;
    if closing == 1 {
        return Err(Error::InvalidUri("empty IPv6 literal".into()));
    }
    let inner = &host[1..closing];
    let (addr_part, zone_part) = split_at_first(inner, b'%');
    if !addr_part.contains(&b':') {
        return Err(Error::InvalidUri("IPv6 literal missing ':'".into()));
    }
    let addr_str = std::str::from_utf8(addr_part)
        .map_err(|_| Error::InvalidUri("IPv6 literal not UTF-8".into()))?;
    addr_str
        .parse::<std::net::Ipv6Addr>()
        .map_err(|_| Error::InvalidUri("malformed IPv6 address".into()))?;
    if inner.contains(&b'%') && zone_part.is_empty() {
        return Err(Error::InvalidUri("empty zone id".into()));
    }
    Ok(())
}

/// Percent-decodes, ensures a leading `/`, collapses `//` runs, and
/// resolves `.`/`..` segments without crossing the root. A trailing `/`
/// in the decoded input is preserved in the output.
pub fn normalize_path(raw: &[u8]) -> Vec<u8> {
    let decoded = percent_decode(raw, false);
    let had_trailing_slash = decoded.last() == Some(&b'/') && decoded.len() > 1;

    let mut stack: Vec<Vec<u8>> = Vec::new();
    for segment in decoded.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => continue,
            b".." => {
                stack.pop();
            }
            s => stack.push(s.to_vec()),
        }
    }

    let mut out = Vec::with_capacity(decoded.len());
    out.push(b'/');
    for (i, seg) in stack.iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(seg);
    }
    if had_trailing_slash && out.last() != Some(&b'/') {
        out.push(b'/');
    }
    out
}

/// Percent-encodes bytes outside the unreserved + path-safe set.
fn requote_path(path: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(path.len());
    for &b in path {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'~'
            | b'/'
            | b':'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'=' => out.push(b),
            _ => {
                out.push(b'%');
                out.push(HEX[(b >> 4) as usize]);
                out.push(HEX[(b & 0xf) as usize]);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_request_target() {
        let uri = Uri::parse(b"example.com", b"/a/b?q=1#frag", false).unwrap();
        assert_eq!(uri.scheme(), "http");
        assert_eq!(uri.host(), "example.com");
        assert_eq!(uri.path(), b"/a/b");
        assert_eq!(uri.query(), b"q=1");
        assert_eq!(uri.hash(), b"frag");
    }

    #[test]
    fn parses_absolute_uri() {
        let uri = Uri::parse(b"", b"HTTP://Example.COM:8080/x", false).unwrap();
        assert_eq!(uri.scheme(), "http");
        assert_eq!(uri.host(), "example.com:8080");
        assert_eq!(uri.path(), b"/x");
    }

    #[test]
    fn normalizes_dot_segments() {
        // /a/./b/..//c -> /a/c
        let normalized = normalize_path(b"/a/./b/..//c");
        assert_eq!(normalized, b"/a/c");
    }

    #[test]
    fn normalization_clamps_at_root() {
        let normalized = normalize_path(b"/../../etc/passwd");
        assert_eq!(normalized, b"/etc/passwd");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_path(b"/a/./b/..//c");
        let twice = normalize_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn preserves_trailing_slash() {
        let normalized = normalize_path(b"/a/b/");
        assert_eq!(normalized, b"/a/b/");
    }

    #[test]
    fn request_uri_omits_fragment() {
        let uri = Uri::parse(b"h", b"/a?b=1#frag", false).unwrap();
        assert_eq!(uri.request_uri(), b"/a?b=1");
    }

    #[test]
    fn update_absolute_replaces_wholesale() {
        let mut uri = Uri::parse(b"a.com", b"/old", false).unwrap();
        uri.update(b"http://b.com/new").unwrap();
        assert_eq!(uri.host(), "b.com");
        assert_eq!(uri.path(), b"/new");
    }

    #[test]
    fn update_absolute_path_keeps_host() {
        let mut uri = Uri::parse(b"a.com", b"/old?x=1", false).unwrap();
        uri.update(b"/new?y=2").unwrap();
        assert_eq!(uri.host(), "a.com");
        assert_eq!(uri.path(), b"/new");
        assert_eq!(uri.query(), b"y=2");
    }

    #[test]
    fn update_query_only() {
        let mut uri = Uri::parse(b"a.com", b"/p?x=1", false).unwrap();
        uri.update(b"?z=9").unwrap();
        assert_eq!(uri.path(), b"/p");
        assert_eq!(uri.query(), b"z=9");
    }

    #[test]
    fn update_relative_resolves_against_directory() {
        let mut uri = Uri::parse(b"a.com", b"/dir/file", false).unwrap();
        uri.update(b"other").unwrap();
        assert_eq!(uri.path(), b"/dir/other");
    }

    #[test]
    fn valid_ipv6_literal_host() {
        let uri = Uri::parse(b"", b"http://[::1]:8080/", false).unwrap();
        assert_eq!(uri.host(), "[::1]:8080");
    }

    #[test]
    fn rejects_malformed_ipv6_literal() {
        let result = Uri::parse(b"", b"http://[not-an-addr]/", false);
        assert!(result.is_err());
    }
}
