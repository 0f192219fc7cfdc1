//! HTTP/1.x message codec for the forward proxy.
//!
//! Requests are tokenized with `httparse`; responses are split by hand because
//! the cache needs the raw status line and header block exactly as the origin
//! sent them.

use crate::error::{ProxyError, Result};
use bytes::Bytes;

const MAX_HEADERS: usize = 64;

/// Marks the end of an HTTP message head.
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Client headers that only apply to the client-proxy hop.
const HOP_BY_HOP: &[&str] = &["connection", "proxy-connection", "keep-alive"];

const RESOURCE_SPECIFIC: &[&str] = &[
    "content-length",
    "content-type",
    "if-none-match",
    "if-modified-since",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent by the client (absolute or origin form).
    pub url: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub http_version: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    /// Parse a request head plus whatever body bytes followed it.
    ///
    /// Host and port come from an absolute-form target when present, else from
    /// the `Host` header. An unresolvable host is left empty; callers decide
    /// whether that is fatal.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut header_buf);

        let head_len = match parsed.parse(raw) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Err(ProxyError::MalformedRequest("incomplete request head".into()))
            }
            Err(e) => return Err(ProxyError::MalformedRequest(e.to_string())),
        };

        let method = parsed.method.unwrap_or_default().to_string();
        let url = parsed.path.unwrap_or_default().to_string();
        if method.is_empty() || url.is_empty() {
            return Err(ProxyError::MalformedRequest("empty request line".into()));
        }
        let http_version = format!("HTTP/1.{}", parsed.version.unwrap_or(1));

        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();

        let mut request = HttpRequest {
            method,
            path: url.clone(),
            url,
            host: String::new(),
            port: 80,
            http_version,
            headers,
            body: Bytes::copy_from_slice(&raw[head_len..]),
        };
        request.resolve_target();
        Ok(request)
    }

    fn resolve_target(&mut self) {
        let lower = self.url.to_ascii_lowercase();
        let scheme_len = if lower.starts_with("http://") {
            Some(7)
        } else if lower.starts_with("https://") {
            self.port = 443;
            Some(8)
        } else {
            None
        };

        let authority = match scheme_len {
            Some(n) => {
                let rest = &self.url[n..];
                let (authority, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx..]),
                    None => (rest, "/"),
                };
                let authority = authority.to_string();
                self.path = path.to_string();
                // the target URI wins over whatever Host the client sent
                if self.header("host").is_some() {
                    self.set_header("Host", authority.clone());
                }
                authority
            }
            None => match self.header("host") {
                Some(h) => h.to_string(),
                None => return,
            },
        };

        let (host, port) = split_host_port(&authority);
        self.host = host.to_string();
        if let Some(port) = port {
            self.port = port;
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    /// Replace an existing header (matched case-insensitively) or append it.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Declared body length, zero when absent or unparsable.
    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Identity used by the response cache.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.host, self.path)
    }

    /// Encode for the origin: origin-form target, client headers minus
    /// hop-by-hop ones, and `Connection: close` so the reply ends at EOF.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        out.push_str(&self.method);
        out.push(' ');
        out.push_str(&self.path);
        out.push(' ');
        out.push_str(&self.http_version);
        out.push_str("\r\n");

        if self.header("host").is_none() && !self.host.is_empty() {
            out.push_str("Host: ");
            out.push_str(&self.host_header_value());
            out.push_str("\r\n");
        }
        for (k, v) in &self.headers {
            if HOP_BY_HOP.iter().any(|h| k.eq_ignore_ascii_case(h)) {
                continue;
            }
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Point the request at another origin, keeping `Host` in step.
    pub fn set_authority(&mut self, host: &str, port: u16) {
        self.host = host.to_string();
        self.port = port;
        let value = self.host_header_value();
        self.set_header("Host", value);
    }

    fn host_header_value(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Derive a GET for another resource on the same origin. Validators and
    /// body framing belong to the original resource and are dropped.
    pub fn with_path(&self, path: &str) -> Self {
        let headers = self
            .headers
            .iter()
            .filter(|(k, _)| !RESOURCE_SPECIFIC.iter().any(|h| k.eq_ignore_ascii_case(h)))
            .cloned()
            .collect();
        HttpRequest {
            method: "GET".to_string(),
            url: path.to_string(),
            host: self.host.clone(),
            port: self.port,
            path: path.to_string(),
            http_version: self.http_version.clone(),
            headers,
            body: Bytes::new(),
        }
    }
}

/// Origin response split into status line, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_line: String,
    /// Names as sent; a repeated name keeps its last value.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let head_end = find(raw, HEAD_TERMINATOR)
            .ok_or(ProxyError::InvalidResponse("no header/body separator"))?;
        let head = String::from_utf8_lossy(&raw[..head_end]);

        let (status_line, header_block) = match head.find("\r\n") {
            Some(idx) => (&head[..idx], &head[idx + 2..]),
            None => (&head[..], ""),
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in header_block.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim_start_matches([' ', '\t']);
            match headers.iter_mut().find(|(k, _)| k.as_str() == key) {
                Some(slot) => slot.1 = value.to_string(),
                None => headers.push((key.to_string(), value.to_string())),
            }
        }

        Ok(HttpResponse {
            status_line: status_line.to_string(),
            headers,
            body: Bytes::copy_from_slice(&raw[head_end + HEAD_TERMINATOR.len()..]),
        })
    }

    /// Numeric status parsed from the status line.
    pub fn status_code(&self) -> Option<u16> {
        status_code(&self.status_line)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.status_line.len() + 64 * self.headers.len());
        out.push_str(&self.status_line);
        out.push_str("\r\n");
        for (k, v) in &self.headers {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Status code from the first line of a raw response, if it has one.
pub fn status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Split `host[:port]`; the port is `None` when absent or unparsable.
pub fn split_host_port(authority: &str) -> (&str, Option<u16>) {
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => (host, port.parse().ok()),
        _ => (authority, None),
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_target_uses_host_header() {
        let req =
            HttpRequest::parse(b"GET /home HTTP/1.1\r\nHost: www.example.com:8081\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.host, "www.example.com");
        assert_eq!(req.port, 8081);
        assert_eq!(req.path, "/home");
        assert_eq!(req.cache_key(), "www.example.com/home");
    }

    #[test]
    fn absolute_target_overrides_host_header() {
        let req = HttpRequest::parse(
            b"GET http://origin.test:8000/video/a.mpd?x=1 HTTP/1.1\r\nHost: other\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.host, "origin.test");
        assert_eq!(req.port, 8000);
        assert_eq!(req.path, "/video/a.mpd?x=1");
        assert_eq!(req.header("host"), Some("origin.test:8000"));

        let wire = String::from_utf8(req.serialize()).unwrap();
        assert!(wire.contains("Host: origin.test:8000\r\n"), "{wire}");
        assert!(!wire.contains("Host: other"));
    }

    #[test]
    fn absolute_target_without_path_defaults_to_root() {
        let req = HttpRequest::parse(b"GET http://origin.test HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/");
        assert_eq!(req.port, 80);
    }

    #[test]
    fn https_scheme_defaults_to_443() {
        let req = HttpRequest::parse(b"GET https://secure.test/x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.port, 443);
        assert_eq!(req.host, "secure.test");
    }

    #[test]
    fn bad_port_keeps_default() {
        let req = HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: example.com:http\r\n\r\n").unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 80);
    }

    #[test]
    fn missing_host_leaves_host_empty() {
        let req = HttpRequest::parse(b"GET /x HTTP/1.1\r\nAccept: */*\r\n\r\n").unwrap();
        assert!(req.host.is_empty());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = HttpRequest::parse(b"\x00\x01 nonsense\r\n\r\n").unwrap_err();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[test]
    fn serialize_rewrites_to_origin_form() {
        let req = HttpRequest::parse(
            b"GET http://origin.test/a HTTP/1.1\r\nHost: origin.test\r\nProxy-Connection: keep-alive\r\nAccept: */*\r\n\r\n",
        )
        .unwrap();
        let wire = String::from_utf8(req.serialize()).unwrap();

        assert!(wire.starts_with("GET /a HTTP/1.1\r\n"));
        assert!(wire.contains("Host: origin.test\r\n"));
        assert!(wire.contains("Accept: */*\r\n"));
        assert!(!wire.contains("Proxy-Connection"));
        assert!(wire.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn serialize_adds_host_when_missing() {
        let req = HttpRequest::parse(b"GET http://origin.test:8080/a HTTP/1.1\r\n\r\n").unwrap();
        let wire = String::from_utf8(req.serialize()).unwrap();
        assert!(wire.contains("Host: origin.test:8080\r\n"));
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req =
            HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: h\r\nif-none-match: \"old\"\r\n\r\n")
                .unwrap();
        req.set_header("If-None-Match", "\"new\"");
        assert_eq!(req.header("IF-NONE-MATCH"), Some("\"new\""));
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn request_body_is_kept() {
        let req = HttpRequest::parse(
            b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello",
        )
        .unwrap();
        assert_eq!(req.content_length(), 5);
        assert_eq!(&req.body[..], b"hello");
    }

    #[test]
    fn with_path_drops_validators_of_the_original_resource() {
        let req = HttpRequest::parse(
            b"GET /v/seg-low-3.m4s HTTP/1.1\r\nHost: cdn.test\r\nIf-None-Match: \"x\"\r\nUser-Agent: player\r\n\r\n",
        )
        .unwrap();
        let sub = req.with_path("/v/seg-high-3.m4s");

        assert_eq!(sub.path, "/v/seg-high-3.m4s");
        assert_eq!(sub.host, "cdn.test");
        assert_eq!(sub.header("if-none-match"), None);
        assert_eq!(sub.header("user-agent"), Some("player"));
    }

    #[test]
    fn response_parse_splits_head_and_body() {
        let resp = HttpResponse::parse(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Dup: one\r\nX-Dup:   two\r\n\r\nbody\r\n\r\nmore",
        )
        .unwrap();

        assert_eq!(resp.status_line, "HTTP/1.1 200 OK");
        assert_eq!(resp.status_code(), Some(200));
        assert_eq!(resp.header("content-type"), Some("text/plain"));
        assert_eq!(resp.header("X-Dup"), Some("two"));
        assert_eq!(resp.headers.len(), 2);
        assert_eq!(&resp.body[..], b"body\r\n\r\nmore");
    }

    #[test]
    fn response_header_value_keeps_later_colons() {
        let resp =
            HttpResponse::parse(b"HTTP/1.1 200 OK\r\nLast-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\n\r\n")
                .unwrap();
        assert_eq!(
            resp.header("Last-Modified"),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn response_without_headers() {
        let resp = HttpResponse::parse(b"HTTP/1.1 304 Not Modified\r\n\r\n").unwrap();
        assert_eq!(resp.status_code(), Some(304));
        assert!(resp.headers.is_empty());
        assert!(resp.body.is_empty());
    }

    #[test]
    fn response_without_separator_is_invalid() {
        let err = HttpResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 3").unwrap_err();
        assert!(matches!(err, ProxyError::InvalidResponse(_)));
    }

    #[test]
    fn response_round_trips_to_wire() {
        let raw = b"HTTP/1.1 200 OK\r\nETag: \"v1\"\r\n\r\nabc";
        let resp = HttpResponse::parse(raw).unwrap();
        assert_eq!(resp.to_bytes(), raw.to_vec());
    }

    #[test]
    fn status_code_rejects_non_http_lines() {
        assert_eq!(status_code("garbage 304"), None);
        assert_eq!(status_code("HTTP/1.0 304 Not Modified"), Some(304));
    }
}
