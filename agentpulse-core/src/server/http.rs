//! Minimal HTTP/1.1 request parsing and response encoding.
//!
//! Only what a loopback JSON API needs: one request per connection, no
//! bodies, no keep-alive. The parser is a pure function over a byte buffer
//! so the connection loop stays a plain "read more until complete" cycle.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Upper bound on request line plus headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request headers exceed {MAX_HEADER_BYTES} bytes")]
    TooLarge,

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header line")]
    MalformedHeader,

    #[error("request is not valid UTF-8")]
    InvalidEncoding,
}

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Percent-decoded path without the query string
    pub path: String,
    pub query: HashMap<String, String>,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// `Upgrade: websocket` with a `Connection` header listing `upgrade`.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection = self
            .header("connection")
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false);
        upgrade && connection
    }
}

fn decode_component(raw: &str, plus_as_space: bool) -> String {
    let raw = if plus_as_space {
        raw.replace('+', " ")
    } else {
        raw.to_string()
    };
    urlencoding::decode(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw)
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k, true), decode_component(v, true)),
            None => (decode_component(pair, true), String::new()),
        })
        .collect()
}

/// Try to parse a request head from the start of `buf`.
///
/// Returns `Ok(None)` until the blank line ending the headers has arrived,
/// otherwise the request and the number of bytes it occupied.
pub fn parse_request(buf: &[u8]) -> Result<Option<(HttpRequest, usize)>, RequestError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        return Ok(None);
    };
    let consumed = end + 4;
    if consumed > MAX_HEADER_BYTES {
        return Err(RequestError::TooLarge);
    }

    let head = std::str::from_utf8(&buf[..end]).map_err(|_| RequestError::InvalidEncoding)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(RequestError::MalformedRequestLine)?;
    let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::MalformedRequestLine);
    };
    if !version.starts_with("HTTP/") {
        return Err(RequestError::MalformedRequestLine);
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(RequestError::MalformedHeader)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RequestError::MalformedHeader);
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let (raw_path, raw_query) = target.split_once('?').unwrap_or((target, ""));

    Ok(Some((
        HttpRequest {
            method: method.to_string(),
            path: decode_component(raw_path, false),
            query: parse_query(raw_query),
            version: version.to_string(),
            headers,
        },
        consumed,
    )))
}

/// A complete response. Every response closes the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            body,
        }
    }

    /// Serialize `value` as JSON; a serialization failure becomes a 500.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(200, "application/json; charset=utf-8", body),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                Self::text(500, "internal server error")
            }
        }
    }

    /// Plain-text body, used for every error.
    pub fn text(status: u16, message: &str) -> Self {
        Self::new(
            status,
            "text/plain; charset=utf-8",
            message.as_bytes().to_vec(),
        )
    }

    pub fn not_found() -> Self {
        Self::text(404, "not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::text(405, "method not allowed").with_header("Allow", "GET")
    }

    pub fn bad_request(message: &str) -> Self {
        Self::text(400, message)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Wire encoding: status line, headers, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Content type for a static asset, by extension.
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_request() {
        assert_eq!(parse_request(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap(), None);
        assert_eq!(parse_request(b"").unwrap(), None);
    }

    #[test]
    fn test_parse_get_with_query() {
        let raw = b"GET /api/timeseries?window=1h&step=300 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\nextra";
        let (req, consumed) = parse_request(raw).unwrap().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/timeseries");
        assert_eq!(req.query_param("window"), Some("1h"));
        assert_eq!(req.query_param("step"), Some("300"));
        assert_eq!(req.header("HOST"), Some("127.0.0.1"));
        assert_eq!(consumed, raw.len() - "extra".len());
    }

    #[test]
    fn test_percent_decoding() {
        let (req, _) = parse_request(b"GET /a%20b?x=1%2B1&y=a+b HTTP/1.1\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.path, "/a b");
        assert_eq!(req.query_param("x"), Some("1+1"));
        assert_eq!(req.query_param("y"), Some("a b"));
    }

    #[test]
    fn test_malformed_requests() {
        assert_eq!(
            parse_request(b"GET /\r\n\r\n"),
            Err(RequestError::MalformedRequestLine)
        );
        assert_eq!(
            parse_request(b"GET / FTP/1.0\r\n\r\n"),
            Err(RequestError::MalformedRequestLine)
        );
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(RequestError::MalformedHeader)
        );
    }

    #[test]
    fn test_header_limit() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEADER_BYTES));
        assert_eq!(parse_request(&raw), Err(RequestError::TooLarge));
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        let raw = b"GET /api/live HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: keep-alive, Upgrade\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let (req, _) = parse_request(raw).unwrap().unwrap();
        assert!(req.is_websocket_upgrade());

        let (plain, _) = parse_request(b"GET /api/live HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert!(!plain.is_websocket_upgrade());
    }

    #[test]
    fn test_response_encoding() {
        let bytes = HttpResponse::json(&serde_json::json!({"ok": true})).to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Cache-Control: no-store\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"ok\":true}"));

        let text = String::from_utf8(HttpResponse::method_not_allowed().to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(text.contains("Allow: GET\r\n"));
    }
}
