// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! HTTP response parsing (client side) and encoding (server side).

use crate::http::{compress, Error, Request};
use ::http::StatusCode;
use std::collections::HashMap;

const MAX_HEADERS: usize = 32;

/// A complete HTTP response, parsed in one shot from a full buffer.
///
/// Used by the client side of the websocket handshake, where the whole
/// response head is available before anything else is done with the
/// connection.
#[derive(Debug, Default)]
pub struct Response {
    http_version: String,
    return_code: u16,
    message: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Response {
    /// Parse a full response buffer. Header names are lowercased, the last
    /// value wins for repeated headers, and everything after the head is
    /// kept as the body.
    pub fn parse(data: &[u8]) -> Result<Response, Error> {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_buf);
        let offset = match parsed.parse(data)? {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => return Err(Error::IncompleteResponse),
        };
        let mut headers = HashMap::new();
        for h in parsed.headers.iter() {
            let value = String::from_utf8_lossy(h.value).into_owned();
            headers.insert(h.name.to_ascii_lowercase(), value);
        }
        Ok(Response {
            http_version: format!("HTTP/1.{}", parsed.version.unwrap_or(1)),
            return_code: parsed.code.unwrap_or(0),
            message: parsed.reason.unwrap_or("").to_string(),
            headers,
            body: data[offset ..].to_vec(),
        })
    }

    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    pub fn return_code(&self) -> u16 {
        self.return_code
    }

    /// Reason phrase from the status line.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Header value by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Encode a full response for `request`, compressing the body if the
/// client offered a supported `Accept-Encoding` and `quality` is above 0.
///
/// `extra_headers` are emitted verbatim after the standard ones.
pub fn encode(
    request: &Request,
    code: u16,
    extra_headers: &[(&str, &str)],
    body: &[u8],
    quality: u8,
) -> Vec<u8> {
    let reason = StatusCode::from_u16(code).ok().and_then(|c| c.canonical_reason());
    let compressed = compress::compress(request, body, quality);
    let (body, encoding) = match &compressed {
        Some((data, encoding)) => (data.as_slice(), Some(*encoding)),
        None => (body, None),
    };
    let mut out = Vec::with_capacity(256 + body.len());
    match reason {
        Some(reason) => {
            out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", code, reason).as_bytes())
        }
        // no reason phrase, no trailing space either
        None => out.extend_from_slice(format!("HTTP/1.1 {}\r\n", code).as_bytes()),
    }
    for (name, value) in extra_headers {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    if let Some(encoding) = encoding {
        out.extend_from_slice(format!("Content-Encoding: {}\r\n", encoding.name()).as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// Encode a JSON response: `encode` plus the `Access-Control-Allow-Origin`
/// and `Content-Type` headers.
pub fn encode_json(request: &Request, code: u16, json: &str, quality: u8) -> Vec<u8> {
    let headers = [
        ("Access-Control-Allow-Origin", "*"),
        ("Content-Type", "application/json; charset=utf-8"),
    ];
    encode(request, code, &headers, json.as_bytes(), quality)
}

/// Encode an error as the JSON object `{"error": "<message>"}`.
pub fn encode_error_json(request: &Request, code: u16, message: &str, quality: u8) -> Vec<u8> {
    let mut escaped = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if (c as u32) < 0x20 => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    let json = format!("{{\"error\": \"{}\"}}", escaped);
    encode_json(request, code, &json, quality)
}

#[cfg(test)]
mod tests {
    use super::{encode, encode_error_json, encode_json, Response};
    use crate::http::Request;

    fn request_accepting(encodings: &str) -> Request {
        let mut r = Request::new();
        r.parse_method_path("GET /api/version HTTP/1.1").unwrap();
        if !encodings.is_empty() {
            r.parse_header(&format!("Accept-Encoding: {}", encodings), false).unwrap();
        }
        r.parse_header("", false).unwrap();
        r
    }

    #[test]
    fn parse_switching_protocols() {
        let data = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: fhLJYtv//ugX2vQXpifQgByRZ5Y=\r\n\
            \r\n";
        let r = Response::parse(data).unwrap();
        assert_eq!(r.http_version(), "HTTP/1.1");
        assert_eq!(r.return_code(), 101);
        assert_eq!(r.message(), "Switching Protocols");
        assert_eq!(r.header("upgrade"), Some("websocket"));
        assert_eq!(r.header("sec-websocket-accept"), Some("fhLJYtv//ugX2vQXpifQgByRZ5Y="));
        assert!(r.body().is_empty());
    }

    #[test]
    fn parse_keeps_body_bytes() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody";
        let r = Response::parse(data).unwrap();
        assert_eq!(r.return_code(), 200);
        assert_eq!(r.header("content-length"), Some("4"));
        assert_eq!(r.body(), b"body");
    }

    #[test]
    fn parse_incomplete_head() {
        assert!(Response::parse(b"HTTP/1.1 200 OK\r\nContent-").is_err());
    }

    #[test]
    fn parse_garbage() {
        assert!(Response::parse(b"not an http response\r\n\r\n").is_err());
    }

    #[test]
    fn encode_uncompressed() {
        let r = request_accepting("");
        let out = encode(&r, 200, &[], b"hello", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(!text.contains("Content-Encoding"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn encode_unknown_code_has_no_reason_phrase() {
        let r = request_accepting("");
        let out = encode(&r, 599, &[], b"", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 599\r\n"), "{:?}", text);
    }

    #[test]
    fn encode_no_content() {
        let r = request_accepting("");
        let out = encode(&r, 204, &[], b"", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn encode_with_extra_headers() {
        let r = request_accepting("");
        let out = encode(&r, 200, &[("X-Test", "yes")], b"x", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("X-Test: yes\r\n"));
    }

    #[test]
    fn encode_compresses_when_accepted() {
        let r = request_accepting("gzip");
        let body = [b'a'; 512];
        let out = encode(&r, 200, &[], &body, 50);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Content-Encoding: gzip\r\n"));
        assert!(!text.contains("Content-Length: 512\r\n"));
    }

    #[test]
    fn encode_json_headers() {
        let r = request_accepting("");
        let out = encode_json(&r, 200, "{\"ok\":true}", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Content-Type: application/json; charset=utf-8\r\n"));
        assert!(text.ends_with("{\"ok\":true}"));
    }

    #[test]
    fn encode_error_json_escapes_message() {
        let r = request_accepting("");
        let out = encode_error_json(&r, 403, "invalid \"totp\"", 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.ends_with("{\"error\": \"invalid \\\"totp\\\"\"}"));
    }
}
