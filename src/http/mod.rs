// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! HTTP request/response handling for relay connections.
//!
//! [`Request`] is an incremental parser fed one line at a time while the
//! start line and headers arrive, then raw bytes for the body.
//! [`Response`] is a one-shot parser for complete handshake responses.
//! [`compress`] negotiates and applies outbound body compression.

pub mod compress;
pub mod request;
pub mod response;

use smallvec::SmallVec;
use std::{borrow::Cow, collections::HashMap, fmt};

pub use compress::Encoding;
pub use request::Request;
pub use response::Response;

/// Parse phase of an incoming HTTP request.
///
/// A request starts in `Method`, moves to `Headers` after a valid start
/// line, to `Body` after the blank line if a positive `Content-Length` was
/// announced, and to `End` once complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Method,
    Headers,
    Body,
    End,
}

impl Default for Status {
    fn default() -> Self {
        Status::Method
    }
}

/// Decode `%XX` escapes in a URL component.
///
/// Operates on raw bytes so multi-byte UTF-8 sequences outside an escape
/// pass through untouched. A `%` not followed by two hex digits is kept
/// literally. Escapes producing invalid UTF-8 are replaced.
pub fn url_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            // only a '%' followed by two hex digits is an escape
            if let (Some(&h), Some(&l)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                if let (Some(h), Some(l)) = (hex_digit(h), hex_digit(l)) {
                    out.push(h << 4 | l);
                    i += 3;
                    continue
                }
            }
        }
        out.push(bytes[i]);
        i += 1
    }
    match String::from_utf8_lossy(&out) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0' ..= b'9' => Some(b - b'0'),
        b'a' ..= b'f' => Some(b - b'a' + 10),
        b'A' ..= b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split a request path into decoded segments and query parameters.
///
/// `/api/buffers/irc.libera.%23weechat/lines?limit=10` yields the segments
/// `["api", "buffers", "irc.libera.#weechat", "lines"]` and the parameter
/// `limit=10`. Segments and parameter values are percent-decoded, parameter
/// names are not. A parameter without `=` gets an empty value.
pub fn parse_path(path: &str) -> (SmallVec<[String; 4]>, HashMap<String, String>) {
    let mut items = SmallVec::new();
    let mut params = HashMap::new();
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    for item in path.split('/').filter(|i| !i.is_empty()) {
        items.push(url_decode(item))
    }
    if let Some(query) = query {
        for param in query.split('&').filter(|p| !p.is_empty()) {
            match param.split_once('=') {
                Some((name, value)) => params.insert(name.to_string(), url_decode(value)),
                None => params.insert(param.to_string(), String::new()),
            };
        }
    }
    (items, params)
}

/// Interpret a string as a boolean the way configuration values are read:
/// `on`, `yes`, `y`, `true`, `t` and `1` (case-insensitive) are true,
/// everything else is false.
pub fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "on" | "yes" | "y" | "true" | "t" | "1")
}

/// Errors produced while parsing HTTP requests or responses.
#[derive(Debug)]
pub enum Error {
    /// The request start line is empty or has fewer than two tokens.
    InvalidStartLine,
    /// A header line has no colon, or an empty name.
    InvalidHeader,
    /// The response head could not be parsed.
    Response(httparse::Error),
    /// The response buffer ends before the head is complete.
    IncompleteResponse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidStartLine => f.write_str("invalid request start line"),
            Error::InvalidHeader => f.write_str("invalid header line"),
            Error::Response(e) => write!(f, "response parse error: {}", e),
            Error::IncompleteResponse => f.write_str("incomplete response"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Error::Response(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Error::Response(e)
    }
}
