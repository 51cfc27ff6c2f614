// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Incremental HTTP request parser.

use crate::http::{self, Error, Status};
use crate::websocket::{self, Deflate};
use bytes::BytesMut;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// An HTTP request assembled incrementally from the network.
///
/// The caller feeds one line at a time to [`parse_method_path`] and
/// [`parse_header`], then raw bytes to [`add_to_body`] if the headers
/// announced a body. One `Request` is meant to live as long as its
/// connection: [`reset`] reinitializes it in place for the next pipelined
/// request, keeping the allocated buffers.
///
/// [`parse_method_path`]: Request::parse_method_path
/// [`parse_header`]: Request::parse_header
/// [`add_to_body`]: Request::add_to_body
/// [`reset`]: Request::reset
#[derive(Debug, Default)]
pub struct Request {
    status: Status,
    raw: BytesMut,
    method: String,
    path: String,
    http_version: String,
    path_items: SmallVec<[String; 4]>,
    params: HashMap<String, String>,
    headers: HashMap<String, String>,
    accept_encoding: HashSet<String>,
    ws_deflate: Deflate,
    content_length: usize,
    body: BytesMut,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    /// Current parse phase.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Everything received so far, byte for byte, for diagnostics.
    /// Parsed lines are captured with a trailing `\n`.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target as received, before decoding.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn http_version(&self) -> &str {
        &self.http_version
    }

    /// Percent-decoded path segments.
    pub fn path_items(&self) -> &[String] {
        &self.path_items
    }

    /// Query parameter by name, percent-decoded.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Query parameter interpreted as a boolean (`on`, `yes`, `y`, `true`,
    /// `t`, `1` are true). Returns `default` if the parameter is absent.
    pub fn param_boolean(&self, name: &str, default: bool) -> bool {
        match self.params.get(name) {
            Some(value) => http::truthy(value),
            None => default,
        }
    }

    /// Query parameter interpreted as a signed integer. Returns `default`
    /// if the parameter is absent or does not parse.
    pub fn param_long(&self, name: &str, default: i64) -> i64 {
        match self.params.get(name) {
            Some(value) => value.trim().parse().unwrap_or(default),
            None => default,
        }
    }

    /// Header value by lowercase name. When a header occurred multiple
    /// times the last value is kept.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Whether the client listed `encoding` in `Accept-Encoding`.
    pub fn accepts_encoding(&self, encoding: &str) -> bool {
        self.accept_encoding.contains(encoding)
    }

    /// Announced `Content-Length`, 0 if absent or unparseable.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Permessage-deflate parameters collected from
    /// `Sec-WebSocket-Extensions`, if any.
    pub fn ws_deflate(&self) -> &Deflate {
        &self.ws_deflate
    }

    /// Move the negotiated deflate state out, leaving a disabled one.
    /// Used when the connection is upgraded to a websocket.
    pub fn take_ws_deflate(&mut self) -> Deflate {
        std::mem::take(&mut self.ws_deflate)
    }

    /// Parse the start line (`GET /api/version HTTP/1.1`).
    ///
    /// Runs of whitespace are collapsed, so `GET  /  HTTP/1.1` is accepted.
    /// An empty line is rejected without being captured; a line with fewer
    /// than two tokens is captured, moves the request to `End` and is
    /// rejected.
    pub fn parse_method_path(&mut self, line: &str) -> Result<(), Error> {
        if line.is_empty() {
            return Err(Error::InvalidStartLine)
        }
        self.raw.extend_from_slice(line.as_bytes());
        self.raw.extend_from_slice(b"\n");
        let mut words = line.split_whitespace();
        let (method, path) = match (words.next(), words.next()) {
            (Some(m), Some(p)) => (m, p),
            _ => {
                self.status = Status::End;
                return Err(Error::InvalidStartLine)
            }
        };
        self.method = method.to_string();
        self.path = path.to_string();
        self.http_version = words.next().unwrap_or("").to_string();
        let (items, params) = http::parse_path(&self.path);
        self.path_items = items;
        self.params = params;
        self.status = Status::Headers;
        log::debug!("http request: {} {}", self.method, self.path);
        Ok(())
    }

    /// Parse one header line, or the blank line ending the header block.
    ///
    /// Header names are lowercased; `Accept-Encoding`, `Content-Length`
    /// and `Sec-WebSocket-Extensions` additionally update their dedicated
    /// fields. `ws_deflate_allowed` gates whether a permessage-deflate
    /// offer is honored.
    pub fn parse_header(&mut self, line: &str, ws_deflate_allowed: bool) -> Result<(), Error> {
        self.raw.extend_from_slice(line.as_bytes());
        self.raw.extend_from_slice(b"\n");
        if line.is_empty() {
            self.status = if self.content_length > 0 { Status::Body } else { Status::End };
            return Ok(())
        }
        let (name, value) = match line.split_once(':') {
            Some((n, v)) if !n.is_empty() => (n.to_ascii_lowercase(), v.trim_start_matches(' ')),
            _ => return Err(Error::InvalidHeader),
        };
        match name.as_str() {
            "accept-encoding" => {
                for token in value.split(',') {
                    let token = token.trim();
                    if !token.is_empty() {
                        self.accept_encoding.insert(token.to_string());
                    }
                }
            }
            "content-length" => {
                // an unparseable value is ignored and the previous one kept
                if let Ok(length) = value.trim().parse::<usize>() {
                    self.content_length = length
                }
            }
            "sec-websocket-extensions" => {
                websocket::parse_extensions(value, &mut self.ws_deflate, ws_deflate_allowed)
            }
            _ => {}
        }
        self.headers.insert(name, value.to_string());
        Ok(())
    }

    /// Append body bytes, consuming from `pending` at most what
    /// `Content-Length` still allows. Bytes beyond the announced length
    /// stay in `pending` (start of the next pipelined request). Moves the
    /// request to `End` once the body is complete.
    pub fn add_to_body(&mut self, pending: &mut BytesMut) {
        let missing = match self.content_length.checked_sub(self.body.len()) {
            Some(0) | None => {
                self.status = Status::End;
                return
            }
            Some(n) => n,
        };
        let take = missing.min(pending.len());
        let chunk = pending.split_to(take);
        self.raw.extend_from_slice(&chunk);
        self.body.extend_from_slice(&chunk);
        if self.body.len() >= self.content_length {
            self.status = Status::End
        }
    }

    /// Reinitialize in place for the next request on the same connection.
    pub fn reset(&mut self) {
        self.status = Status::Method;
        self.raw.clear();
        self.method.clear();
        self.path.clear();
        self.http_version.clear();
        self.path_items.clear();
        self.params.clear();
        self.headers.clear();
        self.accept_encoding.clear();
        self.ws_deflate = Deflate::default();
        self.content_length = 0;
        self.body.clear();
    }
}
