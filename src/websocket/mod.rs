// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket handshake (RFC 6455, section 4) and framing, with
//! permessage-deflate (RFC 7692).

pub mod deflate;
pub mod frame;

use crate::http::Request;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};
use std::fmt;

pub use deflate::Deflate;
pub use frame::{Frame, OpCode, Tag};

/// Fixed GUID concatenated to the client key (RFC 6455, section 1.3).
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Sub-protocol echoed back when the client requests it.
pub const SUB_PROTOCOL_API: &str = "api.weechat";

/// Why a websocket upgrade request was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeError {
    /// Missing/wrong `Upgrade` header or missing `Sec-WebSocket-Key`.
    Invalid,
    /// The `Origin` header does not match the configured allow-list.
    OriginNotAllowed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandshakeError::Invalid => f.write_str("invalid websocket handshake"),
            HandshakeError::OriginNotAllowed => f.write_str("origin not allowed"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Framing and compression errors.
#[derive(Debug)]
pub enum Error {
    /// A client frame arrived without the mandatory mask bit.
    UnmaskedFrame,
    /// A frame announces a payload length that cannot be represented.
    FrameTooLarge,
    /// Compressing a payload failed.
    Deflate(flate2::CompressError),
    /// Decompressing a payload failed.
    Inflate(flate2::DecompressError),
    /// A compressed payload ended its deflate stream or stopped making
    /// progress before the whole payload was inflated.
    InvalidCompressedData,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnmaskedFrame => f.write_str("unmasked frame from client"),
            Error::FrameTooLarge => f.write_str("frame payload length too large"),
            Error::Deflate(e) => write!(f, "deflate error: {}", e),
            Error::Inflate(e) => write!(f, "inflate error: {}", e),
            Error::InvalidCompressedData => f.write_str("invalid compressed payload"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Deflate(e) => Some(e),
            Error::Inflate(e) => Some(e),
            _ => None,
        }
    }
}

impl From<flate2::CompressError> for Error {
    fn from(e: flate2::CompressError) -> Self {
        Error::Deflate(e)
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(e: flate2::DecompressError) -> Self {
        Error::Inflate(e)
    }
}

/// Check that `request` is an acceptable websocket upgrade.
///
/// The `Upgrade` header must be `websocket` (case-insensitive) and a
/// non-empty `Sec-WebSocket-Key` must be present. When an origin
/// allow-list is configured, a missing or non-matching `Origin` header is
/// refused.
pub fn client_handshake_valid(
    request: &Request,
    allowed_origins: Option<&regex::Regex>,
) -> Result<(), HandshakeError> {
    match request.header("upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => return Err(HandshakeError::Invalid),
    }
    match request.header("sec-websocket-key") {
        Some(v) if !v.trim().is_empty() => {}
        _ => return Err(HandshakeError::Invalid),
    }
    if let Some(allowed) = allowed_origins {
        match request.header("origin") {
            Some(origin) if allowed.is_match(origin) => {}
            _ => return Err(HandshakeError::OriginNotAllowed),
        }
    }
    Ok(())
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut digest = Sha1::new();
    digest.update(key.as_bytes());
    digest.update(GUID.as_bytes());
    BASE64.encode(digest.finalize())
}

/// Build the complete `101 Switching Protocols` response for `request`.
///
/// Echoes the negotiated permessage-deflate parameters (window bits only
/// when the client sent them explicitly) and the `api.weechat`
/// sub-protocol when requested. Returns `None` if the client key is
/// missing.
pub fn build_handshake(request: &Request) -> Option<String> {
    let key = request.header("sec-websocket-key")?;
    let accept = accept_key(key);
    let mut extensions = String::new();
    let d = request.ws_deflate();
    if d.enabled() {
        extensions.push_str("Sec-WebSocket-Extensions: permessage-deflate");
        if !d.server_context_takeover() {
            extensions.push_str("; server_no_context_takeover")
        }
        if !d.client_context_takeover() {
            extensions.push_str("; client_no_context_takeover")
        }
        if d.server_max_window_bits_recv() {
            extensions.push_str(&format!("; server_max_window_bits={}", d.window_bits_deflate()))
        }
        if d.client_max_window_bits_recv() {
            extensions.push_str(&format!("; client_max_window_bits={}", d.window_bits_inflate()))
        }
        extensions.push_str("\r\n")
    }
    let mut protocol = String::new();
    if let Some(requested) = request.header("sec-websocket-protocol") {
        if requested.split(',').any(|p| p.trim() == SUB_PROTOCOL_API) {
            protocol = format!("Sec-WebSocket-Protocol: {}\r\n", SUB_PROTOCOL_API)
        }
    }
    Some(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         {}{}\r\n",
        accept, extensions, protocol
    ))
}

/// Parse a `Sec-WebSocket-Extensions` header value into `deflate`.
///
/// Only `permessage-deflate` is recognized, and only when `allowed`.
/// Accepting the extension resets its parameters to the defaults (context
/// takeover on both sides, 15 window bits) before applying the offered
/// ones. Window bits are clamped to `[8, 15]`; a non-numeric or missing
/// value counts as 15. Unknown extensions and parameters are ignored.
pub fn parse_extensions(extensions: &str, deflate: &mut Deflate, allowed: bool) {
    for extension in extensions.split(',') {
        let mut params = extension.split(';');
        let name = params.next().unwrap_or("").trim();
        if name != "permessage-deflate" || !allowed {
            continue
        }
        deflate.enabled = true;
        deflate.server_context_takeover = true;
        deflate.client_context_takeover = true;
        deflate.window_bits_deflate = 15;
        deflate.window_bits_inflate = 15;
        for param in params {
            let (pname, pvalue) = match param.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim())),
                None => (param.trim(), None),
            };
            match pname {
                "server_no_context_takeover" => deflate.server_context_takeover = false,
                "client_no_context_takeover" => deflate.client_context_takeover = false,
                "server_max_window_bits" => {
                    deflate.window_bits_deflate = clamp_window_bits(pvalue);
                    deflate.server_max_window_bits_recv = true
                }
                "client_max_window_bits" => {
                    deflate.window_bits_inflate = clamp_window_bits(pvalue);
                    deflate.client_max_window_bits_recv = true
                }
                _ => {}
            }
        }
    }
}

fn clamp_window_bits(value: Option<&str>) -> u8 {
    match value.and_then(|v| v.parse::<i64>().ok()) {
        Some(v) if v < 8 => 8,
        Some(v) if v > 15 => 15,
        Some(v) => v as u8,
        None => 15,
    }
}
