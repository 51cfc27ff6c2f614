// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Sans-io transport sessions.
//!
//! [`Session`] is the server side of one connection: the host hands it
//! every chunk read from the socket via [`feed`] and drains decoded
//! [`Event`]s with [`poll_event`]; bytes to write come back from the
//! response and frame encoders. [`Remote`] is the client side, used to
//! connect out to another relay.
//!
//! [`feed`]: Session::feed
//! [`poll_event`]: Session::poll_event

use crate::http::{self, Request, Response, Status};
use crate::websocket::{self, frame, Deflate, HandshakeError, OpCode, Tag};
use crate::Protocol;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::fmt;

/// Session errors. All of them are fatal for the connection.
#[derive(Debug)]
pub enum Error {
    Http(http::Error),
    Websocket(websocket::Error),
    Handshake(HandshakeError),
    /// The peer's handshake response was not an acceptable
    /// `101 Switching Protocols`.
    UpgradeRejected,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "http error: {}", e),
            Error::Websocket(e) => write!(f, "websocket error: {}", e),
            Error::Handshake(e) => write!(f, "handshake error: {}", e),
            Error::UpgradeRejected => f.write_str("websocket upgrade rejected by peer"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Websocket(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::UpgradeRejected => None,
        }
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}

impl From<websocket::Error> for Error {
    fn from(e: websocket::Error) -> Self {
        Error::Websocket(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

/// Something the host application must react to.
#[derive(Debug, Eq, PartialEq)]
pub enum Event {
    /// A complete HTTP request is available via [`Session::request`].
    /// Respond, then call [`Session::finish_request`] or
    /// [`Session::upgrade`].
    Request,
    /// A websocket message payload.
    Message(Vec<u8>),
    /// A ping; answer with [`Session::encode_pong`].
    Ping(Vec<u8>),
    /// The peer closed the websocket.
    Close,
}

/// Server side of one relay connection.
pub struct Session {
    protocol: Protocol,
    permessage_deflate: bool,
    request: Request,
    buffer: BytesMut,
    deflate: Deflate,
    upgraded: bool,
    request_ready: bool,
    events: VecDeque<Event>,
}

impl Session {
    /// `permessage_deflate` gates whether a client's compression offer is
    /// honored (configuration and protocol policy combined by the
    /// caller).
    pub fn new(protocol: Protocol, permessage_deflate: bool) -> Self {
        Session {
            protocol,
            permessage_deflate,
            request: Request::new(),
            buffer: BytesMut::new(),
            deflate: Deflate::new(),
            upgraded: false,
            request_ready: false,
            events: VecDeque::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether the connection has been upgraded to a websocket.
    pub fn is_websocket(&self) -> bool {
        self.upgraded
    }

    /// The request being parsed, or the completed one after an
    /// [`Event::Request`].
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Hand over one chunk read from the socket.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.buffer.extend_from_slice(data);
        self.process()
    }

    /// Next pending event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Done with the current request: reinitialize it and continue with
    /// any pipelined bytes already received.
    pub fn finish_request(&mut self) -> Result<(), Error> {
        self.request.reset();
        self.request_ready = false;
        self.process()
    }

    /// Switch the connection to websocket mode, returning the complete
    /// `101 Switching Protocols` response to send. Bytes received after
    /// the request are decoded as frames right away.
    pub fn upgrade(&mut self) -> Result<String, Error> {
        let handshake = websocket::build_handshake(&self.request).ok_or(HandshakeError::Invalid)?;
        self.deflate = self.request.take_ws_deflate();
        self.upgraded = true;
        self.request.reset();
        self.request_ready = false;
        self.process()?;
        Ok(handshake)
    }

    /// Encode an outbound frame. Server frames are never masked.
    pub fn encode_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(frame::encode(&mut self.deflate, opcode, false, payload)?)
    }

    pub fn encode_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.encode_frame(OpCode::Text, payload)
    }

    pub fn encode_pong(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.encode_frame(OpCode::Pong, payload)
    }

    pub fn encode_close(&mut self) -> Result<Vec<u8>, Error> {
        self.encode_frame(OpCode::Close, b"")
    }

    fn process(&mut self) -> Result<(), Error> {
        if self.upgraded {
            let frames = frame::decode(&mut self.buffer, true, &mut self.deflate)?;
            queue_frames(&mut self.events, frames);
            return Ok(())
        }
        if self.request_ready {
            // the host has not finished the current request yet
            return Ok(())
        }
        loop {
            match self.request.status() {
                Status::Method => {
                    let line = match take_line(&mut self.buffer) {
                        Some(line) => line,
                        None => return Ok(()),
                    };
                    self.request.parse_method_path(&line)?
                }
                Status::Headers => {
                    let line = match take_line(&mut self.buffer) {
                        Some(line) => line,
                        None => return Ok(()),
                    };
                    self.request.parse_header(&line, self.permessage_deflate)?
                }
                Status::Body => {
                    if self.buffer.is_empty() {
                        return Ok(())
                    }
                    self.request.add_to_body(&mut self.buffer);
                    if self.request.status() == Status::Body {
                        return Ok(())
                    }
                }
                Status::End => {
                    self.request_ready = true;
                    self.events.push_back(Event::Request);
                    return Ok(())
                }
            }
        }
    }
}

/// Client side of a connection to another relay.
pub struct Remote {
    key: String,
    deflate: Deflate,
    buffer: BytesMut,
    established: bool,
    events: VecDeque<Event>,
}

impl Default for Remote {
    fn default() -> Self {
        Remote::new()
    }
}

impl Remote {
    pub fn new() -> Self {
        let mut raw = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
        Remote {
            key: BASE64.encode(raw),
            deflate: Deflate::new(),
            buffer: BytesMut::new(),
            established: false,
            events: VecDeque::new(),
        }
    }

    pub fn websocket_key(&self) -> &str {
        &self.key
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Build the upgrade request to send after connecting.
    ///
    /// `credential` is the clear credential (`plain:...` or `hash:...`,
    /// see [`crate::auth::encode_credential`]); it is base64-encoded
    /// here. With `offer_deflate` the request offers permessage-deflate.
    pub fn handshake_request(
        &self,
        address: &str,
        port: u16,
        credential: Option<&str>,
        totp: Option<&str>,
        offer_deflate: bool,
    ) -> String {
        let mut request = format!("GET /api HTTP/1.1\r\nHost: {}:{}\r\n", address, port);
        if let Some(credential) = credential {
            request.push_str(&format!("Authorization: Basic {}\r\n", BASE64.encode(credential)));
        }
        if let Some(totp) = totp {
            request.push_str(&format!("x-weechat-totp: {}\r\n", totp));
        }
        request.push_str(&format!(
            "Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.key
        ));
        if offer_deflate {
            request
                .push_str("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n");
        }
        request.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n\r\n", websocket::SUB_PROTOCOL_API));
        request
    }

    /// Validate the server's handshake response: a `101 Switching
    /// Protocols` with the accept value derived from our key. Negotiated
    /// extensions are recorded; frame bytes already following the
    /// response head are kept for [`feed`].
    ///
    /// [`feed`]: Remote::feed
    pub fn check_handshake(&mut self, data: &[u8]) -> Result<(), Error> {
        let response = Response::parse(data)?;
        if response.return_code() != 101
            || !response.message().eq_ignore_ascii_case("switching protocols")
        {
            log::debug!(
                "upgrade rejected: {} {}",
                response.return_code(),
                response.message()
            );
            return Err(Error::UpgradeRejected)
        }
        let expected = websocket::accept_key(&self.key);
        match response.header("sec-websocket-accept") {
            Some(accept) if accept == expected => {}
            _ => return Err(Error::UpgradeRejected),
        }
        if let Some(extensions) = response.header("sec-websocket-extensions") {
            websocket::parse_extensions(extensions, &mut self.deflate, true)
        }
        self.buffer.extend_from_slice(response.body());
        self.established = true;
        self.process()
    }

    /// Hand over one chunk read from the socket after the handshake.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.buffer.extend_from_slice(data);
        self.process()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Encode an outbound frame. Client frames are always masked.
    pub fn encode_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(frame::encode(&mut self.deflate, opcode, true, payload)?)
    }

    pub fn encode_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.encode_frame(OpCode::Text, payload)
    }

    fn process(&mut self) -> Result<(), Error> {
        let frames = frame::decode(&mut self.buffer, false, &mut self.deflate)?;
        queue_frames(&mut self.events, frames);
        Ok(())
    }
}

fn queue_frames(events: &mut VecDeque<Event>, frames: Vec<frame::Frame>) {
    for frame in frames {
        // zero-payload frames are how peers answer our pings and carry
        // nothing to process, whatever their opcode; even an empty close
        // is ignored here, the host notices the peer hanging up on the
        // socket itself
        if frame.payload().is_empty() {
            log::trace!("dropping zero-payload frame");
            continue
        }
        match frame.tag() {
            Tag::Ping => events.push_back(Event::Ping(frame.into_payload())),
            Tag::Close => events.push_back(Event::Close),
            Tag::Standard => events.push_back(Event::Message(frame.into_payload())),
        }
    }
}

/// Split the next `\n`-terminated line off `buffer`, stripping the line
/// ending. Returns `None` when no complete line has arrived yet.
fn take_line(buffer: &mut BytesMut) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let mut line = buffer.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1)
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::{take_line, Event, Remote, Session};
    use crate::websocket::{self, frame, Deflate, OpCode};
    use crate::Protocol;
    use bytes::BytesMut;

    const UPGRADE_REQUEST: &[u8] = b"GET /api HTTP/1.1\r\n\
        Host: localhost:9000\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: CI1sXhf/u2o34BfWK7NeIg==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn take_line_variants() {
        let mut b = BytesMut::from(&b"GET / HTTP/1.1\r\nHost"[..]);
        assert_eq!(take_line(&mut b).as_deref(), Some("GET / HTTP/1.1"));
        assert_eq!(&b[..], b"Host");
        assert_eq!(take_line(&mut b), None);
        b.extend_from_slice(b": x\n");
        assert_eq!(take_line(&mut b).as_deref(), Some("Host: x"));
        b.extend_from_slice(b"\r\n");
        assert_eq!(take_line(&mut b).as_deref(), Some(""));
    }

    #[test]
    fn plain_request_then_pipelined() {
        let mut s = Session::new(Protocol::Api, false);
        s.feed(b"GET /api/version HTTP/1.1\r\n\r\nGET /api/buffers HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(s.poll_event(), Some(Event::Request));
        assert_eq!(s.request().path(), "/api/version");
        assert_eq!(s.poll_event(), None);

        s.finish_request().unwrap();
        assert_eq!(s.poll_event(), Some(Event::Request));
        assert_eq!(s.request().path(), "/api/buffers");
    }

    #[test]
    fn request_split_across_reads() {
        let mut s = Session::new(Protocol::Api, false);
        let raw = b"POST /api/input HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        for chunk in raw.chunks(7) {
            s.feed(chunk).unwrap();
        }
        assert_eq!(s.poll_event(), Some(Event::Request));
        assert_eq!(s.request().method(), "POST");
        assert_eq!(s.request().body(), b"hello");
    }

    #[test]
    fn invalid_start_line_is_fatal() {
        let mut s = Session::new(Protocol::Api, false);
        assert!(s.feed(b"GARBAGE\r\n").is_err());
    }

    #[test]
    fn upgrade_and_receive_frames() {
        let mut s = Session::new(Protocol::Api, false);
        s.feed(UPGRADE_REQUEST).unwrap();
        assert_eq!(s.poll_event(), Some(Event::Request));
        let handshake = s.upgrade().unwrap();
        assert!(handshake.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(handshake.contains("Sec-WebSocket-Accept: fhLJYtv//ugX2vQXpifQgByRZ5Y=\r\n"));
        assert!(s.is_websocket());

        let mut client_deflate = Deflate::new();
        let msg = frame::encode(&mut client_deflate, OpCode::Text, true, b"{\"request\": 1}").unwrap();
        s.feed(&msg).unwrap();
        assert_eq!(s.poll_event(), Some(Event::Message(b"{\"request\": 1}".to_vec())));
    }

    #[test]
    fn frames_right_after_upgrade_request() {
        let mut raw = UPGRADE_REQUEST.to_vec();
        let ping = frame::encode(&mut Deflate::new(), OpCode::Ping, true, b"hi").unwrap();
        raw.extend_from_slice(&ping);
        let mut s = Session::new(Protocol::Api, false);
        s.feed(&raw).unwrap();
        assert_eq!(s.poll_event(), Some(Event::Request));
        s.upgrade().unwrap();
        assert_eq!(s.poll_event(), Some(Event::Ping(b"hi".to_vec())));
    }

    #[test]
    fn unmasked_client_frame_is_fatal() {
        let mut s = Session::new(Protocol::Api, false);
        s.feed(UPGRADE_REQUEST).unwrap();
        s.poll_event();
        s.upgrade().unwrap();
        let msg = frame::encode(&mut Deflate::new(), OpCode::Text, false, b"oops").unwrap();
        assert!(s.feed(&msg).is_err());
    }

    #[test]
    fn ping_close_and_empty_frames() {
        let mut s = Session::new(Protocol::Api, false);
        s.feed(UPGRADE_REQUEST).unwrap();
        s.poll_event();
        s.upgrade().unwrap();
        let mut d = Deflate::new();
        let mut raw = frame::encode(&mut d, OpCode::Text, true, b"").unwrap();
        raw.extend_from_slice(&frame::encode(&mut d, OpCode::Ping, true, b"").unwrap());
        raw.extend_from_slice(&frame::encode(&mut d, OpCode::Close, true, b"").unwrap());
        raw.extend_from_slice(&frame::encode(&mut d, OpCode::Ping, true, b"p").unwrap());
        raw.extend_from_slice(&frame::encode(&mut d, OpCode::Close, true, &[0x03, 0xE8]).unwrap());
        s.feed(&raw).unwrap();
        // zero-payload frames never surface, whatever the opcode
        assert_eq!(s.poll_event(), Some(Event::Ping(b"p".to_vec())));
        assert_eq!(s.poll_event(), Some(Event::Close));
        assert_eq!(s.poll_event(), None);
    }

    #[test]
    fn server_frames_are_unmasked() {
        let mut s = Session::new(Protocol::Api, false);
        s.feed(UPGRADE_REQUEST).unwrap();
        s.poll_event();
        s.upgrade().unwrap();
        let out = s.encode_message(b"event").unwrap();
        assert_eq!(out[1] & 0x80, 0);
        let pong = s.encode_pong(b"p").unwrap();
        assert_eq!(pong[0], 0x8A);
    }

    #[test]
    fn remote_handshake_request_layout() {
        let r = Remote::new();
        let text = r.handshake_request("relay.example", 9000, Some("plain:secret"), None, true);
        assert!(text.starts_with("GET /api HTTP/1.1\r\nHost: relay.example:9000\r\n"));
        assert!(text.contains("Authorization: Basic cGxhaW46c2VjcmV0\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {}\r\n", r.websocket_key())));
        assert!(text
            .contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: api.weechat\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("x-weechat-totp"));

        let text = r.handshake_request("relay.example", 9000, None, Some("123456"), false);
        assert!(!text.contains("Authorization"));
        assert!(text.contains("x-weechat-totp: 123456\r\n"));
        assert!(!text.contains("Sec-WebSocket-Extensions"));
    }

    #[test]
    fn remote_accepts_matching_handshake() {
        let mut r = Remote::new();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            websocket::accept_key(r.websocket_key())
        );
        r.check_handshake(response.as_bytes()).unwrap();
        assert!(r.is_established());
    }

    #[test]
    fn remote_rejects_bad_responses() {
        let mut r = Remote::new();
        let accept = websocket::accept_key(r.websocket_key());
        let not_101 = format!("HTTP/1.1 401 Unauthorized\r\nSec-WebSocket-Accept: {}\r\n\r\n", accept);
        assert!(r.check_handshake(not_101.as_bytes()).is_err());
        let bad_accept =
            "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bm9wZQ==\r\n\r\n";
        assert!(r.check_handshake(bad_accept.as_bytes()).is_err());
        let no_accept = "HTTP/1.1 101 Switching Protocols\r\n\r\n";
        assert!(r.check_handshake(no_accept.as_bytes()).is_err());
    }

    #[test]
    fn remote_talks_to_session() {
        // server side
        let mut s = Session::new(Protocol::Api, true);
        let mut r = Remote::new();
        let request = r.handshake_request("localhost", 9000, None, None, true);
        s.feed(request.as_bytes()).unwrap();
        assert_eq!(s.poll_event(), Some(Event::Request));
        let handshake = s.upgrade().unwrap();

        // client side accepts and both exchange compressed messages
        r.check_handshake(handshake.as_bytes()).unwrap();
        let to_server = r.encode_message(b"sync request, sync request").unwrap();
        s.feed(&to_server).unwrap();
        assert_eq!(s.poll_event(), Some(Event::Message(b"sync request, sync request".to_vec())));

        let to_client = s.encode_message(b"sync response").unwrap();
        r.feed(&to_client).unwrap();
        assert_eq!(r.poll_event(), Some(Event::Message(b"sync response".to_vec())));
    }
}
