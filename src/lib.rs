// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! A sans-io relay protocol engine.
//!
//! This crate implements the connection-level plumbing of a relay
//! service: incremental [HTTP request parsing](http), the
//! [websocket](websocket) handshake and frame codec with
//! permessage-deflate, and [password authentication](auth) with salted
//! hashes and replay protection. It performs no I/O of its own. The host
//! application owns the sockets and the event loop; it feeds received
//! bytes into a [`session::Session`] (server side) or
//! [`session::Remote`] (client side) and writes back whatever the
//! encoders hand out.
//!
//! ```
//! use relais::{session::{Event, Session}, Protocol};
//!
//! let mut session = Session::new(Protocol::Api, true);
//! session.feed(b"GET /api/version HTTP/1.1\r\n\r\n")?;
//! while let Some(event) = session.poll_event() {
//!     match event {
//!         Event::Request => {
//!             assert_eq!(session.request().path_items(), ["api", "version"]);
//!             // write a response, then:
//!             session.finish_request()?;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok::<(), relais::session::Error>(())
//! ```

pub mod auth;
pub mod http;
pub mod session;
pub mod websocket;

use std::fmt;

/// Relay protocol spoken on a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// Legacy binary protocol.
    Weechat,
    /// IRC proxy protocol.
    Irc,
    /// HTTP/websocket API protocol.
    Api,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Weechat => "weechat",
            Protocol::Irc => "irc",
            Protocol::Api => "api",
        }
    }

    pub fn from_name(name: &str) -> Option<Protocol> {
        match name {
            "weechat" => Some(Protocol::Weechat),
            "irc" => Some(Protocol::Irc),
            "api" => Some(Protocol::Api),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
