// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Permessage-deflate state for one websocket connection (RFC 7692).

use crate::websocket::Error;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::fmt;

/// Compressed messages omit this trailer on the wire; it is appended
/// before inflating and stripped after deflating.
const TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Negotiated permessage-deflate parameters and the lazily created
/// compression streams.
///
/// Both sides of the crate use one `Deflate` per connection: the
/// `window_bits_deflate` / `server_context_takeover` pair governs the
/// outbound stream, the `window_bits_inflate` / `client_context_takeover`
/// pair the inbound one. When a context-takeover flag is off the matching
/// stream is torn down after every message, resetting the compression
/// context as the peer expects.
pub struct Deflate {
    pub(crate) enabled: bool,
    pub(crate) server_context_takeover: bool,
    pub(crate) client_context_takeover: bool,
    pub(crate) window_bits_deflate: u8,
    pub(crate) window_bits_inflate: u8,
    pub(crate) server_max_window_bits_recv: bool,
    pub(crate) client_max_window_bits_recv: bool,
    strm_deflate: Option<Compress>,
    strm_inflate: Option<Decompress>,
}

impl Default for Deflate {
    fn default() -> Self {
        Deflate {
            enabled: false,
            server_context_takeover: false,
            client_context_takeover: false,
            window_bits_deflate: 0,
            window_bits_inflate: 0,
            server_max_window_bits_recv: false,
            client_max_window_bits_recv: false,
            strm_deflate: None,
            strm_inflate: None,
        }
    }
}

impl fmt::Debug for Deflate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Deflate")
            .field("enabled", &self.enabled)
            .field("server_context_takeover", &self.server_context_takeover)
            .field("client_context_takeover", &self.client_context_takeover)
            .field("window_bits_deflate", &self.window_bits_deflate)
            .field("window_bits_inflate", &self.window_bits_inflate)
            .field("server_max_window_bits_recv", &self.server_max_window_bits_recv)
            .field("client_max_window_bits_recv", &self.client_max_window_bits_recv)
            .finish()
    }
}

impl Deflate {
    pub fn new() -> Self {
        Deflate::default()
    }

    /// Whether the extension was negotiated.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn server_context_takeover(&self) -> bool {
        self.server_context_takeover
    }

    pub fn client_context_takeover(&self) -> bool {
        self.client_context_takeover
    }

    /// Window bits for the outbound (deflate) stream.
    pub fn window_bits_deflate(&self) -> u8 {
        self.window_bits_deflate
    }

    /// Window bits for the inbound (inflate) stream.
    pub fn window_bits_inflate(&self) -> u8 {
        self.window_bits_inflate
    }

    /// Whether `server_max_window_bits` was explicitly present in the
    /// peer's offer. Only then is the parameter echoed back.
    pub fn server_max_window_bits_recv(&self) -> bool {
        self.server_max_window_bits_recv
    }

    /// Whether `client_max_window_bits` was explicitly present in the
    /// peer's offer.
    pub fn client_max_window_bits_recv(&self) -> bool {
        self.client_max_window_bits_recv
    }

    /// Drop negotiated parameters and streams, back to the initial state.
    pub fn reinit(&mut self) {
        *self = Deflate::default()
    }

    /// Compress one message payload.
    ///
    /// The stream is created on first use and flushed with a SYNC flush;
    /// the `00 00 FF FF` trailer this produces is stripped as RFC 7692
    /// requires. Without server context takeover the stream is dropped
    /// afterwards.
    pub fn compress_message(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        // zlib cannot go below 9 window bits, even though the extension
        // allows negotiating 8
        let bits = self.window_bits_deflate.max(9);
        let strm = self
            .strm_deflate
            .get_or_insert_with(|| Compress::new_with_window_bits(Compression::default(), false, bits));
        let before_in = strm.total_in();
        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        loop {
            out.reserve((data.len() / 2).max(64));
            let consumed = (strm.total_in() - before_in) as usize;
            strm.compress_vec(&data[consumed ..], &mut out, FlushCompress::Sync)?;
            let consumed = (strm.total_in() - before_in) as usize;
            if consumed == data.len() && out.len() < out.capacity() {
                break
            }
        }
        if out.ends_with(&TRAILER) {
            out.truncate(out.len() - TRAILER.len())
        }
        if !self.server_context_takeover {
            self.strm_deflate = None
        }
        Ok(out)
    }

    /// Decompress one message payload, appending the `00 00 FF FF` trailer
    /// the sender stripped. Without client context takeover the stream is
    /// dropped afterwards.
    pub fn decompress_message(&mut self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let bits = self.window_bits_inflate.max(9);
        let strm =
            self.strm_inflate.get_or_insert_with(|| Decompress::new_with_window_bits(false, bits));
        let mut input = Vec::with_capacity(data.len() + TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&TRAILER);
        let before_in = strm.total_in();
        let mut out = Vec::with_capacity(data.len().saturating_mul(2).max(64));
        let mut stalled = false;
        loop {
            out.reserve(out.capacity().max(256));
            let consumed = (strm.total_in() - before_in) as usize;
            let produced = out.len();
            let status =
                strm.decompress_vec(&input[consumed ..], &mut out, FlushDecompress::Sync)?;
            let consumed_now = (strm.total_in() - before_in) as usize;
            if consumed_now == input.len() && out.len() < out.capacity() {
                break
            }
            // A SYNC-flushed stream never reaches its end before the
            // appended trailer is consumed. A finished stream (or one
            // that stalls without consuming or producing anything)
            // would otherwise loop here forever.
            if status == Status::StreamEnd || (consumed_now == consumed && out.len() == produced) {
                stalled = true;
                break
            }
        }
        if stalled {
            self.strm_inflate = None;
            return Err(Error::InvalidCompressedData)
        }
        if !self.client_context_takeover {
            self.strm_inflate = None
        }
        Ok(out)
    }
}
