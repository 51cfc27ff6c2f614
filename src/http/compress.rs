// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Outbound HTTP body compression.
//!
//! The encoding is picked from the client's `Accept-Encoding` tokens in
//! fixed preference order: zstd (when built with the `zstd` feature), then
//! deflate (zlib format), then gzip. A 0-100 quality knob is mapped onto
//! each codec's native level range.

use crate::http::Request;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

/// Content encoding applied to a response body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    #[cfg(feature = "zstd")]
    Zstd,
    Deflate,
    Gzip,
}

impl Encoding {
    /// Token used in `Accept-Encoding` and `Content-Encoding`.
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "zstd")]
            Encoding::Zstd => "zstd",
            Encoding::Deflate => "deflate",
            Encoding::Gzip => "gzip",
        }
    }
}

/// Map quality 1-100 onto 1..=max.
fn level(quality: u8, max: u32) -> u32 {
    (u32::from(quality - 1) * max) / 100 + 1
}

/// Compress `data` with the best encoding the client accepts.
///
/// Returns `None` when `quality` is 0, the body is empty, the client
/// accepts nothing we support, or the codec fails; the caller then sends
/// the body uncompressed.
pub fn compress(request: &Request, data: &[u8], quality: u8) -> Option<(Vec<u8>, Encoding)> {
    if quality == 0 || data.is_empty() {
        return None
    }
    let quality = quality.min(100);

    #[cfg(feature = "zstd")]
    if request.accepts_encoding("zstd") {
        match zstd::bulk::compress(data, level(quality, 19) as i32) {
            Ok(out) => return Some((out, Encoding::Zstd)),
            Err(e) => {
                log::debug!("zstd compression failed: {}", e);
                return None
            }
        }
    }

    if request.accepts_encoding("deflate") {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level(quality, 9)));
        return match enc.write_all(data).and_then(|()| enc.finish()) {
            Ok(out) => Some((out, Encoding::Deflate)),
            Err(e) => {
                log::debug!("deflate compression failed: {}", e);
                None
            }
        }
    }

    if request.accepts_encoding("gzip") {
        let mut enc = GzEncoder::new(Vec::new(), Compression::new(level(quality, 9)));
        return match enc.write_all(data).and_then(|()| enc.finish()) {
            Ok(out) => Some((out, Encoding::Gzip)),
            Err(e) => {
                log::debug!("gzip compression failed: {}", e);
                None
            }
        }
    }

    None
}
