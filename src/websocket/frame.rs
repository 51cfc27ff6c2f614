// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Websocket frame encoding and decoding (RFC 6455, section 5.2).

use crate::websocket::{Deflate, Error};
use bytes::{Buf, BytesMut};
use std::fmt;

/// Payloads up to this size fit the 7-bit base length.
const MAX_LEN_U8: u64 = 125;
/// Payloads up to this size use the 16-bit length extension.
const MAX_LEN_U16: u64 = 65535;
/// First length byte announcing a 16-bit extension.
const LEN_U16: u8 = 126;
/// First length byte announcing a 64-bit extension.
const LEN_U64: u8 = 127;

const FIN: u8 = 0x80;
const RSV1: u8 = 0x40;
const MASK: u8 = 0x80;

/// Frame opcode (RFC 6455, section 5.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn nibble(self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Data frames are subject to permessage-deflate, control frames
    /// never are.
    fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OpCode::Continue => f.write_str("Continue"),
            OpCode::Text => f.write_str("Text"),
            OpCode::Binary => f.write_str("Binary"),
            OpCode::Close => f.write_str("Close"),
            OpCode::Ping => f.write_str("Ping"),
            OpCode::Pong => f.write_str("Pong"),
        }
    }
}

/// What a decoded frame asks of the receiver: ping frames need a pong,
/// close frames end the connection, everything else is payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tag {
    Standard,
    Ping,
    Close,
}

/// A decoded frame: its classification and its (unmasked, decompressed)
/// payload.
#[derive(Debug, Eq, PartialEq)]
pub struct Frame {
    tag: Tag,
    payload: Vec<u8>,
}

impl Frame {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Decode as many complete frames as `buffer` holds, leaving the bytes of
/// a trailing partial frame in place for the next read.
///
/// With `expect_masked` (server side) an unmasked frame is a protocol
/// violation that fails the whole read. Masked frames are unmasked, and
/// when `deflate` is enabled every non-empty payload is decompressed.
pub fn decode(
    buffer: &mut BytesMut,
    expect_masked: bool,
    deflate: &mut Deflate,
) -> Result<Vec<Frame>, Error> {
    let mut frames = Vec::new();
    loop {
        if buffer.len() < 2 {
            return Ok(frames)
        }
        let first = buffer[0];
        let second = buffer[1];
        let opcode = first & 0x0F;
        let masked = second & MASK == MASK;
        if expect_masked && !masked {
            return Err(Error::UnmaskedFrame)
        }
        let length_code = second & 0x7F;
        let length_bytes: usize = match length_code {
            LEN_U16 => 2,
            LEN_U64 => 8,
            _ => 0,
        };
        let header_len = 2 + length_bytes + if masked { 4 } else { 0 };
        if buffer.len() < header_len {
            return Ok(frames)
        }
        let payload_len: u64 = match length_code {
            LEN_U16 => u64::from(u16::from_be_bytes([buffer[2], buffer[3]])),
            LEN_U64 => u64::from_be_bytes([
                buffer[2], buffer[3], buffer[4], buffer[5], buffer[6], buffer[7], buffer[8],
                buffer[9],
            ]),
            n => u64::from(n),
        };
        let payload_len = usize::try_from(payload_len).map_err(|_| Error::FrameTooLarge)?;
        let total = header_len
            .checked_add(payload_len)
            .ok_or(Error::FrameTooLarge)?;
        if buffer.len() < total {
            return Ok(frames)
        }
        buffer.advance(2 + length_bytes);
        let mask_key = if masked {
            let key = [buffer[0], buffer[1], buffer[2], buffer[3]];
            buffer.advance(4);
            Some(key)
        } else {
            None
        };
        let mut payload = buffer.split_to(payload_len).to_vec();
        if let Some(key) = mask_key {
            apply_mask(&key, &mut payload)
        }
        if deflate.enabled() && !payload.is_empty() {
            payload = deflate.decompress_message(&payload)?
        }
        let tag = match opcode {
            0x9 => Tag::Ping,
            0x8 => Tag::Close,
            _ => Tag::Standard,
        };
        log::trace!("decoded frame: {:?}, {} payload bytes", tag, payload.len());
        frames.push(Frame { tag, payload })
    }
}

/// Encode one frame with the FIN bit set.
///
/// Data frames are compressed (and flagged RSV1) when `deflate` is
/// enabled and the payload is non-empty. With `mask` (client side) a
/// random masking key is applied.
pub fn encode(
    deflate: &mut Deflate,
    opcode: OpCode,
    mask: bool,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut compressed = false;
    let deflated;
    let data: &[u8] = if deflate.enabled() && opcode.is_data() && !payload.is_empty() {
        compressed = true;
        deflated = deflate.compress_message(payload)?;
        &deflated
    } else {
        payload
    };
    let mut first = FIN | opcode.nibble();
    if compressed {
        first |= RSV1
    }
    let len = data.len() as u64;
    let mut frame = Vec::with_capacity(data.len() + 14);
    frame.push(first);
    let mask_bit = if mask { MASK } else { 0 };
    if len <= MAX_LEN_U8 {
        frame.push(mask_bit | len as u8)
    } else if len <= MAX_LEN_U16 {
        frame.push(mask_bit | LEN_U16);
        frame.extend_from_slice(&(len as u16).to_be_bytes())
    } else {
        frame.push(mask_bit | LEN_U64);
        frame.extend_from_slice(&len.to_be_bytes())
    }
    if mask {
        let key: [u8; 4] = rand::random();
        frame.extend_from_slice(&key);
        let start = frame.len();
        frame.extend_from_slice(data);
        apply_mask(&key, &mut frame[start ..])
    } else {
        frame.extend_from_slice(data)
    }
    Ok(frame)
}

/// XOR the payload with the 4-byte masking key, cycling over it.
fn apply_mask(key: &[u8; 4], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4]
    }
}
