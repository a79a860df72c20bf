//! Control-channel framing.
//!
//! Every frame is a fixed 5-byte header followed by the body:
//! ```text
//! ┌──────────────┬────────┬──────────────┐
//! │ Body length  │ Flag   │ Body         │
//! │ 4 bytes u32BE│ 1 byte │ length bytes │
//! └──────────────┴────────┴──────────────┘
//! ```
//!
//! The flag is reserved (compression / control marking) and is always
//! `0` or `1` on the wire. Anything else is a malformed header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProxyError, Result};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 5;

/// Default upper bound for a single frame body (16 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// One message on the control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub body: Bytes,
    pub flag: bool,
}

impl Frame {
    pub fn new(body: impl Into<Bytes>, flag: bool) -> Self {
        Self {
            body: body.into(),
            flag,
        }
    }

    /// Plain data frame with the flag cleared.
    pub fn data(body: impl Into<Bytes>) -> Self {
        Self::new(body, false)
    }

    /// Serialize header and body into one self-delimiting buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        put_frame(&mut buf, &self.body, self.flag);
        buf.freeze()
    }
}

fn put_frame(dst: &mut BytesMut, body: &[u8], flag: bool) {
    dst.put_u32(body.len() as u32);
    dst.put_u8(flag as u8);
    dst.extend_from_slice(body);
}

/// `tokio_util` codec for [`Frame`]s, used with `Framed` on both ends of
/// the control connection.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body(max_body_size: usize) -> Self {
        Self {
            max_body_size: max_body_size.min(u32::MAX as usize),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProxyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        let body_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if body_len > self.max_body_size {
            return Err(ProxyError::framing(format!(
                "frame body of {} bytes exceeds limit of {}",
                body_len, self.max_body_size
            )));
        }
        let flag = match src[4] {
            0 => false,
            1 => true,
            other => {
                return Err(ProxyError::framing(format!("invalid flag byte 0x{:02x}", other)));
            }
        };

        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len).freeze();
        Ok(Some(Frame { body, flag }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProxyError::framing(format!(
                "stream ended inside a frame ({} bytes buffered)",
                src.len()
            ))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProxyError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.body.len() > self.max_body_size {
            return Err(ProxyError::framing(format!(
                "refusing to send {} byte body (limit {})",
                frame.body.len(),
                self.max_body_size
            )));
        }
        dst.reserve(HEADER_SIZE + frame.body.len());
        put_frame(dst, &frame.body, frame.flag);
        Ok(())
    }
}
