//! Length-delimited framing used by every engine protocol.
//!
//! A frame is a big-endian `u32` body length followed by the body. Bodies are
//! produced and consumed by [`WireMessage`] implementations, which use the
//! `put_*`/`get_*` helpers in this module for their fields.
use std::{fmt, marker::PhantomData};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Largest frame body either side will accept
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// A protocol message that can be written to and read from a frame body
pub trait WireMessage: Sized {
    /// append the encoded message to `dst`
    fn encode(&self, dst: &mut BytesMut);
    /// decode a message from the frame body, consuming what it reads
    fn decode(src: &mut Bytes) -> Result<Self, WireError>;
}

/// Decodes `In` messages and encodes `Out` messages. A server uses
/// `FrameCodec<Request, Response>`, its clients `FrameCodec<Response, Request>`.
pub struct FrameCodec<In, Out> {
    _marker: PhantomData<fn() -> (In, Out)>,
}

impl<In, Out> FrameCodec<In, Out> {
    /// create a new codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<In, Out> Default for FrameCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out> Clone for FrameCodec<In, Out> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<In, Out> fmt::Debug for FrameCodec<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec").finish()
    }
}

impl<In: WireMessage, Out> Decoder for FrameCodec<In, Out> {
    type Item = In;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, WireError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = (&src[..LEN_PREFIX]).get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(len));
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let mut body = src.split_to(len).freeze();
        let msg = In::decode(&mut body)?;
        if body.has_remaining() {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after message",
                body.remaining()
            )));
        }
        Ok(Some(msg))
    }
}

impl<In, Out: WireMessage> Encoder<Out> for FrameCodec<In, Out> {
    type Error = WireError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), WireError> {
        let start = dst.len();
        dst.put_u32(0);
        item.encode(dst);
        let len = dst.len() - start - LEN_PREFIX;
        if len > MAX_FRAME_LEN {
            dst.truncate(start);
            return Err(WireError::FrameTooLarge(len));
        }
        dst[start..start + LEN_PREFIX].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(())
    }
}

fn ensure(src: &Bytes, n: usize, what: &str) -> Result<(), WireError> {
    if src.remaining() < n {
        return Err(WireError::Malformed(format!(
            "need {n} bytes for {what}, {} left",
            src.remaining()
        )));
    }
    Ok(())
}

/// read a `u8`
pub fn get_u8(src: &mut Bytes) -> Result<u8, WireError> {
    ensure(src, 1, "u8")?;
    Ok(src.get_u8())
}

/// read a big-endian `u16`
pub fn get_u16(src: &mut Bytes) -> Result<u16, WireError> {
    ensure(src, 2, "u16")?;
    Ok(src.get_u16())
}

/// read a big-endian `u32`
pub fn get_u32(src: &mut Bytes) -> Result<u32, WireError> {
    ensure(src, 4, "u32")?;
    Ok(src.get_u32())
}

/// read a big-endian `u64`
pub fn get_u64(src: &mut Bytes) -> Result<u64, WireError> {
    ensure(src, 8, "u64")?;
    Ok(src.get_u64())
}

/// read a `u8` encoded bool, anything but 0 and 1 is rejected
pub fn get_bool(src: &mut Bytes) -> Result<bool, WireError> {
    match get_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(WireError::Malformed(format!("invalid bool byte {n}"))),
    }
}

/// read a `u32` length prefixed byte string without copying
pub fn get_bytes(src: &mut Bytes) -> Result<Bytes, WireError> {
    let len = get_u32(src)? as usize;
    ensure(src, len, "byte string")?;
    Ok(src.split_to(len))
}

/// read a `u16` length prefixed UTF-8 string
pub fn get_str(src: &mut Bytes) -> Result<String, WireError> {
    let len = get_u16(src)? as usize;
    ensure(src, len, "string")?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|err| WireError::Malformed(format!("string is not utf-8: {err}")))
}

/// write a bool as a single byte
pub fn put_bool(dst: &mut BytesMut, val: bool) {
    dst.put_u8(val as u8);
}

/// write a `u32` length prefixed byte string
pub fn put_bytes(dst: &mut BytesMut, val: &[u8]) {
    dst.put_u32(val.len() as u32);
    dst.put_slice(val);
}

/// write a `u16` length prefixed string. Callers validate lengths, names
/// longer than `u16::MAX` are truncated at a char boundary.
pub fn put_str(dst: &mut BytesMut, val: &str) {
    let mut end = val.len().min(u16::MAX as usize);
    while !val.is_char_boundary(end) {
        end -= 1;
    }
    dst.put_u16(end as u16);
    dst.put_slice(&val.as_bytes()[..end]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Note {
        id: u64,
        text: String,
        body: Bytes,
        urgent: bool,
    }

    impl WireMessage for Note {
        fn encode(&self, dst: &mut BytesMut) {
            dst.put_u64(self.id);
            put_str(dst, &self.text);
            put_bytes(dst, &self.body);
            put_bool(dst, self.urgent);
        }

        fn decode(src: &mut Bytes) -> Result<Self, WireError> {
            Ok(Note {
                id: get_u64(src)?,
                text: get_str(src)?,
                body: get_bytes(src)?,
                urgent: get_bool(src)?,
            })
        }
    }

    fn note() -> Note {
        Note {
            id: 7,
            text: "hello".into(),
            body: Bytes::from_static(b"\x00\x01\x02"),
            urgent: true,
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more() -> Result<(), WireError> {
        let mut codec = FrameCodec::<Note, Note>::new();
        let mut buf = BytesMut::new();
        codec.encode(note(), &mut buf)?;

        let full = buf.split();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial)?.is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut partial)?, Some(note()));
        assert!(partial.is_empty());
        Ok(())
    }

    #[test]
    fn test_two_frames_in_one_read() -> Result<(), WireError> {
        let mut codec = FrameCodec::<Note, Note>::new();
        let mut buf = BytesMut::new();
        codec.encode(note(), &mut buf)?;
        codec.encode(note(), &mut buf)?;

        assert!(codec.decode(&mut buf)?.is_some());
        assert!(codec.decode(&mut buf)?.is_some());
        assert!(codec.decode(&mut buf)?.is_none());
        Ok(())
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut codec = FrameCodec::<Note, Note>::new();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_LEN as u32 + 1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let mut codec = FrameCodec::<Note, Note>::new();
        let mut buf = BytesMut::new();
        // frame claims 3 bytes, a u64 id needs 8
        buf.put_u32(3);
        buf.put_slice(b"abc");
        assert!(matches!(codec.decode(&mut buf), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_bad_bool_rejected() {
        let mut src = Bytes::from_static(&[2]);
        assert!(get_bool(&mut src).is_err());
    }
}
