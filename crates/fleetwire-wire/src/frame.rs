//! Frame layer: the outer transport unit.
//!
//! Layout: a 1-byte opcode followed by a 4-byte little-endian payload
//! length, then the payload. Control frames (close, ping, pong) carry
//! small or empty payloads; text and binary frames carry the actual
//! protocol traffic.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Size of the fixed frame header: opcode byte + u32 payload length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Upper bound on a single frame payload. Telemetry samples are tiny;
/// anything near this limit is a corrupt length field or a hostile peer.
pub const MAX_FRAME_PAYLOAD: usize = 1 << 20;

/// The transport-level type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// UTF-8 text: identities during handshake, out-of-band commands,
    /// acknowledgements.
    Text,
    /// A serialized [`crate::Envelope`].
    Binary,
    /// Orderly shutdown of one direction.
    Close,
    /// Diagnostic ping.
    Ping,
    /// Diagnostic pong.
    Pong,
}

impl FrameKind {
    fn opcode(self) -> u8 {
        match self {
            Self::Text => 0x01,
            Self::Binary => 0x02,
            Self::Close => 0x08,
            Self::Ping => 0x09,
            Self::Pong => 0x0a,
        }
    }

    fn from_opcode(op: u8) -> Option<Self> {
        match op {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Binary),
            0x08 => Some(Self::Close),
            0x09 => Some(Self::Ping),
            0x0a => Some(Self::Pong),
            _ => None,
        }
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A text frame from a string or byte literal.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Text, payload)
    }

    /// A binary frame, normally holding an encoded envelope.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, payload)
    }

    /// An empty close frame.
    pub fn close() -> Self {
        Self::new(FrameKind::Close, Bytes::new())
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame; the caller should read more bytes and retry. Consumed
    /// bytes are split off the buffer only when a full frame is parsed.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let opcode = buf[0];
        let kind = FrameKind::from_opcode(opcode)
            .ok_or_else(|| WireError::MalformedFrame(format!("unknown opcode {opcode:#04x}")))?;
        let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame { kind, payload }))
    }

    /// Appends the encoded frame to `buf`. Never fails.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.kind.opcode());
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

/// Writes a single frame to a blocking stream.
pub fn write_frame<W: Write>(w: &mut W, frame: &Frame) -> WireResult<()> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
    frame.encode(&mut buf);
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Buffered frame reader over a blocking stream.
///
/// Owns the read half of a connection: fills an internal buffer from
/// the stream and yields complete frames. A read of zero bytes while a
/// frame is pending maps to [`WireError::ConnectionClosed`].
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Blocks until one complete frame is available.
    pub fn next_frame(&mut self) -> WireResult<Frame> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf)? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                return Err(WireError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_frame() {
        let frame = Frame::binary(vec![1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let decoded = Frame::decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_input_returns_none() {
        let frame = Frame::text("hello");
        let mut full = BytesMut::new();
        frame.encode(&mut full);

        // Feed the bytes one at a time; only the last byte completes it.
        let mut buf = BytesMut::new();
        for (i, b) in full.iter().enumerate() {
            buf.extend_from_slice(&[*b]);
            let result = Frame::decode(&mut buf).expect("decode");
            if i + 1 < full.len() {
                assert!(result.is_none(), "complete after {} bytes", i + 1);
            } else {
                assert_eq!(result, Some(frame.clone()));
            }
        }
    }

    #[test]
    fn two_frames_back_to_back() {
        let a = Frame::text("first");
        let b = Frame::close();
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        b.encode(&mut buf);

        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(a));
        assert_eq!(Frame::decode(&mut buf).unwrap(), Some(b));
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x7f, 0, 0, 0, 0]);
        let err = Frame::decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::MalformedFrame(_)));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x02);
        buf.put_u32_le(u32::MAX);
        let err = Frame::decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
    }

    #[test]
    fn empty_payload_frames() {
        for frame in [Frame::close(), Frame::text(""), Frame::binary(Bytes::new())] {
            let mut buf = BytesMut::new();
            frame.encode(&mut buf);
            assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
        }
    }

    #[test]
    fn frame_reader_yields_frames_across_reads() {
        let a = Frame::text("identity");
        let b = Frame::binary(vec![9u8; 300]);
        let mut wire = BytesMut::new();
        a.encode(&mut wire);
        b.encode(&mut wire);

        let mut reader = FrameReader::new(&wire[..]);
        assert_eq!(reader.next_frame().unwrap(), a);
        assert_eq!(reader.next_frame().unwrap(), b);
        assert!(matches!(
            reader.next_frame().unwrap_err(),
            WireError::ConnectionClosed
        ));
    }
}
