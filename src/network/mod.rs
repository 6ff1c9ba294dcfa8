//! Wire framing shared by every link in the cluster.
//!
//! Frame layout: `[0xAA][packet-id: u16 BE][payload-len: u16 BE][payload]`.
//! All multi-byte fields on every link are big-endian.

pub mod connector;
pub mod crypt;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

/// First byte of every frame.
pub const FRAME_MARKER: u8 = 0xAA;

/// Marker + id + payload length.
pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("expected 0xAA frame marker, got {got:02X}")]
    BadMarker { got: u8 },

    #[error("payload too large: {len} bytes (max {max})", max = u16::MAX)]
    PayloadTooLarge { len: usize },

    #[error("read out of bounds: pos={pos}, need={need}, len={len}")]
    ReadOutOfBounds { pos: usize, need: usize, len: usize },

    #[error("string field is not valid utf-8")]
    BadString,
}

/// One decoded frame. The payload is a read-only view into the receive
/// buffer; handlers parse it with [`Packet::reader`] and must not hold it
/// past the dispatch call.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u16,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(id: u16, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload: Bytes::from(payload),
        }
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.payload)
    }
}

/// Incremental frame decoder for a byte stream.
///
/// Bytes are appended as they arrive; [`next_frame`](Self::next_frame) yields
/// complete frames and leaves any trailing bytes buffered for the next call,
/// so partial reads and pipelined frames both work.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// A bad marker is a protocol violation: the caller must tear the
    /// connection down, the decoder state is unusable afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Packet>, FrameError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != FRAME_MARKER {
            return Err(FrameError::BadMarker { got: self.buf[0] });
        }
        let id = u16::from_be_bytes([self.buf[1], self.buf[2]]);
        let len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        let _ = self.buf.split_to(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Packet { id, payload }))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Outgoing frame builder.
///
/// The length field is reserved up front and back-patched by
/// [`finish`](Self::finish) once the payload is serialized.
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(id: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(FRAME_MARKER);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&[0, 0]); // length, patched in finish()
        Self { buf }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Length-prefixed string (u8 length, truncated at 255).
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        let bytes = s.as_bytes();
        let n = bytes.len().min(u8::MAX as usize);
        self.buf.push(n as u8);
        self.buf.extend_from_slice(&bytes[..n]);
        self
    }

    /// Patch the payload length and return the finished frame bytes.
    pub fn finish(self) -> Result<Vec<u8>, FrameError> {
        let mut buf = self.buf;
        let len = buf.len() - FRAME_HEADER_LEN;
        if len > u16::MAX as usize {
            return Err(FrameError::PayloadTooLarge { len });
        }
        buf[3..5].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(buf)
    }
}

/// Bounds-checked typed reads over a borrowed payload.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, need: usize) -> Result<&'a [u8], FrameError> {
        if self.pos + need > self.data.len() {
            return Err(FrameError::ReadOutOfBounds {
                pos: self.pos,
                need,
                len: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + need];
        self.pos += need;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, FrameError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32, FrameError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        self.take(n)
    }

    pub fn read_str(&mut self) -> Result<&'a str, FrameError> {
        let n = self.read_u8()? as usize;
        let bytes = self.take(n)?;
        std::str::from_utf8(bytes).map_err(|_| FrameError::BadString)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The unread tail of the payload, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Read one complete frame from an accepted connection's read half.
/// Listener-side counterpart of the connector's internal decoder loop.
pub async fn read_frame(stream: &mut OwnedReadHalf) -> Result<Packet> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    if header[0] != FRAME_MARKER {
        return Err(FrameError::BadMarker { got: header[0] }.into());
    }
    let id = u16::from_be_bytes([header[1], header[2]]);
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Packet::new(id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut w = PacketWriter::new(0x2001);
        w.write_u32(42).write_str("alice");
        let bytes = w.finish().unwrap();

        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let pkt = dec.next_frame().unwrap().unwrap();
        assert_eq!(pkt.id, 0x2001);

        let mut r = pkt.reader();
        assert_eq!(r.read_u32().unwrap(), 42);
        assert_eq!(r.read_str().unwrap(), "alice");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let bytes = PacketWriter::new(7).finish().unwrap();
        assert_eq!(bytes.len(), FRAME_HEADER_LEN);

        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let pkt = dec.next_frame().unwrap().unwrap();
        assert_eq!(pkt.id, 7);
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn test_partial_reads_buffer_until_complete() {
        let mut w = PacketWriter::new(1);
        w.write_bytes(&[1, 2, 3, 4]);
        let bytes = w.finish().unwrap();

        let mut dec = FrameDecoder::new();
        // Feed one byte at a time; only the final byte completes the frame.
        for (i, b) in bytes.iter().enumerate() {
            dec.extend(&[*b]);
            let got = dec.next_frame().unwrap();
            if i + 1 < bytes.len() {
                assert!(got.is_none(), "frame completed early at byte {}", i);
            } else {
                assert_eq!(got.unwrap().payload.as_ref(), &[1, 2, 3, 4]);
            }
        }
    }

    #[test]
    fn test_pipelined_frames_stay_separate() {
        let mut a = PacketWriter::new(1);
        a.write_u8(0xAA);
        let mut b = PacketWriter::new(2);
        b.write_u16(0xBEEF);

        let mut joined = a.finish().unwrap();
        joined.extend_from_slice(&b.finish().unwrap());

        let mut dec = FrameDecoder::new();
        dec.extend(&joined);
        let first = dec.next_frame().unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.payload.as_ref(), &[0xAA]);
        let second = dec.next_frame().unwrap().unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(second.payload.as_ref(), &[0xBE, 0xEF]);
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_bad_marker_rejected() {
        let mut dec = FrameDecoder::new();
        dec.extend(&[0x55, 0, 1, 0, 0]);
        assert!(matches!(
            dec.next_frame(),
            Err(FrameError::BadMarker { got: 0x55 })
        ));
    }

    #[test]
    fn test_length_backpatch() {
        let mut w = PacketWriter::new(0x3000);
        w.write_bytes(&[0; 300]);
        let bytes = w.finish().unwrap();
        assert_eq!(u16::from_be_bytes([bytes[3], bytes[4]]), 300);
    }

    #[test]
    fn test_max_length_payload() {
        let mut w = PacketWriter::new(9);
        w.write_bytes(&vec![0x5A; u16::MAX as usize]);
        let bytes = w.finish().unwrap();

        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let pkt = dec.next_frame().unwrap().unwrap();
        assert_eq!(pkt.payload.len(), u16::MAX as usize);
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let mut w = PacketWriter::new(9);
        w.write_bytes(&vec![0; u16::MAX as usize + 1]);
        assert!(matches!(w.finish(), Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_reader_bounds_check() {
        let data = [0u8; 3];
        let mut r = PacketReader::new(&data);
        assert!(r.read_u16().is_ok());
        assert!(matches!(
            r.read_u32(),
            Err(FrameError::ReadOutOfBounds { pos: 2, need: 4, len: 3 })
        ));
    }

    #[test]
    fn test_f32_roundtrip() {
        let mut w = PacketWriter::new(1);
        w.write_f32(-133.25).write_f32(0.0);
        let bytes = w.finish().unwrap();
        let mut r = PacketReader::new(&bytes[FRAME_HEADER_LEN..]);
        assert_eq!(r.read_f32().unwrap(), -133.25);
        assert_eq!(r.read_f32().unwrap(), 0.0);
    }
}
