//! Full character snapshot carried by the realm→world hand-off.
//!
//! The struct is plain old data and travels zlib-compressed inside
//! [`CharacterLogIn`](super::CharacterLogIn). Field order and sizes are part
//! of the wire format; append new fields at the end, before `_pad0`.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Fixed-size name field; shorter names are NUL padded.
pub const NAME_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot payload does not decompress: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("snapshot size mismatch: got {got}, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct CharacterSnapshot {
    pub guid: u64,
    pub account_id: u32,
    pub level: u32,
    pub map_id: u16,
    pub zone_id: u16,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub o: f32,
    pub health: u32,
    pub max_health: u32,
    pub power: u32,
    pub max_power: u32,
    pub name: [u8; NAME_LEN],
    pub _pad0: [u8; 4],
}

// Safety: every field is a primitive or a primitive array; the explicit
// trailing `_pad0` keeps the size a multiple of the u64 alignment, so there
// are no implicit padding bytes.
unsafe impl bytemuck::Zeroable for CharacterSnapshot {}
unsafe impl bytemuck::Pod for CharacterSnapshot {}

impl CharacterSnapshot {
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_LEN);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

/// Serialize and zlib-compress a snapshot for the wire.
pub fn compress(snapshot: &CharacterSnapshot) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = enc.write_all(bytemuck::bytes_of(snapshot));
    enc.finish().unwrap_or_default()
}

/// Inflate and validate a wire snapshot.
pub fn decompress(data: &[u8]) -> Result<CharacterSnapshot, SnapshotError> {
    let mut dec = ZlibDecoder::new(data);
    let mut raw = Vec::new();
    dec.read_to_end(&mut raw)?;
    let expected = std::mem::size_of::<CharacterSnapshot>();
    if raw.len() != expected {
        return Err(SnapshotError::SizeMismatch {
            got: raw.len(),
            expected,
        });
    }
    Ok(bytemuck::pod_read_unaligned(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CharacterSnapshot {
        let mut snap = CharacterSnapshot {
            guid: 0x1122_3344_5566_7788,
            account_id: 9,
            level: 60,
            map_id: 0,
            zone_id: 12,
            x: -8949.95,
            y: -132.49,
            z: 83.53,
            o: 0.0,
            health: 4394,
            max_health: 4394,
            power: 2953,
            max_power: 2953,
            name: [0; NAME_LEN],
            _pad0: [0; 4],
        };
        snap.set_name("Alice");
        snap
    }

    #[test]
    fn test_struct_size_has_no_implicit_padding() {
        // 8 + 4 + 4 + 2 + 2 + 16 + 16 + 16 + 4 = 72, a multiple of 8.
        assert_eq!(std::mem::size_of::<CharacterSnapshot>(), 72);
    }

    #[test]
    fn test_compress_roundtrip() {
        let snap = sample();
        let wire = compress(&snap);
        let back = decompress(&wire).unwrap();
        assert_eq!(back.guid, snap.guid);
        assert_eq!(back.map_id, snap.map_id);
        assert_eq!(back.x, snap.x);
        assert_eq!(back.name(), "Alice");
    }

    #[test]
    fn test_garbage_payload_rejected() {
        assert!(decompress(&[0x12, 0x34, 0x56]).is_err());
    }

    #[test]
    fn test_wrong_size_rejected() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[0u8; 10]).unwrap();
        let wire = enc.finish().unwrap();
        assert!(matches!(
            decompress(&wire),
            Err(SnapshotError::SizeMismatch { got: 10, .. })
        ));
    }

    #[test]
    fn test_name_truncates_at_field_width() {
        let mut snap = sample();
        snap.set_name("AVeryLongCharacterName");
        assert_eq!(snap.name(), "AVeryLongCharact");
    }
}
