//! Gameplay payloads carried inside proxy frames.
//!
//! These are the bytes the realm relays opaquely: `[opcode: u8][body]`,
//! big-endian like everything else on the wire. The world interprets the
//! client→world opcodes and emits the world→client ones.

use crate::game::object::GameObject;
use crate::network::{FrameError, PacketReader};

// client → world
pub const OP_MOVE_HEARTBEAT: u8 = 0x01;

// world → client
pub const OP_OBJ_CREATE: u8 = 0x02;
pub const OP_OBJ_UPDATE: u8 = 0x03;
pub const OP_OBJ_DESTROY: u8 = 0x04;
pub const OP_OBJ_CHAT: u8 = 0x05;

/// Client movement payload: `[op][x][y][z][o]`.
pub fn build_move_payload(x: f32, y: f32, z: f32, o: f32) -> Vec<u8> {
    let mut out = vec![OP_MOVE_HEARTBEAT];
    out.extend_from_slice(&x.to_bits().to_be_bytes());
    out.extend_from_slice(&y.to_bits().to_be_bytes());
    out.extend_from_slice(&z.to_bits().to_be_bytes());
    out.extend_from_slice(&o.to_bits().to_be_bytes());
    out
}

pub fn parse_move_payload(body: &[u8]) -> Result<(f32, f32, f32, f32), FrameError> {
    let mut r = PacketReader::new(body);
    Ok((r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?))
}

/// Creation snapshot for a newly-visible object: `[op][guid][create block]`.
pub fn build_create_payload(obj: &GameObject) -> Vec<u8> {
    let mut out = vec![OP_OBJ_CREATE];
    out.extend_from_slice(&obj.guid().to_be_bytes());
    obj.encode_create(&mut out);
    out
}

/// Incremental update: `[op][guid][update block]`.
pub fn build_update_payload(obj: &GameObject) -> Vec<u8> {
    let mut out = vec![OP_OBJ_UPDATE];
    out.extend_from_slice(&obj.guid().to_be_bytes());
    obj.encode_update(&mut out);
    out
}

/// An object left sight: `[op][guid]`.
pub fn build_destroy_payload(guid: u64) -> Vec<u8> {
    let mut out = vec![OP_OBJ_DESTROY];
    out.extend_from_slice(&guid.to_be_bytes());
    out
}

/// Chat line: `[op][speaker guid][len-prefixed text]`.
pub fn build_chat_payload(speaker: u64, text: &str) -> Vec<u8> {
    let mut out = vec![OP_OBJ_CHAT];
    out.extend_from_slice(&speaker.to_be_bytes());
    let bytes = text.as_bytes();
    let n = bytes.len().min(u8::MAX as usize);
    out.push(n as u8);
    out.extend_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::object::Field;

    #[test]
    fn test_move_payload_roundtrip() {
        let payload = build_move_payload(1.5, -2.0, 3.25, 0.75);
        assert_eq!(payload[0], OP_MOVE_HEARTBEAT);
        let parsed = parse_move_payload(&payload[1..]).unwrap();
        assert_eq!(parsed, (1.5, -2.0, 3.25, 0.75));
    }

    #[test]
    fn test_move_payload_truncated() {
        let payload = build_move_payload(1.0, 2.0, 3.0, 4.0);
        assert!(parse_move_payload(&payload[1..9]).is_err());
    }

    #[test]
    fn test_create_payload_applies_to_blank_replica() {
        let mut obj = GameObject::new(41);
        obj.set_u32(Field::Health, 77);
        let payload = build_create_payload(&obj);
        assert_eq!(payload[0], OP_OBJ_CREATE);

        let mut r = PacketReader::new(&payload[1..]);
        assert_eq!(r.read_u64().unwrap(), 41);
        let mut replica = GameObject::new(41);
        replica.apply(&mut r).unwrap();
        assert_eq!(replica.get_u32(Field::Health), 77);
    }

    #[test]
    fn test_chat_payload_layout() {
        let payload = build_chat_payload(9, "hello");
        let mut r = PacketReader::new(&payload[1..]);
        assert_eq!(r.read_u64().unwrap(), 9);
        assert_eq!(r.read_str().unwrap(), "hello");
    }
}
