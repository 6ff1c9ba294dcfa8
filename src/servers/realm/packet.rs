//! Client-facing frames of the realm node.
//!
//! Everything after a successful `SMSG_REALM_AUTH_RESULT` runs under the
//! header cipher (4 bytes server→client, 6 bytes client→server).

use crate::network::{FrameError, PacketWriter};
use crate::proto::{WorldEnterError, WorldInstanceEntered, WorldLeftReason};

pub const CMSG_REALM_AUTH: u16 = 0x0010;
pub const SMSG_REALM_AUTH_RESULT: u16 = 0x0011;
pub const CMSG_CHAR_LOGIN: u16 = 0x0012;
pub const SMSG_CHAR_LOGIN_RESULT: u16 = 0x0013;
/// Opaque gameplay payload, both directions.
pub const MSG_PROXY: u16 = 0x0014;
pub const CMSG_CHAT: u16 = 0x0015;
pub const CMSG_LOGOUT: u16 = 0x0016;
pub const SMSG_WORLD_LEFT: u16 = 0x0017;
pub const CMSG_TUTORIAL_FLAGS: u16 = 0x0018;

/// Realm auth result codes.
pub const AUTH_OK: u8 = 0x00;
pub const AUTH_REJECTED: u8 = 0x01;
pub const AUTH_DUPLICATE: u8 = 0x02;
pub const AUTH_SERVER_ERROR: u8 = 0x03;

/// Character login result: 0 is success, failures are the wire-stable
/// [`WorldEnterError`] discriminant plus one.
pub const CHAR_LOGIN_OK: u8 = 0x00;

pub fn char_login_error_code(e: WorldEnterError) -> u8 {
    e as u8 + 1
}

pub fn build_auth_result(result: u8) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_REALM_AUTH_RESULT);
    w.write_u8(result);
    w.finish()
}

pub fn build_char_login_ok(entered: &WorldInstanceEntered) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_CHAR_LOGIN_RESULT);
    w.write_u8(CHAR_LOGIN_OK);
    w.write_u32(entered.instance_id);
    w.write_u16(entered.map_id);
    w.write_u16(entered.zone_id);
    w.write_f32(entered.x);
    w.write_f32(entered.y);
    w.write_f32(entered.z);
    w.write_f32(entered.o);
    w.finish()
}

pub fn build_char_login_error(e: WorldEnterError) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_CHAR_LOGIN_RESULT);
    w.write_u8(char_login_error_code(e));
    w.finish()
}

pub fn build_proxy(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(MSG_PROXY);
    w.write_bytes(payload);
    w.finish()
}

pub fn build_world_left(reason: WorldLeftReason) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_WORLD_LEFT);
    w.write_u8(reason as u8);
    w.finish()
}
