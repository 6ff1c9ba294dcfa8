//! Client-facing frames of the login node.

use crate::network::{FrameError, PacketWriter};

pub const CMSG_ACCOUNT_LOGON: u16 = 0x0001;
pub const SMSG_ACCOUNT_LOGON_RESULT: u16 = 0x0002;
pub const CMSG_ACCOUNT_LOGOUT: u16 = 0x0003;

/// Logon result codes sent to the client.
pub const LOGON_OK: u8 = 0x00;
pub const LOGON_BAD_CREDENTIALS: u8 = 0x01;
pub const LOGON_SERVER_ERROR: u8 = 0x02;

/// Successful logon: result, account id, session key, account salt (the
/// client re-derives its verifier, and with it the header-cipher key, from
/// the salt and its own password).
pub fn build_logon_ok(
    account_id: u32,
    session_key: &[u8],
    salt: &[u8],
) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_ACCOUNT_LOGON_RESULT);
    w.write_u8(LOGON_OK);
    w.write_u32(account_id);
    w.write_u8(session_key.len().min(u8::MAX as usize) as u8);
    w.write_bytes(session_key);
    w.write_u8(salt.len().min(u8::MAX as usize) as u8);
    w.write_bytes(salt);
    w.finish()
}

/// Failed logon: result code only.
pub fn build_logon_failure(result: u8) -> Result<Vec<u8>, FrameError> {
    let mut w = PacketWriter::new(SMSG_ACCOUNT_LOGON_RESULT);
    w.write_u8(result);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::FrameDecoder;

    #[test]
    fn test_logon_ok_layout() {
        let bytes = build_logon_ok(42, &[0xAB; 40], &[0xCD; 32]).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let pkt = dec.next_frame().unwrap().unwrap();
        assert_eq!(pkt.id, SMSG_ACCOUNT_LOGON_RESULT);

        let mut r = pkt.reader();
        assert_eq!(r.read_u8().unwrap(), LOGON_OK);
        assert_eq!(r.read_u32().unwrap(), 42);
        assert_eq!(r.read_u8().unwrap(), 40);
        assert_eq!(r.read_bytes(40).unwrap(), &[0xAB; 40]);
        assert_eq!(r.read_u8().unwrap(), 32);
        assert_eq!(r.read_bytes(32).unwrap(), &[0xCD; 32]);
    }

    #[test]
    fn test_logon_failure_layout() {
        let bytes = build_logon_failure(LOGON_BAD_CREDENTIALS).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let pkt = dec.next_frame().unwrap().unwrap();
        let mut r = pkt.reader();
        assert_eq!(r.read_u8().unwrap(), LOGON_BAD_CREDENTIALS);
        assert_eq!(r.remaining(), 0);
    }
}
