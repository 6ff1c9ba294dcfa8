//! Client-facing header obfuscation and session key material.
//!
//! Only the first few bytes of each frame header are transformed: 4 bytes on
//! server→client frames, 6 bytes on client→server frames. The payload stays
//! cleartext. The per-session key is an HMAC-SHA1 digest of the account's
//! SRP verifier, and the transform is a keyed running XOR whose state advances
//! with every byte, so both sides must stay packet-for-packet in step.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Header bytes transformed on frames leaving the server.
pub const SERVER_ENCRYPT_LEN: usize = 4;

/// Header bytes transformed on frames arriving at the server.
pub const SERVER_DECRYPT_LEN: usize = 6;

/// Fixed HMAC seed for header-key derivation. Shared by every node and
/// client build; changing it breaks wire compatibility.
const HEADER_KEY_SEED: [u8; 16] = [
    0x38, 0xA7, 0x83, 0x15, 0xF8, 0x92, 0x25, 0x30,
    0x71, 0x98, 0x67, 0xB1, 0x8C, 0x04, 0xE2, 0xAA,
];

/// Derive the 20-byte header-cipher key from the session's shared secret.
pub fn derive_header_key(secret: &[u8]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(&HEADER_KEY_SEED)
        .expect("hmac accepts any key length");
    mac.update(secret);
    mac.finalize().into_bytes().into()
}

#[derive(Clone, Copy, Default)]
struct CipherState {
    i: u8, // key rotation index
    j: u8, // previous ciphertext byte
}

/// Sending half of a header cipher; owns its own running state so the
/// writer task and reader loop of a link can run independently.
pub struct HeaderEncrypt {
    key: [u8; 20],
    len: usize,
    state: CipherState,
}

impl HeaderEncrypt {
    /// Obfuscate the leading bytes of an outgoing frame in place.
    pub fn encrypt(&mut self, frame: &mut [u8]) {
        self.encrypt_chunk(frame, 0);
    }

    /// Chunk variant for frames built in pieces: `offset` is how many bytes
    /// of the current frame were handled already. Only the part of the
    /// per-frame quota that falls inside this chunk is transformed.
    pub fn encrypt_chunk(&mut self, chunk: &mut [u8], offset: usize) {
        if offset >= self.len {
            return;
        }
        let n = (self.len - offset).min(chunk.len());
        for b in chunk[..n].iter_mut() {
            let t = (*b ^ self.key[self.state.i as usize]).wrapping_add(self.state.j);
            self.state.i = (self.state.i + 1) % self.key.len() as u8;
            self.state.j = t;
            *b = t;
        }
    }
}

/// Receiving half of a header cipher.
pub struct HeaderDecrypt {
    key: [u8; 20],
    len: usize,
    state: CipherState,
}

impl HeaderDecrypt {
    /// Undo the peer's transform on the leading bytes of an incoming frame.
    pub fn decrypt(&mut self, frame: &mut [u8]) {
        self.decrypt_chunk(frame, 0);
    }

    /// See [`HeaderEncrypt::encrypt_chunk`].
    pub fn decrypt_chunk(&mut self, chunk: &mut [u8], offset: usize) {
        if offset >= self.len {
            return;
        }
        let n = (self.len - offset).min(chunk.len());
        for b in chunk[..n].iter_mut() {
            let c = *b;
            let p = c.wrapping_sub(self.state.j) ^ self.key[self.state.i as usize];
            self.state.i = (self.state.i + 1) % self.key.len() as u8;
            self.state.j = c;
            *b = p;
        }
    }
}

/// Running header cipher for one side of a client-facing link.
///
/// `server()` and `client()` differ only in which direction uses the 4-byte
/// and which the 6-byte count; the byte transform is identical. The counts
/// are shorter than the full 5-byte frame header on one side and longer on
/// the other — that asymmetry is part of the observed wire format and is
/// preserved as-is. [`split`](Self::split) separates the directions when the
/// link's reader and writer live on different tasks.
pub struct HeaderCrypt {
    enc: HeaderEncrypt,
    dec: HeaderDecrypt,
}

impl HeaderCrypt {
    /// Server-side state: encrypts 4 outbound bytes, decrypts 6 inbound.
    pub fn server(secret: &[u8]) -> Self {
        Self::with_lens(secret, SERVER_ENCRYPT_LEN, SERVER_DECRYPT_LEN)
    }

    /// Client-side mirror: encrypts 6 outbound bytes, decrypts 4 inbound.
    pub fn client(secret: &[u8]) -> Self {
        Self::with_lens(secret, SERVER_DECRYPT_LEN, SERVER_ENCRYPT_LEN)
    }

    fn with_lens(secret: &[u8], send_len: usize, recv_len: usize) -> Self {
        let key = derive_header_key(secret);
        Self {
            enc: HeaderEncrypt {
                key,
                len: send_len,
                state: CipherState::default(),
            },
            dec: HeaderDecrypt {
                key,
                len: recv_len,
                state: CipherState::default(),
            },
        }
    }

    pub fn split(self) -> (HeaderEncrypt, HeaderDecrypt) {
        (self.enc, self.dec)
    }

    pub fn encrypt(&mut self, frame: &mut [u8]) {
        self.enc.encrypt(frame);
    }

    pub fn decrypt(&mut self, frame: &mut [u8]) {
        self.dec.decrypt(frame);
    }

    pub fn encrypt_chunk(&mut self, chunk: &mut [u8], offset: usize) {
        self.enc.encrypt_chunk(chunk, offset);
    }

    pub fn decrypt_chunk(&mut self, chunk: &mut [u8], offset: usize) {
        self.dec.decrypt_chunk(chunk, offset);
    }
}

// ── SRP-style account key material ───────────────────────────────────────────

/// Byte length of a session key.
pub const SESSION_KEY_LEN: usize = 40;

/// Byte length of an account salt.
pub const SALT_LEN: usize = 32;

/// Generate a fresh random account salt.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Generate a fresh random session key.
pub fn generate_session_key() -> Vec<u8> {
    let mut key = vec![0u8; SESSION_KEY_LEN];
    rand::rng().fill_bytes(&mut key);
    key
}

/// SRP-style verifier over `(salt, NAME:PASSWORD)`. The account name is
/// upper-cased first so lookups are case-insensitive end to end.
pub fn compute_verifier(salt: &[u8], account_name: &str, password: &str) -> Vec<u8> {
    let identity = {
        let mut h = Sha1::new();
        h.update(format!("{}:{}", account_name.to_uppercase(), password.to_uppercase()));
        h.finalize()
    };
    let mut h = Sha1::new();
    h.update(salt);
    h.update(identity);
    h.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_key_is_deterministic() {
        let a = derive_header_key(b"shared-secret");
        let b = derive_header_key(b"shared-secret");
        assert_eq!(a, b);
        assert_ne!(a, derive_header_key(b"other-secret"));
    }

    #[test]
    fn test_encrypt_touches_exact_byte_counts() {
        let mut server = HeaderCrypt::server(b"k");
        let original = [0xAA, 0x00, 0x01, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF];

        let mut out = original;
        server.encrypt(&mut out);
        // First 4 bytes transformed, the rest untouched.
        assert_ne!(&out[..4], &original[..4]);
        assert_eq!(&out[4..], &original[4..]);

        let mut inbound = original;
        server.decrypt(&mut inbound);
        assert_eq!(&inbound[6..], &original[6..]);
    }

    #[test]
    fn test_paired_state_roundtrip_many_packets() {
        let secret = b"srp-verifier-material";
        let mut server = HeaderCrypt::server(secret);
        let mut client = HeaderCrypt::client(secret);

        // Server→client direction across a long packet sequence: the running
        // state must stay converged for every packet, not just the first.
        for n in 0u32..200 {
            let original: Vec<u8> = (0..9).map(|k| (n as u8).wrapping_mul(7).wrapping_add(k)).collect();
            let mut wire = original.clone();
            server.encrypt(&mut wire);
            client.decrypt(&mut wire);
            assert_eq!(wire, original, "diverged at packet {}", n);
        }

        // Client→server direction, interleaved after the burst above.
        for n in 0u32..200 {
            let original: Vec<u8> = (0..9).map(|k| (n as u8).wrapping_add(k * 3)).collect();
            let mut wire = original.clone();
            client.encrypt(&mut wire);
            server.decrypt(&mut wire);
            assert_eq!(wire, original, "diverged at packet {}", n);
        }
    }

    #[test]
    fn test_cipher_state_depends_on_history() {
        let mut a = HeaderCrypt::server(b"k");
        let mut b = HeaderCrypt::server(b"k");

        let mut first = [0x11u8, 0x22, 0x33, 0x44];
        a.encrypt(&mut first);

        // Same plaintext encrypts differently once the state has advanced.
        let mut again = [0x11u8, 0x22, 0x33, 0x44];
        a.encrypt(&mut again);
        let mut fresh = [0x11u8, 0x22, 0x33, 0x44];
        b.encrypt(&mut fresh);
        assert_eq!(fresh, first);
        assert_ne!(again, first);
    }

    #[test]
    fn test_short_frame_clips_at_len() {
        let mut server = HeaderCrypt::server(b"k");
        let mut tiny = [0x7Fu8; 2];
        server.encrypt(&mut tiny);

        let mut client = HeaderCrypt::client(b"k");
        client.decrypt(&mut tiny);
        assert_eq!(tiny, [0x7F; 2]);
    }

    #[test]
    fn test_chunked_decrypt_matches_whole_frame() {
        let secret = b"chunk-secret";
        let mut client = HeaderCrypt::client(secret);
        let mut server_whole = HeaderCrypt::server(secret);
        let mut server_split = HeaderCrypt::server(secret);

        for round in 0u8..20 {
            let original: Vec<u8> = (0..12).map(|k| round.wrapping_add(k)).collect();
            let mut wire = original.clone();
            client.encrypt(&mut wire);

            let mut whole = wire.clone();
            server_whole.decrypt(&mut whole);

            // Header first, payload later — the way the realm reads frames.
            let mut split = wire.clone();
            let (head, tail) = split.split_at_mut(5);
            server_split.decrypt_chunk(head, 0);
            server_split.decrypt_chunk(tail, 5);

            assert_eq!(split, whole);
            assert_eq!(split, original);
        }
    }

    #[test]
    fn test_verifier_is_stable_and_case_insensitive() {
        let salt = [5u8; SALT_LEN];
        let v1 = compute_verifier(&salt, "alice", "secret");
        let v2 = compute_verifier(&salt, "ALICE", "SECRET");
        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 20);
        assert_ne!(v1, compute_verifier(&salt, "alice", "other"));
    }

    #[test]
    fn test_key_material_lengths() {
        assert_eq!(generate_salt().len(), SALT_LEN);
        assert_eq!(generate_session_key().len(), SESSION_KEY_LEN);
        assert_ne!(generate_session_key(), generate_session_key());
    }
}
