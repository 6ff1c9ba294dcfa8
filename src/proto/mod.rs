//! Inter-node message catalog.
//!
//! Packet-id blocks mirror the link they travel on: `0x20xx` realm→login,
//! `0x28xx` login→realm, `0x30xx` uplink traffic on the world↔realm link,
//! `0x38xx` answers on it. Result and reason enumerations are wire-stable:
//! the discriminants are part of the cross-version protocol and must never
//! be renumbered.

pub mod snapshot;

use crate::network::{FrameError, PacketReader, PacketWriter};
use crate::session::RealmId;

// realm → login
pub const MSG_REALM_LOGIN: u16 = 0x2000;
pub const MSG_PLAYER_LOGIN_REQUEST: u16 = 0x2001;
pub const MSG_TUTORIAL_DATA: u16 = 0x2002;
pub const MSG_PLAYER_LOGOUT: u16 = 0x2003;

// login → realm
pub const MSG_LOGIN_RESULT: u16 = 0x2800;
pub const MSG_PLAYER_LOGIN_SUCCESS: u16 = 0x2801;
pub const MSG_PLAYER_LOGIN_FAILURE: u16 = 0x2802;

// world ↔ realm
pub const MSG_WORLD_LOGIN: u16 = 0x3000;
pub const MSG_CHARACTER_LOGIN: u16 = 0x3001;
pub const MSG_CLIENT_PROXY: u16 = 0x3002;
pub const MSG_CHAT_MESSAGE: u16 = 0x3003;
pub const MSG_WORLD_LEFT: u16 = 0x3004;
pub const MSG_WORLD_LOGIN_ANSWER: u16 = 0x3800;
pub const MSG_WORLD_ENTERED: u16 = 0x3801;
pub const MSG_WORLD_ENTER_ERROR: u16 = 0x3802;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("invalid {field} value {value}")]
    BadEnum { field: &'static str, value: u8 },
}

/// Outcome of a realm (or world) registering itself upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginResult {
    Success = 0,
    UnknownRealm = 1,
    WrongPassword = 2,
    AlreadyLoggedIn = 3,
    ServerError = 4,
}

impl LoginResult {
    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        Ok(match v {
            0 => Self::Success,
            1 => Self::UnknownRealm,
            2 => Self::WrongPassword,
            3 => Self::AlreadyLoggedIn,
            4 => Self::ServerError,
            _ => {
                return Err(ProtoError::BadEnum {
                    field: "login_result",
                    value: v,
                })
            }
        })
    }
}

/// Why a player-login request failed at the login node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerLoginFailReason {
    NoSession = 0,
    AlreadyOnline = 1,
    ServerError = 2,
}

impl PlayerLoginFailReason {
    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        Ok(match v {
            0 => Self::NoSession,
            1 => Self::AlreadyOnline,
            2 => Self::ServerError,
            _ => {
                return Err(ProtoError::BadEnum {
                    field: "fail_reason",
                    value: v,
                })
            }
        })
    }
}

/// Why a world hand-off was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorldEnterError {
    UnsupportedMap = 0,
    MapsAlreadyInUse = 1,
    InternalError = 2,
}

impl WorldEnterError {
    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        Ok(match v {
            0 => Self::UnsupportedMap,
            1 => Self::MapsAlreadyInUse,
            2 => Self::InternalError,
            _ => {
                return Err(ProtoError::BadEnum {
                    field: "enter_error",
                    value: v,
                })
            }
        })
    }
}

/// Why a character left its world instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorldLeftReason {
    Logout = 0,
    LinkLost = 1,
    Kicked = 2,
}

impl WorldLeftReason {
    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        Ok(match v {
            0 => Self::Logout,
            1 => Self::LinkLost,
            2 => Self::Kicked,
            _ => {
                return Err(ProtoError::BadEnum {
                    field: "left_reason",
                    value: v,
                })
            }
        })
    }
}

fn read_key(r: &mut PacketReader<'_>) -> Result<Vec<u8>, ProtoError> {
    let n = r.read_u8()? as usize;
    Ok(r.read_bytes(n)?.to_vec())
}

fn write_key(w: &mut PacketWriter, key: &[u8]) {
    let n = key.len().min(u8::MAX as usize);
    w.write_u8(n as u8);
    w.write_bytes(&key[..n]);
}

// ── realm → login ────────────────────────────────────────────────────────────

/// Realm authenticates itself to the login node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmLogin {
    pub internal_name: String,
    pub password: String,
}

impl RealmLogin {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_REALM_LOGIN);
        w.write_str(&self.internal_name);
        w.write_str(&self.password);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            internal_name: r.read_str()?.to_string(),
            password: r.read_str()?.to_string(),
        })
    }
}

/// Realm asks the login node to validate an account for character login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLoginRequest {
    pub account_name: String,
}

impl PlayerLoginRequest {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_PLAYER_LOGIN_REQUEST);
        w.write_str(&self.account_name);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            account_name: r.read_str()?.to_string(),
        })
    }
}

/// Realm persists the client's tutorial bitfield with the account session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorialData {
    pub account_id: u32,
    pub flags: [u32; 8],
}

impl TutorialData {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_TUTORIAL_DATA);
        w.write_u32(self.account_id);
        for f in self.flags {
            w.write_u32(f);
        }
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        let account_id = r.read_u32()?;
        let mut flags = [0u32; 8];
        for f in flags.iter_mut() {
            *f = r.read_u32()?;
        }
        Ok(Self { account_id, flags })
    }
}

/// Realm-side logout: release the account's realm attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLogout {
    pub account_name: String,
}

impl PlayerLogout {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_PLAYER_LOGOUT);
        w.write_str(&self.account_name);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            account_name: r.read_str()?.to_string(),
        })
    }
}

// ── login → realm ────────────────────────────────────────────────────────────

/// Answer to [`RealmLogin`]. Carries the realm id assigned by the login node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResultMsg {
    pub result: LoginResult,
    pub realm_id: RealmId,
}

impl LoginResultMsg {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_LOGIN_RESULT);
        w.write_u8(self.result as u8);
        w.write_u8(self.realm_id);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            result: LoginResult::from_u8(r.read_u8()?)?,
            realm_id: r.read_u8()?,
        })
    }
}

/// Successful player-login validation, correlated by account name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLoginSuccess {
    pub account_name: String,
    pub account_id: u32,
    pub session_key: Vec<u8>,
    pub srp_verifier: Vec<u8>,
    pub srp_salt: Vec<u8>,
    pub tutorial_flags: [u32; 8],
}

impl PlayerLoginSuccess {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_PLAYER_LOGIN_SUCCESS);
        w.write_str(&self.account_name);
        w.write_u32(self.account_id);
        write_key(&mut w, &self.session_key);
        write_key(&mut w, &self.srp_verifier);
        write_key(&mut w, &self.srp_salt);
        for f in self.tutorial_flags {
            w.write_u32(f);
        }
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        let account_name = r.read_str()?.to_string();
        let account_id = r.read_u32()?;
        let session_key = read_key(r)?;
        let srp_verifier = read_key(r)?;
        let srp_salt = read_key(r)?;
        let mut tutorial_flags = [0u32; 8];
        for f in tutorial_flags.iter_mut() {
            *f = r.read_u32()?;
        }
        Ok(Self {
            account_name,
            account_id,
            session_key,
            srp_verifier,
            srp_salt,
            tutorial_flags,
        })
    }
}

/// Failed player-login validation, correlated by account name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLoginFailure {
    pub account_name: String,
    pub reason: PlayerLoginFailReason,
}

impl PlayerLoginFailure {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_PLAYER_LOGIN_FAILURE);
        w.write_str(&self.account_name);
        w.write_u8(self.reason as u8);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            account_name: r.read_str()?.to_string(),
            reason: PlayerLoginFailReason::from_u8(r.read_u8()?)?,
        })
    }
}

// ── world ↔ realm ────────────────────────────────────────────────────────────

/// World node registers on its uplink and advertises the maps it hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldLogin {
    pub hosted_maps: Vec<u16>,
}

impl WorldLogin {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_WORLD_LOGIN);
        w.write_u16(self.hosted_maps.len() as u16);
        for m in &self.hosted_maps {
            w.write_u16(*m);
        }
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        let n = r.read_u16()? as usize;
        let mut hosted_maps = Vec::with_capacity(n);
        for _ in 0..n {
            hosted_maps.push(r.read_u16()?);
        }
        Ok(Self { hosted_maps })
    }
}

/// Realm's answer to [`WorldLogin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldLoginAnswer {
    pub result: LoginResult,
}

impl WorldLoginAnswer {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_WORLD_LOGIN_ANSWER);
        w.write_u8(self.result as u8);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            result: LoginResult::from_u8(r.read_u8()?)?,
        })
    }
}

/// Hand a character over to the world node. The snapshot travels
/// zlib-compressed (see [`snapshot`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterLogIn {
    pub requester_id: u64,
    pub snapshot_z: Vec<u8>,
}

impl CharacterLogIn {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_CHARACTER_LOGIN);
        w.write_u64(self.requester_id);
        w.write_u16(self.snapshot_z.len() as u16);
        w.write_bytes(&self.snapshot_z);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        let requester_id = r.read_u64()?;
        let n = r.read_u16()? as usize;
        Ok(Self {
            requester_id,
            snapshot_z: r.read_bytes(n)?.to_vec(),
        })
    }
}

/// Opaque gameplay traffic relayed for one character, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProxyPacket {
    pub character_guid: u64,
    pub payload: Vec<u8>,
}

impl ClientProxyPacket {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_CLIENT_PROXY);
        w.write_u64(self.character_guid);
        w.write_bytes(&self.payload);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        let character_guid = r.read_u64()?;
        let payload = r.rest().to_vec();
        Ok(Self {
            character_guid,
            payload,
        })
    }
}

/// Chat line spoken by a character, fanned out by the world node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub character_guid: u64,
    pub text: String,
}

impl ChatMessage {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_CHAT_MESSAGE);
        w.write_u64(self.character_guid);
        w.write_str(&self.text);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            character_guid: r.read_u64()?,
            text: r.read_str()?.to_string(),
        })
    }
}

/// Character left (or must leave) its world instance. Realm→world it is a
/// removal request; world→realm it confirms the removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldInstanceLeft {
    pub character_guid: u64,
    pub reason: WorldLeftReason,
}

impl WorldInstanceLeft {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_WORLD_LEFT);
        w.write_u64(self.character_guid);
        w.write_u8(self.reason as u8);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            character_guid: r.read_u64()?,
            reason: WorldLeftReason::from_u8(r.read_u8()?)?,
        })
    }
}

/// Successful hand-off: where the character landed.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldInstanceEntered {
    pub character_guid: u64,
    pub instance_id: u32,
    pub map_id: u16,
    pub zone_id: u16,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub o: f32,
}

impl WorldInstanceEntered {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_WORLD_ENTERED);
        w.write_u64(self.character_guid);
        w.write_u32(self.instance_id);
        w.write_u16(self.map_id);
        w.write_u16(self.zone_id);
        w.write_f32(self.x);
        w.write_f32(self.y);
        w.write_f32(self.z);
        w.write_f32(self.o);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            character_guid: r.read_u64()?,
            instance_id: r.read_u32()?,
            map_id: r.read_u16()?,
            zone_id: r.read_u16()?,
            x: r.read_f32()?,
            y: r.read_f32()?,
            z: r.read_f32()?,
            o: r.read_f32()?,
        })
    }
}

/// Failed hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldInstanceError {
    pub character_guid: u64,
    pub error: WorldEnterError,
}

impl WorldInstanceError {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut w = PacketWriter::new(MSG_WORLD_ENTER_ERROR);
        w.write_u64(self.character_guid);
        w.write_u8(self.error as u8);
        w.finish()
    }

    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            character_guid: r.read_u64()?,
            error: WorldEnterError::from_u8(r.read_u8()?)?,
        })
    }
}
