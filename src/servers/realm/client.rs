//! Client sessions on the realm node.
//!
//! A client authenticates with the account name and the session key it was
//! issued at the login node; the realm validates the pair through a
//! player-login round-trip and only then switches the link into ciphered
//! mode (key material from the same reply). Character login hands the
//! session over to a world node; afterwards the realm only relays opaque
//! proxy frames by guid until the character leaves.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use super::packet::{
    build_auth_result, build_char_login_error, build_char_login_ok, build_proxy,
    build_world_left, AUTH_DUPLICATE, AUTH_OK, AUTH_REJECTED, AUTH_SERVER_ERROR, CMSG_CHAR_LOGIN,
    CMSG_CHAT, CMSG_LOGOUT, CMSG_REALM_AUTH, CMSG_TUTORIAL_FLAGS, MSG_PROXY,
};
use super::{loginif, ClientNotice, ClientRoute, EnterReply, LoginReply, RealmState};
use crate::network::crypt::{HeaderCrypt, HeaderDecrypt};
use crate::network::{read_frame, FrameError, Packet, FRAME_HEADER_LEN, FRAME_MARKER};
use crate::proto::snapshot::{self, CharacterSnapshot, NAME_LEN};
use crate::proto::{
    CharacterLogIn, ChatMessage, ClientProxyPacket, PlayerLogout, TutorialData, WorldEnterError,
    WorldInstanceLeft, WorldLeftReason,
};

/// How long a client task waits for the world's hand-off reply.
const ENTER_REPLY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub async fn listen(state: Arc<RealmState>, listener: TcpListener) -> Result<()> {
    tracing::info!(
        "[realm] [client_listener_ready] addr={:?}",
        listener.local_addr().ok()
    );
    loop {
        let (stream, _peer) = listener.accept().await?;
        let s = Arc::clone(&state);
        tokio::spawn(async move {
            handle_client(s, stream).await;
        });
    }
}

struct ClientSession {
    account_name: String,
    account_id: u32,
    guid: Option<u64>,
    world_idx: Option<usize>,
    /// Ciphered frames queue to the writer task.
    out: mpsc::Sender<Vec<u8>>,
}

impl ClientSession {
    async fn reply(&self, frame: Result<Vec<u8>, FrameError>) {
        if let Ok(frame) = frame {
            let _ = self.out.send(frame).await;
        }
    }
}

async fn handle_client(state: Arc<RealmState>, stream: TcpStream) {
    let (mut rh, mut wh) = stream.into_split();

    // Phase 1 (cleartext): account auth against login-issued key material.
    let first = match read_frame(&mut rh).await {
        Ok(p) => p,
        Err(_) => return,
    };
    if first.id != CMSG_REALM_AUTH {
        tracing::warn!("[realm] [client_bad_first_frame] id={:04X}", first.id);
        return;
    }
    let (account_name, provided_key) = {
        let mut r = first.reader();
        let name = match r.read_str() {
            Ok(n) => n.to_string(),
            Err(_) => return,
        };
        let key = match r.read_u8().and_then(|n| r.read_bytes(n as usize)) {
            Ok(k) => k.to_vec(),
            Err(_) => return,
        };
        (name, key)
    };

    let success = match loginif::request_player_login(&state, &account_name).await {
        LoginReply::Success(s) => s,
        LoginReply::Duplicate => {
            tracing::info!("[realm] [auth_duplicate] account={}", account_name);
            write_plain(&mut wh, build_auth_result(AUTH_DUPLICATE)).await;
            return;
        }
        LoginReply::Failure(reason) => {
            tracing::info!(
                "[realm] [auth_rejected] account={} reason={:?}",
                account_name,
                reason
            );
            write_plain(&mut wh, build_auth_result(AUTH_REJECTED)).await;
            return;
        }
        LoginReply::LinkDown => {
            write_plain(&mut wh, build_auth_result(AUTH_SERVER_ERROR)).await;
            return;
        }
    };

    if success.session_key != provided_key {
        tracing::warn!("[realm] [auth_key_mismatch] account={}", account_name);
        // The validation attached us at the login node; undo it.
        let logout = PlayerLogout {
            account_name: account_name.clone(),
        };
        loginif::send_upstream(&state, logout.encode()).await;
        write_plain(&mut wh, build_auth_result(AUTH_REJECTED)).await;
        return;
    }

    write_plain(&mut wh, build_auth_result(AUTH_OK)).await;
    tracing::info!("[realm] [client_auth_ok] account={}", account_name);

    // Phase 2: header cipher active, keyed off the SRP verifier. The writer
    // task owns the sending half; this task keeps the receiving half.
    let (mut enc, mut dec) = HeaderCrypt::server(&success.srp_verifier).split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);
    let writer = tokio::spawn(async move {
        while let Some(mut frame) = out_rx.recv().await {
            enc.encrypt(&mut frame);
            if wh.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    // Reader task: frame reads must not race notice delivery (a partial
    // read_exact cancelled mid-frame would desync the cipher).
    let (pkt_tx, mut pkt_rx) = mpsc::channel::<Packet>(64);
    let reader = tokio::spawn(async move {
        loop {
            match read_ciphered_frame(&mut rh, &mut dec).await {
                Ok(pkt) => {
                    if pkt_tx.send(pkt).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("[realm] [client_read_end] err={}", e);
                    break;
                }
            }
        }
    });

    let (notice_tx, mut notice_rx) = mpsc::channel::<ClientNotice>(64);
    let mut session = ClientSession {
        account_name,
        account_id: success.account_id,
        guid: None,
        world_idx: None,
        out: out_tx,
    };

    let leave_reason = loop {
        tokio::select! {
            pkt = pkt_rx.recv() => {
                match pkt {
                    Some(pkt) => {
                        if !dispatch_client_packet(&state, &mut session, &notice_tx, &pkt).await {
                            break WorldLeftReason::Logout;
                        }
                    }
                    None => break WorldLeftReason::LinkLost,
                }
            }
            notice = notice_rx.recv() => {
                match notice {
                    Some(ClientNotice::Proxy(payload)) => {
                        session.reply(build_proxy(&payload)).await;
                    }
                    Some(ClientNotice::Left(reason)) => {
                        session.reply(build_world_left(reason)).await;
                        // The route is already gone on the sender's side.
                        session.guid = None;
                        session.world_idx = None;
                    }
                    None => break WorldLeftReason::LinkLost,
                }
            }
        }
    };

    teardown(&state, &session, leave_reason).await;
    reader.abort();
    writer.abort();
}

/// Returns false when the session should end (clean logout).
async fn dispatch_client_packet(
    state: &Arc<RealmState>,
    session: &mut ClientSession,
    notice_tx: &mpsc::Sender<ClientNotice>,
    pkt: &Packet,
) -> bool {
    match pkt.id {
        CMSG_CHAR_LOGIN => {
            dispatch_char_login(state, session, notice_tx, pkt).await;
            true
        }
        MSG_PROXY => {
            if let (Some(guid), Some(idx)) = (session.guid, session.world_idx) {
                let proxy = ClientProxyPacket {
                    character_guid: guid,
                    payload: pkt.payload.to_vec(),
                };
                if let Ok(frame) = proxy.encode() {
                    state.send_to_world(idx, frame).await;
                }
            }
            true
        }
        CMSG_CHAT => {
            let mut r = pkt.reader();
            if let (Ok(text), Some(guid), Some(idx)) =
                (r.read_str(), session.guid, session.world_idx)
            {
                let chat = ChatMessage {
                    character_guid: guid,
                    text: text.to_string(),
                };
                if let Ok(frame) = chat.encode() {
                    state.send_to_world(idx, frame).await;
                }
            }
            true
        }
        CMSG_TUTORIAL_FLAGS => {
            let mut r = pkt.reader();
            let mut flags = [0u32; 8];
            for f in flags.iter_mut() {
                match r.read_u32() {
                    Ok(v) => *f = v,
                    Err(_) => return true,
                }
            }
            let data = TutorialData {
                account_id: session.account_id,
                flags,
            };
            loginif::send_upstream(state, data.encode()).await;
            true
        }
        CMSG_LOGOUT => false,
        other => {
            tracing::warn!("[realm] [client_unknown_cmd] id={:04X}", other);
            true
        }
    }
}

struct CharLoginRequest {
    guid: u64,
    char_name: String,
    map_id: u16,
    x: f32,
    y: f32,
    z: f32,
    o: f32,
    level: u32,
    health: u32,
    power: u32,
}

impl CharLoginRequest {
    fn decode(pkt: &Packet) -> Result<Self, FrameError> {
        let mut r = pkt.reader();
        Ok(Self {
            guid: r.read_u64()?,
            char_name: r.read_str()?.to_string(),
            map_id: r.read_u16()?,
            x: r.read_f32()?,
            y: r.read_f32()?,
            z: r.read_f32()?,
            o: r.read_f32()?,
            level: r.read_u32()?,
            health: r.read_u32()?,
            power: r.read_u32()?,
        })
    }
}

async fn dispatch_char_login(
    state: &Arc<RealmState>,
    session: &mut ClientSession,
    notice_tx: &mpsc::Sender<ClientNotice>,
    pkt: &Packet,
) {
    let Ok(req) = CharLoginRequest::decode(pkt) else {
        return;
    };
    let guid = req.guid;

    let Some(world_idx) = state.select_world_for_map(req.map_id).await else {
        tracing::info!("[realm] [char_login_no_world] map={}", req.map_id);
        session
            .reply(build_char_login_error(WorldEnterError::UnsupportedMap))
            .await;
        return;
    };

    let mut snap = CharacterSnapshot {
        guid,
        account_id: session.account_id,
        level: req.level,
        map_id: req.map_id,
        zone_id: 0,
        x: req.x,
        y: req.y,
        z: req.z,
        o: req.o,
        health: req.health,
        max_health: req.health,
        power: req.power,
        max_power: req.power,
        name: [0; NAME_LEN],
        _pad0: [0; 4],
    };
    snap.set_name(&req.char_name);

    let handoff = CharacterLogIn {
        requester_id: guid,
        snapshot_z: snapshot::compress(&snap),
    };

    // Install the route before the hand-off: the world starts pushing
    // visibility frames for this guid the moment it answers, and those must
    // not race the reply. Every failure path below removes it again.
    {
        let mut routes = state.routes.lock().await;
        if routes.contains_key(&guid) {
            tracing::warn!("[realm] [char_login_guid_busy] guid={:#x}", guid);
            drop(routes);
            session
                .reply(build_char_login_error(WorldEnterError::InternalError))
                .await;
            return;
        }
        routes.insert(
            guid,
            ClientRoute {
                world_idx,
                account_name: session.account_name.clone(),
                tx: notice_tx.clone(),
            },
        );
    }

    let (tx, rx) = oneshot::channel();
    {
        let mut waiters = state.enter_waiters.lock().await;
        waiters.insert(guid, (world_idx, tx));
    }
    let sent = match handoff.encode() {
        Ok(frame) => state.send_to_world(world_idx, frame).await,
        Err(_) => false,
    };
    if !sent {
        {
            let mut waiters = state.enter_waiters.lock().await;
            waiters.remove(&guid);
        }
        let mut routes = state.routes.lock().await;
        routes.remove(&guid);
        drop(routes);
        session
            .reply(build_char_login_error(WorldEnterError::InternalError))
            .await;
        return;
    }

    let reply = match tokio::time::timeout(ENTER_REPLY_TIMEOUT, rx).await {
        Ok(Ok(reply)) => reply,
        _ => {
            let mut waiters = state.enter_waiters.lock().await;
            waiters.remove(&guid);
            EnterReply::LinkDown
        }
    };

    match reply {
        EnterReply::Entered(entered) => {
            session.guid = Some(guid);
            session.world_idx = Some(world_idx);
            tracing::info!(
                "[realm] [char_login_ok] guid={:#x} instance={} map={}",
                guid,
                entered.instance_id,
                entered.map_id
            );
            session.reply(build_char_login_ok(&entered)).await;
        }
        EnterReply::Error(e) => {
            tracing::info!("[realm] [char_login_refused] guid={:#x} err={:?}", guid, e);
            let mut routes = state.routes.lock().await;
            routes.remove(&guid);
            drop(routes);
            session.reply(build_char_login_error(e)).await;
        }
        EnterReply::LinkDown => {
            let mut routes = state.routes.lock().await;
            routes.remove(&guid);
            drop(routes);
            session
                .reply(build_char_login_error(WorldEnterError::InternalError))
                .await;
        }
    }
}

/// Release everything the session holds: its world placement, its route,
/// and its attachment at the login node.
async fn teardown(state: &Arc<RealmState>, session: &ClientSession, reason: WorldLeftReason) {
    if let (Some(guid), Some(idx)) = (session.guid, session.world_idx) {
        {
            let mut routes = state.routes.lock().await;
            routes.remove(&guid);
        }
        let left = WorldInstanceLeft {
            character_guid: guid,
            reason,
        };
        if let Ok(frame) = left.encode() {
            state.send_to_world(idx, frame).await;
        }
    }
    let logout = PlayerLogout {
        account_name: session.account_name.clone(),
    };
    loginif::send_upstream(state, logout.encode()).await;
    tracing::info!(
        "[realm] [client_teardown] account={} reason={:?}",
        session.account_name,
        reason
    );
}

/// Read one frame whose leading bytes are ciphered: decrypt the header,
/// trust the length only afterwards, then decrypt the payload's share of
/// the per-frame quota.
async fn read_ciphered_frame(
    rh: &mut OwnedReadHalf,
    dec: &mut HeaderDecrypt,
) -> Result<Packet> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    rh.read_exact(&mut header).await?;
    dec.decrypt_chunk(&mut header, 0);
    if header[0] != FRAME_MARKER {
        return Err(FrameError::BadMarker { got: header[0] }.into());
    }
    let id = u16::from_be_bytes([header[1], header[2]]);
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    rh.read_exact(&mut payload).await?;
    dec.decrypt_chunk(&mut payload, FRAME_HEADER_LEN);
    Ok(Packet::new(id, payload))
}

async fn write_plain(wh: &mut OwnedWriteHalf, frame: Result<Vec<u8>, FrameError>) -> bool {
    let Ok(frame) = frame else { return false };
    wh.write_all(&frame).await.is_ok()
}
