//! Realm uplink handling on the login node.
//!
//! A realm's first frame is its [`RealmLogin`]; anything but `Success` is
//! answered and the link dropped — the realm's connector will come back on
//! its own reconnect cycle with the same credentials. After registration the
//! link carries player-login validation and tutorial persistence until it
//! drops, at which point every attachment the realm held is released.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::{db, LoginState, RealmLink};
use crate::network::{read_frame, Packet};
use crate::proto::{
    LoginResult, LoginResultMsg, PlayerLoginFailReason, PlayerLoginFailure, PlayerLoginRequest,
    PlayerLoginSuccess, PlayerLogout, RealmLogin, TutorialData, MSG_PLAYER_LOGIN_REQUEST,
    MSG_PLAYER_LOGOUT, MSG_TUTORIAL_DATA,
};
use crate::session::{RealmId, SessionError};

pub async fn promote_to_realm(
    state: Arc<LoginState>,
    mut rh: OwnedReadHalf,
    mut wh: OwnedWriteHalf,
    first: Packet,
) {
    let logon = match RealmLogin::decode(&mut first.reader()) {
        Ok(m) => m,
        Err(_) => return,
    };

    let reject = |result| LoginResultMsg { result, realm_id: 0 };

    let Some(idx) = state
        .realm_directory
        .iter()
        .position(|e| e.internal_name == logon.internal_name)
    else {
        tracing::warn!("[login] [realm_unknown] name={}", logon.internal_name);
        if let Ok(frame) = reject(LoginResult::UnknownRealm).encode() {
            let _ = wh.write_all(&frame).await;
        }
        return;
    };

    if state.realm_directory[idx].password != logon.password {
        tracing::warn!("[login] [realm_wrong_password] name={}", logon.internal_name);
        if let Ok(frame) = reject(LoginResult::WrongPassword).encode() {
            let _ = wh.write_all(&frame).await;
        }
        return;
    }

    let realm_id = idx as RealmId;
    {
        let mut realms = state.realms.lock().await;
        if realms.contains_key(&realm_id) {
            tracing::warn!("[login] [realm_double_login] name={}", logon.internal_name);
            drop(realms);
            if let Ok(frame) = reject(LoginResult::AlreadyLoggedIn).encode() {
                let _ = wh.write_all(&frame).await;
            }
            return;
        }
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        realms.insert(
            realm_id,
            RealmLink {
                internal_name: logon.internal_name.clone(),
                tx,
            },
        );
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if wh.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });
    }

    let accepted = LoginResultMsg {
        result: LoginResult::Success,
        realm_id,
    };
    send_to_realm(&state, realm_id, accepted.encode().ok()).await;
    tracing::info!(
        "[login] [realm_connect] name={} id={}",
        logon.internal_name,
        realm_id
    );

    // Frame loop. Any framing error is a protocol violation: drop the link.
    loop {
        let pkt = match read_frame(&mut rh).await {
            Ok(p) => p,
            Err(_) => break,
        };
        dispatch_realm_packet(&state, realm_id, &pkt).await;
    }

    // Teardown: release the registration and every attachment it held.
    {
        let mut realms = state.realms.lock().await;
        realms.remove(&realm_id);
    }
    let released = {
        let mut sessions = state.sessions.lock().await;
        sessions.detach_realm(realm_id)
    };
    tracing::info!(
        "[login] [realm_disconnect] name={} id={} released={}",
        logon.internal_name,
        realm_id,
        released.len()
    );
}

async fn dispatch_realm_packet(state: &Arc<LoginState>, realm_id: RealmId, pkt: &Packet) {
    match pkt.id {
        MSG_PLAYER_LOGIN_REQUEST => match PlayerLoginRequest::decode(&mut pkt.reader()) {
            Ok(req) => handle_player_login(state, realm_id, req).await,
            Err(e) => tracing::warn!("[login] [bad_player_login_request] err={}", e),
        },
        MSG_TUTORIAL_DATA => match TutorialData::decode(&mut pkt.reader()) {
            Ok(data) => handle_tutorial_data(state, data).await,
            Err(e) => tracing::warn!("[login] [bad_tutorial_data] err={}", e),
        },
        MSG_PLAYER_LOGOUT => match PlayerLogout::decode(&mut pkt.reader()) {
            Ok(msg) => {
                let mut sessions = state.sessions.lock().await;
                sessions.detach(&msg.account_name);
                tracing::debug!("[login] [player_logout] account={}", msg.account_name);
            }
            Err(e) => tracing::warn!("[login] [bad_player_logout] err={}", e),
        },
        other => tracing::warn!("[login] [realm_unknown_cmd] id={:04X}", other),
    }
}

/// Validate one player-login request and answer with the session's key
/// material or a typed failure. The reply correlates by account name only.
async fn handle_player_login(state: &Arc<LoginState>, realm_id: RealmId, req: PlayerLoginRequest) {
    let reply = {
        let mut sessions = state.sessions.lock().await;
        match sessions.attach(&req.account_name, realm_id) {
            Ok(()) => {
                let session = sessions
                    .get(&req.account_name)
                    .expect("attached session exists");
                Ok(PlayerLoginSuccess {
                    account_name: session.account_name.clone(),
                    account_id: session.account_id,
                    session_key: session.session_key.clone(),
                    srp_verifier: session.srp_verifier.clone(),
                    srp_salt: session.srp_salt.clone(),
                    tutorial_flags: session.tutorial_flags,
                })
            }
            Err(SessionError::SessionNotFound(_)) => Err(PlayerLoginFailReason::NoSession),
            Err(SessionError::AlreadyAttached { .. }) => Err(PlayerLoginFailReason::AlreadyOnline),
            Err(_) => Err(PlayerLoginFailReason::ServerError),
        }
    };

    let frame = match reply {
        Ok(success) => {
            tracing::info!(
                "[login] [player_login_ok] account={} realm={}",
                req.account_name,
                realm_id
            );
            success.encode()
        }
        Err(reason) => {
            tracing::info!(
                "[login] [player_login_fail] account={} reason={:?}",
                req.account_name,
                reason
            );
            PlayerLoginFailure {
                account_name: req.account_name.clone(),
                reason,
            }
            .encode()
        }
    };
    send_to_realm(state, realm_id, frame.ok()).await;
}

async fn handle_tutorial_data(state: &Arc<LoginState>, data: TutorialData) {
    {
        let mut sessions = state.sessions.lock().await;
        if let Some(session) = sessions
            .get_mut_by_id(data.account_id)
        {
            session.tutorial_flags = data.flags;
        }
    }
    if let Some(pool) = &state.db {
        db::save_tutorial_flags(pool, data.account_id, &data.flags).await;
    }
}

async fn send_to_realm(state: &Arc<LoginState>, realm_id: RealmId, frame: Option<Vec<u8>>) {
    let Some(frame) = frame else { return };
    let realms = state.realms.lock().await;
    if let Some(link) = realms.get(&realm_id) {
        let _ = link.tx.send(frame).await;
    }
}
