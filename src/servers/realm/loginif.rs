//! Realm-side link to the login node.
//!
//! One connector, re-registering with the same credentials on every
//! `Connected`. A non-success registration is only logged — the next
//! reconnect cycle resends the credentials; there is no tight retry loop.
//! Player-login replies correlate back to waiting client tasks purely by
//! account name through the pending table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::{LoginReply, RealmState};
use crate::network::connector::{Connector, LinkEvent};
use crate::network::Packet;
use crate::proto::{
    LoginResult, LoginResultMsg, PlayerLoginFailure, PlayerLoginRequest, PlayerLoginSuccess,
    RealmLogin, MSG_LOGIN_RESULT, MSG_PLAYER_LOGIN_FAILURE, MSG_PLAYER_LOGIN_SUCCESS,
};

/// How long a client task waits for the login node's validation reply.
pub const LOGIN_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run_login_link(state: Arc<RealmState>, target: String, delay: Duration) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = Connector::spawn_with_delay(Arc::clone(&state.timer), target, tx, delay);
    {
        let mut guard = state.login_link.lock().await;
        *guard = Some(link.clone());
    }

    while let Some(event) = rx.recv().await {
        match event {
            LinkEvent::Connected => {
                let logon = RealmLogin {
                    internal_name: state.config.realm_name.clone(),
                    password: state.config.realm_pw.clone(),
                };
                match logon.encode() {
                    Ok(frame) => {
                        link.send(frame).await;
                    }
                    Err(e) => tracing::error!("[realm] [realm_login_encode] err={}", e),
                }
            }
            LinkEvent::Packet(pkt) => dispatch_login_packet(&state, &pkt).await,
            LinkEvent::ConnectFailed => {
                fail_pending(&state, "connect_failed").await;
            }
            LinkEvent::Lost => {
                {
                    let mut realm_id = state.realm_id.lock().await;
                    *realm_id = None;
                }
                fail_pending(&state, "link_lost").await;
            }
            LinkEvent::Malformed => {
                tracing::error!("[realm] [login_link_malformed] tearing down");
                {
                    let mut realm_id = state.realm_id.lock().await;
                    *realm_id = None;
                }
                fail_pending(&state, "malformed").await;
            }
        }
    }
}

async fn dispatch_login_packet(state: &Arc<RealmState>, pkt: &Packet) {
    match pkt.id {
        MSG_LOGIN_RESULT => match LoginResultMsg::decode(&mut pkt.reader()) {
            Ok(msg) if msg.result == LoginResult::Success => {
                tracing::info!("[realm] [registered] id={}", msg.realm_id);
                let mut realm_id = state.realm_id.lock().await;
                *realm_id = Some(msg.realm_id);
            }
            Ok(msg) => {
                // No retry here: the connector's next reconnect cycle will
                // resend the same credentials.
                tracing::warn!("[realm] [register_rejected] result={:?}", msg.result);
            }
            Err(e) => tracing::warn!("[realm] [bad_login_result] err={}", e),
        },
        MSG_PLAYER_LOGIN_SUCCESS => match PlayerLoginSuccess::decode(&mut pkt.reader()) {
            Ok(msg) => {
                let name = msg.account_name.clone();
                resolve_pending(state, &name, LoginReply::Success(Box::new(msg))).await;
            }
            Err(e) => tracing::warn!("[realm] [bad_player_login_success] err={}", e),
        },
        MSG_PLAYER_LOGIN_FAILURE => match PlayerLoginFailure::decode(&mut pkt.reader()) {
            Ok(msg) => {
                resolve_pending(state, &msg.account_name, LoginReply::Failure(msg.reason)).await
            }
            Err(e) => tracing::warn!("[realm] [bad_player_login_failure] err={}", e),
        },
        other => tracing::warn!("[realm] [login_unknown_cmd] id={:04X}", other),
    }
}

async fn resolve_pending(state: &Arc<RealmState>, account_name: &str, reply: LoginReply) {
    let waiter = {
        let mut pending = state.pending.lock().await;
        pending.resolve(account_name)
    };
    match waiter {
        Some((_, tx)) => {
            let _ = tx.send(reply);
        }
        None => tracing::warn!(
            "[realm] [login_reply_unmatched] account={}",
            account_name
        ),
    }
}

/// Fail every in-flight request visibly; the table must not keep orphans
/// across a link transition.
async fn fail_pending(state: &Arc<RealmState>, cause: &str) {
    let drained = {
        let mut pending = state.pending.lock().await;
        pending.drain()
    };
    if !drained.is_empty() {
        tracing::warn!("[realm] [pending_dropped] cause={} count={}", cause, drained.len());
    }
    for (_, tx) in drained {
        let _ = tx.send(LoginReply::LinkDown);
    }
}

/// Submit one player-login request and wait for its terminal outcome.
/// Exactly one of the [`LoginReply`] variants comes back — duplicates are
/// rejected synchronously, a dead link fails fast, a timeout clears the
/// pending entry before reporting.
pub async fn request_player_login(state: &Arc<RealmState>, account_name: &str) -> LoginReply {
    let (tx, rx) = oneshot::channel();
    {
        let mut pending = state.pending.lock().await;
        if pending.submit(account_name, tx).is_err() {
            return LoginReply::Duplicate;
        }
    }

    let sent = {
        let link = state.login_link.lock().await;
        match link.as_ref() {
            Some(link) => {
                let req = PlayerLoginRequest {
                    account_name: account_name.to_string(),
                };
                match req.encode() {
                    Ok(frame) => link.send(frame).await,
                    Err(_) => false,
                }
            }
            None => false,
        }
    };
    if !sent {
        let mut pending = state.pending.lock().await;
        pending.resolve(account_name);
        return LoginReply::LinkDown;
    }

    match tokio::time::timeout(LOGIN_REPLY_TIMEOUT, rx).await {
        Ok(Ok(reply)) => reply,
        _ => {
            let mut pending = state.pending.lock().await;
            pending.resolve(account_name);
            LoginReply::LinkDown
        }
    }
}

/// Best-effort upstream notification (logout, tutorial flags).
pub async fn send_upstream(state: &Arc<RealmState>, frame: Result<Vec<u8>, crate::network::FrameError>) {
    let Ok(frame) = frame else { return };
    let link = state.login_link.lock().await;
    if let Some(link) = link.as_ref() {
        link.send(frame).await;
    }
}
