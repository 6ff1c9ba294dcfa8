//! Client account authentication at the login node.
//!
//! The wire side here is deliberately small: logon with name and password,
//! logout by name. The product is the session side — a successful logon
//! creates the [`AccountSession`](crate::session::AccountSession) whose key
//! material later drives the realm hand-off and the header cipher.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::packet::{
    build_logon_failure, build_logon_ok, CMSG_ACCOUNT_LOGON, CMSG_ACCOUNT_LOGOUT,
    LOGON_BAD_CREDENTIALS, LOGON_SERVER_ERROR,
};
use super::{db, LoginState};
use crate::network::crypt::{compute_verifier, generate_session_key};
use crate::network::{read_frame, Packet};
use crate::session::AccountSession;

pub fn is_valid_account_name(s: &str) -> bool {
    (3..=16).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric())
}

pub async fn handle_client(
    state: Arc<LoginState>,
    mut rh: OwnedReadHalf,
    mut wh: OwnedWriteHalf,
    first: Packet,
    peer: SocketAddr,
) {
    let mut queue = vec![first];

    loop {
        let pkt = match queue.pop() {
            Some(p) => p,
            None => match read_frame(&mut rh).await {
                Ok(p) => p,
                Err(_) => return,
            },
        };

        match pkt.id {
            CMSG_ACCOUNT_LOGON => {
                if !dispatch_logon(&state, &mut wh, &pkt, &peer).await {
                    return;
                }
            }
            CMSG_ACCOUNT_LOGOUT => dispatch_logout(&state, &pkt).await,
            other => {
                tracing::warn!("[login] [client_unknown_cmd] id={:04X} peer={}", other, peer)
            }
        }
    }
}

/// Returns false when the link should close (malformed request).
async fn dispatch_logon(
    state: &Arc<LoginState>,
    wh: &mut OwnedWriteHalf,
    pkt: &Packet,
    peer: &SocketAddr,
) -> bool {
    let mut r = pkt.reader();
    let (name, password) = match (r.read_str(), r.read_str()) {
        (Ok(n), Ok(p)) => (n.to_string(), p.to_string()),
        _ => return false,
    };

    if !is_valid_account_name(&name) {
        write_frame(wh, build_logon_failure(LOGON_BAD_CREDENTIALS)).await;
        return true;
    }

    let Some(row) = state.fetch_account(&name).await else {
        tracing::info!("[login] [logon_unknown_account] name={}", name);
        write_frame(wh, build_logon_failure(LOGON_BAD_CREDENTIALS)).await;
        return true;
    };

    if compute_verifier(&row.salt, &name, &password) != row.verifier {
        tracing::info!("[login] [logon_bad_password] name={}", name);
        write_frame(wh, build_logon_failure(LOGON_BAD_CREDENTIALS)).await;
        return true;
    }

    let session_key = generate_session_key();
    let session = AccountSession {
        account_id: row.account_id,
        account_name: name.clone(),
        session_key: session_key.clone(),
        srp_verifier: row.verifier,
        srp_salt: row.salt.clone(),
        start_time: Utc::now(),
        attached_realm_id: None,
        tutorial_flags: [0; 8],
    };

    let created = {
        let mut sessions = state.sessions.lock().await;
        sessions.create(session)
    };
    if let Err(e) = created {
        tracing::error!("[login] [logon_session_reject] name={} err={}", name, e);
        write_frame(wh, build_logon_failure(LOGON_SERVER_ERROR)).await;
        return true;
    }

    if let Some(pool) = &state.db {
        db::update_last_ip(pool, row.account_id, &peer.ip().to_string()).await;
    }

    tracing::info!("[login] [logon_ok] name={} account={}", name, row.account_id);
    write_frame(wh, build_logon_ok(row.account_id, &session_key, &row.salt)).await;
    true
}

async fn dispatch_logout(state: &Arc<LoginState>, pkt: &Packet) {
    let mut r = pkt.reader();
    let Ok(name) = r.read_str() else { return };
    let mut sessions = state.sessions.lock().await;
    if sessions.remove(name).is_some() {
        tracing::info!("[login] [logout] name={}", name);
    }
}

async fn write_frame(wh: &mut OwnedWriteHalf, frame: Result<Vec<u8>, crate::network::FrameError>) {
    if let Ok(frame) = frame {
        let _ = wh.write_all(&frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_account_name_bounds() {
        assert!(is_valid_account_name("abc"));
        assert!(is_valid_account_name("alice123"));
        assert!(is_valid_account_name("a234567890123456"));
        assert!(!is_valid_account_name("ab"));
        assert!(!is_valid_account_name("a2345678901234567"));
        assert!(!is_valid_account_name("bad name"));
        assert!(!is_valid_account_name("bad!"));
    }
}
