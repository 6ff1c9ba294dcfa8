//! Login node: account authentication and realm directory.
//!
//! Accepted connections declare themselves with their first frame: a
//! [`RealmLogin`](crate::proto::RealmLogin) promotes the link to a realm
//! uplink, an account-logon frame starts a client authentication session.

pub mod client;
pub mod db;
pub mod packet;
pub mod realmif;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::MySqlPool;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::config::ServerConfig;
use crate::network::crypt::{compute_verifier, generate_salt};
use crate::network::read_frame;
use crate::proto::MSG_REALM_LOGIN;
use crate::session::{RealmId, SessionDirectory};

/// One realm allowed to register, as configured.
#[derive(Debug, Clone)]
pub struct RealmEntry {
    pub internal_name: String,
    pub password: String,
}

/// One currently-registered realm link.
pub struct RealmLink {
    pub internal_name: String,
    pub tx: mpsc::Sender<Vec<u8>>,
}

/// Account row as the login node sees it: id plus SRP material. Lives in
/// MySQL normally, in memory under test.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub account_id: u32,
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

pub struct LoginState {
    pub db: Option<MySqlPool>,
    pub config: ServerConfig,
    pub sessions: Mutex<SessionDirectory>,
    pub realms: Mutex<HashMap<RealmId, RealmLink>>,
    pub realm_directory: Vec<RealmEntry>,
    /// Account rows used when no database pool is attached.
    test_accounts: Mutex<HashMap<String, AccountRow>>,
    next_account_id: AtomicU32,
}

impl LoginState {
    pub fn new(db: Option<MySqlPool>, config: ServerConfig) -> Self {
        let realm_directory = vec![RealmEntry {
            internal_name: config.realm_name.clone(),
            password: config.realm_pw.clone(),
        }];
        Self {
            db,
            config,
            sessions: Mutex::new(SessionDirectory::new()),
            realms: Mutex::new(HashMap::new()),
            realm_directory,
            test_accounts: Mutex::new(HashMap::new()),
            next_account_id: AtomicU32::new(1),
        }
    }

    /// State with no database pool; account rows live in memory.
    pub fn test_only() -> Self {
        const TEST_CONF: &str = r#"
sql_ip: "127.0.0.1"
sql_id: "test"
sql_pw: "test"
sql_db: "test"
login_ip: "127.0.0.1"
realm_name: "realm_01"
realm_pw: "realmpw"
realm_ip: "127.0.0.1"
"#;
        let config = ServerConfig::from_str(TEST_CONF).expect("test config is valid");
        Self::new(None, config)
    }

    /// Install an in-memory account row. Returns the account id.
    pub async fn add_account(&self, name: &str, password: &str) -> u32 {
        let account_id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        let salt = generate_salt();
        let verifier = compute_verifier(&salt, name, password);
        let mut accounts = self.test_accounts.lock().await;
        accounts.insert(
            name.to_uppercase(),
            AccountRow {
                account_id,
                salt,
                verifier,
            },
        );
        account_id
    }

    /// Account lookup: database when attached, in-memory table otherwise.
    /// The sqlx call suspends this task only; the accept loop keeps running.
    pub async fn fetch_account(&self, name: &str) -> Option<AccountRow> {
        match &self.db {
            Some(pool) => db::fetch_account(pool, name).await.unwrap_or_else(|e| {
                tracing::error!("[login] [account_lookup_failed] name={} err={}", name, e);
                None
            }),
            None => {
                let accounts = self.test_accounts.lock().await;
                accounts.get(&name.to_uppercase()).cloned()
            }
        }
    }

    pub async fn run(state: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        Self::serve(state, listener).await
    }

    /// Accept loop over a pre-bound listener (tests bind their own
    /// ephemeral ports).
    pub async fn serve(state: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("[login] [ready] addr={:?}", listener.local_addr().ok());
        loop {
            let (stream, peer) = listener.accept().await?;
            let s = Arc::clone(&state);
            tokio::spawn(async move {
                handle_new_connection(s, stream, peer).await;
            });
        }
    }
}

async fn handle_new_connection(
    state: Arc<LoginState>,
    stream: TcpStream,
    peer: std::net::SocketAddr,
) {
    let (mut rh, wh) = stream.into_split();
    let first = match read_frame(&mut rh).await {
        Ok(pkt) => pkt,
        Err(_) => return,
    };

    match first.id {
        MSG_REALM_LOGIN => realmif::promote_to_realm(state, rh, wh, first).await,
        packet::CMSG_ACCOUNT_LOGON => client::handle_client(state, rh, wh, first, peer).await,
        other => {
            tracing::warn!("[login] [unknown_first_frame] id={:04X} peer={}", other, peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_fetch_account() {
        let state = LoginState::test_only();
        let id = state.add_account("alice", "secret").await;

        let row = state.fetch_account("ALICE").await.unwrap();
        assert_eq!(row.account_id, id);
        assert_eq!(row.verifier, compute_verifier(&row.salt, "alice", "secret"));
        assert!(state.fetch_account("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_account_ids_are_unique() {
        let state = LoginState::test_only();
        let a = state.add_account("alice", "x").await;
        let b = state.add_account("bob", "y").await;
        assert_ne!(a, b);
    }

    #[test]
    fn test_directory_seeded_from_config() {
        let state = LoginState::test_only();
        assert_eq!(state.realm_directory.len(), 1);
        assert_eq!(state.realm_directory[0].internal_name, "realm_01");
    }
}
