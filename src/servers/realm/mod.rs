//! Realm node: client-facing session brokering and routing.
//!
//! The realm dials the login node through a reconnecting connector, accepts
//! uplinks from world nodes, and owns every client connection. A character's
//! gameplay traffic is relayed world↔client by guid; the realm never
//! interprets it.

pub mod client;
pub mod loginif;
pub mod packet;
pub mod worldif;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::ServerConfig;
use crate::network::connector::Connector;
use crate::proto::{
    PlayerLoginFailReason, PlayerLoginSuccess, WorldEnterError, WorldInstanceEntered,
    WorldLeftReason,
};
use crate::session::{PendingLogins, RealmId};
use crate::timer::TimerQueue;

/// One connected world node.
pub struct WorldFifo {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub hosted_maps: Vec<u16>,
}

/// Outcome of a player-login validation round-trip, delivered to the
/// waiting client task.
pub enum LoginReply {
    Success(Box<PlayerLoginSuccess>),
    Failure(PlayerLoginFailReason),
    /// Rejected synchronously: a request for this account is already in
    /// flight.
    Duplicate,
    /// The login link is down (or dropped while waiting).
    LinkDown,
}

/// Outcome of a world hand-off, delivered to the waiting client task.
pub enum EnterReply {
    Entered(WorldInstanceEntered),
    Error(WorldEnterError),
    LinkDown,
}

/// Pushed to a client session task from the world side.
pub enum ClientNotice {
    /// Opaque payload to forward to the client.
    Proxy(Vec<u8>),
    /// The character left its instance; the route is gone.
    Left(WorldLeftReason),
}

/// Routing entry for one in-world character.
pub struct ClientRoute {
    pub world_idx: usize,
    pub account_name: String,
    pub tx: mpsc::Sender<ClientNotice>,
}

pub struct RealmState {
    pub config: ServerConfig,
    pub timer: Arc<TimerQueue>,
    /// Link to the login node; present once the connector task is up.
    pub login_link: Mutex<Option<Connector>>,
    /// Realm id assigned by the login node; `None` until registered.
    pub realm_id: Mutex<Option<RealmId>>,
    /// In-flight player-login requests, keyed by account name.
    pub pending: Mutex<PendingLogins<oneshot::Sender<LoginReply>>>,
    /// Connected world nodes; index is the routing key.
    pub worlds: Mutex<Vec<Option<WorldFifo>>>,
    /// In-world characters: guid → route.
    pub routes: Mutex<HashMap<u64, ClientRoute>>,
    /// Hand-offs awaiting a world reply: guid → (world idx, waiter).
    pub enter_waiters: Mutex<HashMap<u64, (usize, oneshot::Sender<EnterReply>)>>,
}

impl RealmState {
    pub fn new(config: ServerConfig, timer: Arc<TimerQueue>) -> Self {
        Self {
            config,
            timer,
            login_link: Mutex::new(None),
            realm_id: Mutex::new(None),
            pending: Mutex::new(PendingLogins::new()),
            worlds: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
            enter_waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the whole node up from config: login connector, world
    /// listener, client listener. Runs until the client listener fails.
    pub async fn run(state: Arc<Self>) -> Result<()> {
        let login_addr = state.config.login_addr();
        tokio::spawn(loginif::run_login_link(
            Arc::clone(&state),
            login_addr,
            crate::network::connector::RECONNECT_DELAY,
        ));

        let world_listener = TcpListener::bind(state.config.realm_world_addr()).await?;
        tokio::spawn(worldif::listen(Arc::clone(&state), world_listener));

        let client_listener = TcpListener::bind(state.config.realm_addr()).await?;
        client::listen(state, client_listener).await
    }

    /// Pick the world node hosting `map_id`, if any.
    pub async fn select_world_for_map(&self, map_id: u16) -> Option<usize> {
        let worlds = self.worlds.lock().await;
        worlds.iter().position(|w| {
            w.as_ref()
                .is_some_and(|fifo| fifo.hosted_maps.contains(&map_id))
        })
    }

    pub async fn send_to_world(&self, world_idx: usize, frame: Vec<u8>) -> bool {
        let worlds = self.worlds.lock().await;
        match worlds.get(world_idx).and_then(|w| w.as_ref()) {
            Some(fifo) => fifo.tx.send(frame).await.is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RealmState {
        const CONF: &str = r#"
sql_ip: "127.0.0.1"
sql_id: "test"
sql_pw: "test"
sql_db: "test"
login_ip: "127.0.0.1"
realm_name: "realm_01"
realm_pw: "realmpw"
realm_ip: "127.0.0.1"
"#;
        RealmState::new(
            ServerConfig::from_str(CONF).unwrap(),
            TimerQueue::new(),
        )
    }

    #[tokio::test]
    async fn test_select_world_by_hosted_map() {
        let s = state();
        {
            let mut worlds = s.worlds.lock().await;
            let (tx, _rx) = mpsc::channel(1);
            worlds.push(Some(WorldFifo {
                tx,
                hosted_maps: vec![1, 2],
            }));
            let (tx, _rx) = mpsc::channel(1);
            worlds.push(Some(WorldFifo {
                tx,
                hosted_maps: vec![0],
            }));
        }
        assert_eq!(s.select_world_for_map(0).await, Some(1));
        assert_eq!(s.select_world_for_map(2).await, Some(0));
        assert_eq!(s.select_world_for_map(9).await, None);
    }

    #[tokio::test]
    async fn test_send_to_missing_world_fails() {
        let s = state();
        assert!(!s.send_to_world(0, vec![1, 2, 3]).await);
    }
}
