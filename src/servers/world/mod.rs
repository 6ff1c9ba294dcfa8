//! World node: authoritative map simulation.
//!
//! The world dials its realm through a reconnecting connector, advertises
//! the maps it hosts, and receives character hand-offs and proxied gameplay
//! traffic. All client visibility flows through the per-instance interest
//! grid; the realm link is the only socket this node owns.

pub mod packet;
pub mod realmif;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::catalog::MapCatalog;
use crate::config::ServerConfig;
use crate::game::instance::InstanceRegistry;
use crate::network::connector::Connector;
use crate::timer::TimerQueue;

pub struct WorldState {
    pub config: ServerConfig,
    pub timer: Arc<TimerQueue>,
    pub registry: Mutex<InstanceRegistry>,
    /// Placed characters: guid → instance id.
    pub chars: Mutex<HashMap<u64, u32>>,
    /// Uplink to the realm; present once the connector task is up.
    pub uplink: Mutex<Option<Connector>>,
}

impl WorldState {
    pub fn new(config: ServerConfig, timer: Arc<TimerQueue>, catalog: Arc<MapCatalog>) -> Self {
        let hosted = config.hosted_maps.clone();
        Self {
            config,
            timer,
            registry: Mutex::new(InstanceRegistry::new(catalog, hosted)),
            chars: Mutex::new(HashMap::new()),
            uplink: Mutex::new(None),
        }
    }

    /// Bring the node up: one connector to the realm's world port.
    pub async fn run(state: Arc<Self>) {
        let target = state.config.realm_world_addr();
        realmif::run_uplink(
            state,
            target,
            crate::network::connector::RECONNECT_DELAY,
        )
        .await;
    }

    pub async fn send_uplink(&self, frame: Vec<u8>) -> bool {
        let uplink = self.uplink.lock().await;
        match uplink.as_ref() {
            Some(link) => link.send(frame).await,
            None => false,
        }
    }
}
