//! Realm uplink of the world node.
//!
//! On every `Connected` the world re-advertises its hosted maps; the realm's
//! answer is informational only — a rejection just leaves the node idle
//! until the next reconnect cycle. Hand-offs place characters into
//! instances, movement relocates them in the interest grid and fans update
//! frames out to watchers, and teardown (voluntary or link loss) removes
//! them again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::packet::{
    build_chat_payload, build_create_payload, build_destroy_payload, build_update_payload,
    parse_move_payload, OP_MOVE_HEARTBEAT,
};
use super::WorldState;
use crate::network::connector::{Connector, LinkEvent};
use crate::network::Packet;
use crate::proto::snapshot;
use crate::proto::{
    CharacterLogIn, ChatMessage, ClientProxyPacket, LoginResult, WorldEnterError,
    WorldInstanceEntered, WorldInstanceError, WorldInstanceLeft, WorldLeftReason, WorldLogin,
    WorldLoginAnswer, MSG_CHARACTER_LOGIN, MSG_CHAT_MESSAGE, MSG_CLIENT_PROXY, MSG_WORLD_LEFT,
    MSG_WORLD_LOGIN_ANSWER,
};

pub async fn run_uplink(state: Arc<WorldState>, target: String, delay: Duration) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = Connector::spawn_with_delay(Arc::clone(&state.timer), target, tx, delay);
    {
        let mut uplink = state.uplink.lock().await;
        *uplink = Some(link.clone());
    }

    while let Some(event) = rx.recv().await {
        match event {
            LinkEvent::Connected => {
                let hosted = {
                    let registry = state.registry.lock().await;
                    registry.hosted_maps().to_vec()
                };
                let login = WorldLogin {
                    hosted_maps: hosted,
                };
                match login.encode() {
                    Ok(frame) => {
                        link.send(frame).await;
                    }
                    Err(e) => tracing::error!("[world] [world_login_encode] err={}", e),
                }
            }
            LinkEvent::Packet(pkt) => dispatch_realm_packet(&state, &pkt).await,
            LinkEvent::ConnectFailed => {}
            LinkEvent::Lost => {
                tracing::warn!("[world] [realm_link_lost] evicting characters");
                evict_all(&state).await;
            }
            LinkEvent::Malformed => {
                tracing::error!("[world] [realm_link_malformed] evicting characters");
                evict_all(&state).await;
            }
        }
    }
}

async fn dispatch_realm_packet(state: &Arc<WorldState>, pkt: &Packet) {
    match pkt.id {
        MSG_WORLD_LOGIN_ANSWER => match WorldLoginAnswer::decode(&mut pkt.reader()) {
            Ok(answer) if answer.result == LoginResult::Success => {
                tracing::info!("[world] [registered]");
            }
            Ok(answer) => {
                // Wait for the next reconnect cycle; no tight retry.
                tracing::warn!("[world] [register_rejected] result={:?}", answer.result);
            }
            Err(e) => tracing::warn!("[world] [bad_login_answer] err={}", e),
        },
        MSG_CHARACTER_LOGIN => match CharacterLogIn::decode(&mut pkt.reader()) {
            Ok(msg) => handle_character_login(state, msg).await,
            Err(e) => tracing::warn!("[world] [bad_character_login] err={}", e),
        },
        MSG_CLIENT_PROXY => match ClientProxyPacket::decode(&mut pkt.reader()) {
            Ok(msg) => handle_proxy(state, msg).await,
            Err(e) => tracing::warn!("[world] [bad_client_proxy] err={}", e),
        },
        MSG_CHAT_MESSAGE => match ChatMessage::decode(&mut pkt.reader()) {
            Ok(msg) => handle_chat(state, msg).await,
            Err(e) => tracing::warn!("[world] [bad_chat_message] err={}", e),
        },
        MSG_WORLD_LEFT => match WorldInstanceLeft::decode(&mut pkt.reader()) {
            Ok(msg) => handle_left(state, msg.character_guid, msg.reason).await,
            Err(e) => tracing::warn!("[world] [bad_world_left] err={}", e),
        },
        other => tracing::warn!("[world] [realm_unknown_cmd] id={:04X}", other),
    }
}

/// Resolve an instance for the character and place it. Every outcome is
/// exactly one reply: entered or a typed error.
async fn handle_character_login(state: &Arc<WorldState>, msg: CharacterLogIn) {
    let guid = msg.requester_id;

    let refuse = |e: WorldEnterError| WorldInstanceError {
        character_guid: guid,
        error: e,
    };

    let snap = match snapshot::decompress(&msg.snapshot_z) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("[world] [bad_snapshot] guid={:#x} err={}", guid, e);
            send_msg(state, refuse(WorldEnterError::InternalError).encode()).await;
            return;
        }
    };

    {
        let chars = state.chars.lock().await;
        if chars.contains_key(&guid) {
            tracing::warn!("[world] [char_already_placed] guid={:#x}", guid);
            send_msg(state, refuse(WorldEnterError::InternalError).encode()).await;
            return;
        }
    }

    let mut registry = state.registry.lock().await;
    let instance_id = match registry.resolve(snap.map_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(
                "[world] [char_login_refused] guid={:#x} map={} err={:?}",
                guid,
                snap.map_id,
                e
            );
            drop(registry);
            send_msg(state, refuse(e).encode()).await;
            return;
        }
    };

    let Some(instance) = registry.get_mut(instance_id) else {
        drop(registry);
        send_msg(state, refuse(WorldEnterError::InternalError).encode()).await;
        return;
    };
    if instance.add_character(&snap).is_err() {
        drop(registry);
        send_msg(state, refuse(WorldEnterError::InternalError).encode()).await;
        return;
    }
    let zone_id = instance.zone_id;

    // Seed visibility both ways: surrounding watchers learn the newcomer,
    // the newcomer learns everything already in sight.
    let mut frames: Vec<(u64, Vec<u8>)> = Vec::new();
    if let (Some(tile), Ok(watchers), Some(newcomer)) = (
        instance.grid.tile_of(guid),
        instance.grid.watchers_of(guid),
        instance.object(guid),
    ) {
        for w in watchers {
            frames.push((w, build_create_payload(newcomer)));
        }
        for seen in instance
            .grid
            .entities_in_sight(tile, crate::game::grid::DEFAULT_VIEW_RADIUS)
        {
            if seen != guid {
                if let Some(obj) = instance.object(seen) {
                    frames.push((guid, build_create_payload(obj)));
                }
            }
        }
    }
    drop(registry);

    {
        let mut chars = state.chars.lock().await;
        chars.insert(guid, instance_id);
    }

    let entered = WorldInstanceEntered {
        character_guid: guid,
        instance_id,
        map_id: snap.map_id,
        zone_id,
        x: snap.x,
        y: snap.y,
        z: snap.z,
        o: snap.o,
    };
    tracing::info!(
        "[world] [char_entered] guid={:#x} instance={} map={}",
        guid,
        instance_id,
        snap.map_id
    );
    send_msg(state, entered.encode()).await;

    for (target, payload) in frames {
        send_proxy(state, target, payload).await;
    }
}

/// Opaque client traffic for a placed character. Movement is the only
/// opcode the world interprets here; everything else is gameplay outside
/// this subsystem and is dropped with a debug log.
async fn handle_proxy(state: &Arc<WorldState>, msg: ClientProxyPacket) {
    let Some(instance_id) = lookup_char(state, msg.character_guid).await else {
        // Stale traffic for a character that already left; drop silently.
        return;
    };
    let Some((&op, body)) = msg.payload.split_first() else {
        return;
    };

    match op {
        OP_MOVE_HEARTBEAT => {
            let Ok((x, y, z, o)) = parse_move_payload(body) else {
                tracing::warn!("[world] [bad_move_payload] guid={:#x}", msg.character_guid);
                return;
            };
            handle_move(state, instance_id, msg.character_guid, x, y, z, o).await;
        }
        other => {
            tracing::debug!(
                "[world] [unhandled_gameplay_op] op={:02X} guid={:#x}",
                other,
                msg.character_guid
            );
        }
    }
}

/// Authoritative movement: relocate in the grid, then notify exactly the
/// watchers whose radius covers the mover — creations for the ones that
/// just gained sight, updates for the rest, removals for the ones that
/// lost it.
async fn handle_move(
    state: &Arc<WorldState>,
    instance_id: u32,
    guid: u64,
    x: f32,
    y: f32,
    z: f32,
    o: f32,
) {
    let mut frames: Vec<(u64, Vec<u8>)> = Vec::new();
    {
        let mut registry = state.registry.lock().await;
        let Some(instance) = registry.get_mut(instance_id) else {
            return;
        };
        let outcome = match instance.move_object(guid, x, y, z, o) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("[world] [move_failed] guid={:#x} err={}", guid, e);
                return;
            }
        };

        let watchers = instance.grid.watchers_of(guid).unwrap_or_default();
        if let Some(obj) = instance.object(guid) {
            for w in &outcome.gained {
                frames.push((*w, build_create_payload(obj)));
            }
            for w in &outcome.lost {
                frames.push((*w, build_destroy_payload(guid)));
            }
            if obj.is_dirty() {
                let update = build_update_payload(obj);
                for w in watchers {
                    if !outcome.gained.contains(&w) {
                        frames.push((w, update.clone()));
                    }
                }
            }
        }
        if let Some(obj) = instance.object_mut(guid) {
            obj.clear_changed();
        }
    }

    for (target, payload) in frames {
        send_proxy(state, target, payload).await;
    }
}

/// Chat fan-out to everyone whose radius covers the speaker's tile.
async fn handle_chat(state: &Arc<WorldState>, msg: ChatMessage) {
    let Some(instance_id) = lookup_char(state, msg.character_guid).await else {
        return;
    };
    let frames: Vec<(u64, Vec<u8>)> = {
        let registry = state.registry.lock().await;
        let Some(instance) = registry.get(instance_id) else {
            return;
        };
        let payload = build_chat_payload(msg.character_guid, &msg.text);
        instance
            .grid
            .watchers_of(msg.character_guid)
            .unwrap_or_default()
            .into_iter()
            .map(|w| (w, payload.clone()))
            .collect()
    };
    for (target, payload) in frames {
        send_proxy(state, target, payload).await;
    }
}

/// Remove a character (realm-requested or teardown), tell its former
/// watchers, and confirm back to the realm with the same reason code.
async fn handle_left(state: &Arc<WorldState>, guid: u64, reason: WorldLeftReason) {
    let Some(instance_id) = ({
        let mut chars = state.chars.lock().await;
        chars.remove(&guid)
    }) else {
        return;
    };

    let frames: Vec<(u64, Vec<u8>)> = {
        let mut registry = state.registry.lock().await;
        let watchers = registry
            .get(instance_id)
            .and_then(|i| i.grid.watchers_of(guid).ok())
            .unwrap_or_default();
        registry.remove_object(instance_id, guid);
        watchers
            .into_iter()
            .map(|w| (w, build_destroy_payload(guid)))
            .collect()
    };
    for (target, payload) in frames {
        send_proxy(state, target, payload).await;
    }

    tracing::info!(
        "[world] [char_left] guid={:#x} instance={} reason={:?}",
        guid,
        instance_id,
        reason
    );
    let confirm = WorldInstanceLeft {
        character_guid: guid,
        reason,
    };
    send_msg(state, confirm.encode()).await;
}

/// Realm link is gone: every placed character must leave its grid. No
/// confirmations — there is nobody to send them to.
async fn evict_all(state: &Arc<WorldState>) {
    let evicted: Vec<(u64, u32)> = {
        let mut chars = state.chars.lock().await;
        chars.drain().collect()
    };
    if evicted.is_empty() {
        return;
    }
    let mut registry = state.registry.lock().await;
    for (guid, instance_id) in &evicted {
        registry.remove_object(*instance_id, *guid);
    }
    tracing::warn!("[world] [evicted] count={}", evicted.len());
}

async fn lookup_char(state: &Arc<WorldState>, guid: u64) -> Option<u32> {
    let chars = state.chars.lock().await;
    chars.get(&guid).copied()
}

async fn send_proxy(state: &Arc<WorldState>, target_guid: u64, payload: Vec<u8>) {
    let proxy = ClientProxyPacket {
        character_guid: target_guid,
        payload,
    };
    send_msg(state, proxy.encode()).await;
}

async fn send_msg(state: &Arc<WorldState>, frame: Result<Vec<u8>, crate::network::FrameError>) {
    let Ok(frame) = frame else { return };
    if !state.send_uplink(frame).await {
        tracing::debug!("[world] [uplink_down_drop]");
    }
}
