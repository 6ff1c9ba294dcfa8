//! World uplinks on the realm node.
//!
//! World nodes dial the realm. Their first frame is a
//! [`WorldLogin`](crate::proto::WorldLogin) advertising the hosted map list;
//! the realm answers with a [`WorldLoginAnswer`](crate::proto::WorldLoginAnswer)
//! and routes hand-off replies and proxy traffic until the link drops. A
//! dropped world link fails every hand-off waiting on it and evicts every
//! character routed through it.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::{ClientNotice, EnterReply, RealmState, WorldFifo};
use crate::network::{read_frame, Packet};
use crate::proto::{
    ClientProxyPacket, LoginResult, WorldInstanceEntered, WorldInstanceError, WorldInstanceLeft,
    WorldLeftReason, WorldLogin, WorldLoginAnswer, MSG_CLIENT_PROXY, MSG_WORLD_ENTERED,
    MSG_WORLD_ENTER_ERROR, MSG_WORLD_LEFT, MSG_WORLD_LOGIN,
};

pub async fn listen(state: Arc<RealmState>, listener: TcpListener) {
    tracing::info!(
        "[realm] [world_listener_ready] addr={:?}",
        listener.local_addr().ok()
    );
    loop {
        let Ok((stream, _peer)) = listener.accept().await else {
            break;
        };
        let s = Arc::clone(&state);
        tokio::spawn(async move {
            handle_world(s, stream).await;
        });
    }
}

async fn handle_world(state: Arc<RealmState>, stream: TcpStream) {
    let (mut rh, mut wh) = stream.into_split();

    let first = match read_frame(&mut rh).await {
        Ok(p) => p,
        Err(_) => return,
    };
    if first.id != MSG_WORLD_LOGIN {
        tracing::warn!("[realm] [world_bad_first_frame] id={:04X}", first.id);
        return;
    }
    let login = match WorldLogin::decode(&mut first.reader()) {
        Ok(m) => m,
        Err(_) => return,
    };
    if login.hosted_maps.is_empty() {
        let answer = WorldLoginAnswer {
            result: LoginResult::ServerError,
        };
        if let Ok(frame) = answer.encode() {
            let _ = wh.write_all(&frame).await;
        }
        return;
    }

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let idx = {
        let mut worlds = state.worlds.lock().await;
        let idx = worlds.iter().position(|w| w.is_none()).unwrap_or_else(|| {
            worlds.push(None);
            worlds.len() - 1
        });
        worlds[idx] = Some(WorldFifo {
            tx,
            hosted_maps: login.hosted_maps.clone(),
        });
        idx
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if wh.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let answer = WorldLoginAnswer {
        result: LoginResult::Success,
    };
    if let Ok(frame) = answer.encode() {
        state.send_to_world(idx, frame).await;
    }
    tracing::info!(
        "[realm] [world_connect] id={} maps={:?}",
        idx,
        login.hosted_maps
    );

    loop {
        let pkt = match read_frame(&mut rh).await {
            Ok(p) => p,
            Err(_) => break,
        };
        dispatch_world_packet(&state, idx, &pkt).await;
    }

    // Teardown: unregister, fail hand-offs in flight on this link, evict
    // routed characters with a link-loss reason.
    {
        let mut worlds = state.worlds.lock().await;
        worlds[idx] = None;
    }
    let stranded = {
        let mut waiters = state.enter_waiters.lock().await;
        let guids: Vec<u64> = waiters
            .iter()
            .filter(|(_, (w, _))| *w == idx)
            .map(|(g, _)| *g)
            .collect();
        guids
            .into_iter()
            .filter_map(|g| waiters.remove(&g))
            .collect::<Vec<_>>()
    };
    for (_, tx) in stranded {
        let _ = tx.send(EnterReply::LinkDown);
    }
    let evicted = {
        let mut routes = state.routes.lock().await;
        let guids: Vec<u64> = routes
            .iter()
            .filter(|(_, r)| r.world_idx == idx)
            .map(|(g, _)| *g)
            .collect();
        guids
            .into_iter()
            .filter_map(|g| routes.remove(&g))
            .collect::<Vec<_>>()
    };
    let evicted_count = evicted.len();
    for route in evicted {
        let _ = route.tx.send(ClientNotice::Left(WorldLeftReason::LinkLost)).await;
    }
    writer.abort();
    tracing::info!(
        "[realm] [world_disconnect] id={} evicted={}",
        idx,
        evicted_count
    );
}

async fn dispatch_world_packet(state: &Arc<RealmState>, world_idx: usize, pkt: &Packet) {
    match pkt.id {
        MSG_WORLD_ENTERED => match WorldInstanceEntered::decode(&mut pkt.reader()) {
            Ok(msg) => {
                resolve_enter(state, msg.character_guid, EnterReply::Entered(msg)).await;
            }
            Err(e) => tracing::warn!("[realm] [bad_world_entered] err={}", e),
        },
        MSG_WORLD_ENTER_ERROR => match WorldInstanceError::decode(&mut pkt.reader()) {
            Ok(msg) => {
                resolve_enter(state, msg.character_guid, EnterReply::Error(msg.error)).await;
            }
            Err(e) => tracing::warn!("[realm] [bad_world_enter_error] err={}", e),
        },
        MSG_CLIENT_PROXY => match ClientProxyPacket::decode(&mut pkt.reader()) {
            Ok(msg) => {
                let routes = state.routes.lock().await;
                match routes.get(&msg.character_guid) {
                    Some(route) => {
                        let _ = route.tx.send(ClientNotice::Proxy(msg.payload)).await;
                    }
                    // Event for a now-irrelevant character: dropped, never a
                    // crash (the client may have vanished mid-flight).
                    None => tracing::debug!(
                        "[realm] [proxy_unrouted] guid={:#x}",
                        msg.character_guid
                    ),
                }
            }
            Err(e) => tracing::warn!("[realm] [bad_client_proxy] err={}", e),
        },
        MSG_WORLD_LEFT => match WorldInstanceLeft::decode(&mut pkt.reader()) {
            Ok(msg) => {
                let route = {
                    let mut routes = state.routes.lock().await;
                    routes.remove(&msg.character_guid)
                };
                if let Some(route) = route {
                    let _ = route.tx.send(ClientNotice::Left(msg.reason)).await;
                }
                tracing::info!(
                    "[realm] [world_left] guid={:#x} reason={:?} world={}",
                    msg.character_guid,
                    msg.reason,
                    world_idx
                );
            }
            Err(e) => tracing::warn!("[realm] [bad_world_left] err={}", e),
        },
        other => tracing::warn!("[realm] [world_unknown_cmd] id={:04X}", other),
    }
}

async fn resolve_enter(state: &Arc<RealmState>, guid: u64, reply: EnterReply) {
    let waiter = {
        let mut waiters = state.enter_waiters.lock().await;
        waiters.remove(&guid)
    };
    match waiter {
        Some((_, tx)) => {
            let _ = tx.send(reply);
        }
        None => tracing::warn!("[realm] [enter_reply_unmatched] guid={:#x}", guid),
    }
}
