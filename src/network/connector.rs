//! Reconnecting client-side link.
//!
//! Every dialing relationship in the cluster (world→realm, realm→login) goes
//! through a [`Connector`]: it owns exactly one connection at a time, feeds
//! decoded frames to its owner as [`LinkEvent`]s, and schedules reconnect
//! attempts on the shared [`TimerQueue`] after a fixed backoff instead of
//! hot-looping against an unreachable peer.
//!
//! A malformed frame is treated as harder failure than a transport drop: the
//! connection is torn down immediately and no reconnect is scheduled.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{FrameDecoder, Packet};
use crate::timer::TimerQueue;

/// Backoff between a lost/failed connection and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(4);

/// Events delivered to the owning node loop, in order, per link.
#[derive(Debug)]
pub enum LinkEvent {
    /// A connection attempt succeeded; the link is writable.
    Connected,
    /// A connection attempt failed; a retry is already scheduled.
    ConnectFailed,
    /// One decoded frame from the peer.
    Packet(Packet),
    /// The transport dropped; a retry is already scheduled.
    Lost,
    /// The peer sent bytes that do not frame. Link torn down, no retry.
    Malformed,
}

struct LinkState {
    /// Bumped on every connect attempt. Stale tasks and timer callbacks
    /// compare against it and drop themselves silently.
    generation: u64,
    /// Write queue of the live connection, if any.
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

struct Inner {
    target: String,
    delay: Duration,
    timer: Arc<TimerQueue>,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: Mutex<LinkState>,
}

/// Handle owned by the node loop. Dropping every handle retires the link;
/// in-flight timer callbacks resolve a `Weak` and become no-ops.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    /// Spawn a connector that dials `target` and retries on the default
    /// backoff. Events arrive on `events`.
    pub fn spawn(
        timer: Arc<TimerQueue>,
        target: String,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self::spawn_with_delay(timer, target, events, RECONNECT_DELAY)
    }

    /// Same as [`spawn`](Self::spawn) with an explicit backoff. Tests use
    /// short delays; production code sticks to [`RECONNECT_DELAY`].
    pub fn spawn_with_delay(
        timer: Arc<TimerQueue>,
        target: String,
        events: mpsc::UnboundedSender<LinkEvent>,
        delay: Duration,
    ) -> Self {
        let inner = Arc::new(Inner {
            target,
            delay,
            timer,
            events,
            state: Mutex::new(LinkState {
                generation: 0,
                tx: None,
            }),
        });
        spawn_connect(&inner);
        Self { inner }
    }

    /// Queue one finished frame on the live connection. Returns false when
    /// the link is down (the caller decides whether that matters).
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        let tx = {
            let state = self.inner.state.lock().expect("link state poisoned");
            state.tx.clone()
        };
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        let state = self.inner.state.lock().expect("link state poisoned");
        state.tx.is_some()
    }

    /// Force a fresh connection now, superseding whatever exists.
    pub fn reconnect_now(&self) {
        spawn_connect(&self.inner);
    }
}

/// Begin a new connect attempt: bump the generation (orphaning any previous
/// connection task) and dial.
fn spawn_connect(inner: &Arc<Inner>) {
    let generation = {
        let mut state = inner.state.lock().expect("link state poisoned");
        state.generation += 1;
        state.tx = None;
        state.generation
    };
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_connection(inner, generation).await;
    });
}

/// Schedule the next attempt on the timer queue. The callback holds a `Weak`
/// so a retired connector never resurrects, and checks the generation so a
/// newer connect supersedes the pending retry.
fn schedule_reconnect(inner: &Arc<Inner>, generation: u64) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.timer.add_after(
        inner.delay,
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return; // link owner is gone
            };
            let current = {
                let state = inner.state.lock().expect("link state poisoned");
                state.generation
            };
            if current != generation {
                return; // superseded by a newer connect
            }
            spawn_connect(&inner);
        }),
    );
}

fn still_current(inner: &Inner, generation: u64) -> bool {
    let state = inner.state.lock().expect("link state poisoned");
    state.generation == generation
}

async fn run_connection(inner: Arc<Inner>, generation: u64) {
    let stream = match TcpStream::connect(&inner.target).await {
        Ok(s) => s,
        Err(e) => {
            if !still_current(&inner, generation) {
                return;
            }
            tracing::warn!("[link] [connect_failed] target={} err={}", inner.target, e);
            let _ = inner.events.send(LinkEvent::ConnectFailed);
            schedule_reconnect(&inner, generation);
            return;
        }
    };

    if !still_current(&inner, generation) {
        return; // superseded while dialing; drop the socket
    }

    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    {
        let mut state = inner.state.lock().expect("link state poisoned");
        if state.generation != generation {
            return;
        }
        state.tx = Some(tx);
    }

    tracing::info!("[link] [connected] target={}", inner.target);
    let _ = inner.events.send(LinkEvent::Connected);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];
    let outcome = loop {
        match read_half.read(&mut read_buf).await {
            Ok(0) => break ReadOutcome::Lost,
            Ok(n) => {
                decoder.extend(&read_buf[..n]);
                let mut malformed = false;
                loop {
                    match decoder.next_frame() {
                        Ok(Some(pkt)) => {
                            let _ = inner.events.send(LinkEvent::Packet(pkt));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::error!(
                                "[link] [malformed] target={} err={}",
                                inner.target,
                                e
                            );
                            malformed = true;
                            break;
                        }
                    }
                }
                if malformed {
                    break ReadOutcome::Malformed;
                }
            }
            Err(e) => {
                tracing::warn!("[link] [read_error] target={} err={}", inner.target, e);
                break ReadOutcome::Lost;
            }
        }
    };

    writer.abort();

    // Only the still-current connection may clear state and schedule retries;
    // a superseded one just disappears.
    {
        let mut state = inner.state.lock().expect("link state poisoned");
        if state.generation != generation {
            return;
        }
        state.tx = None;
    }

    match outcome {
        ReadOutcome::Lost => {
            tracing::info!("[link] [lost] target={}", inner.target);
            let _ = inner.events.send(LinkEvent::Lost);
            schedule_reconnect(&inner, generation);
        }
        ReadOutcome::Malformed => {
            let _ = inner.events.send(LinkEvent::Malformed);
        }
    }
}

enum ReadOutcome {
    Lost,
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PacketWriter;
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn recv_until<F: Fn(&LinkEvent) -> bool>(
        rx: &mut mpsc::UnboundedReceiver<LinkEvent>,
        pred: F,
    ) -> LinkEvent {
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for link event")
                .expect("event channel closed");
            if pred(&ev) {
                return ev;
            }
        }
    }

    #[tokio::test]
    async fn test_connects_and_delivers_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut w = PacketWriter::new(0x2800);
            w.write_u8(0);
            peer.write_all(&w.finish().unwrap()).await.unwrap();
            // Hold the socket open so the test controls teardown.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let timer = TimerQueue::new();
        tokio::spawn(timer.clone().run());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = Connector::spawn(timer, addr.to_string(), tx);

        assert!(matches!(
            recv_until(&mut rx, |_| true).await,
            LinkEvent::Connected
        ));
        match recv_until(&mut rx, |e| matches!(e, LinkEvent::Packet(_))).await {
            LinkEvent::Packet(pkt) => assert_eq!(pkt.id, 0x2800),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_reconnect_waits_full_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel::<Instant>();

        tokio::spawn(async move {
            loop {
                let (peer, _) = listener.accept().await.unwrap();
                let _ = accept_tx.send(Instant::now());
                drop(peer); // immediate drop -> connector sees Lost
            }
        });

        let timer = TimerQueue::new();
        tokio::spawn(timer.clone().run());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delay = Duration::from_millis(300);
        let _link = Connector::spawn_with_delay(timer, addr.to_string(), tx, delay);

        let first = tokio::time::timeout(Duration::from_secs(5), accept_rx.recv())
            .await
            .unwrap()
            .unwrap();
        recv_until(&mut rx, |e| matches!(e, LinkEvent::Lost)).await;
        let lost_at = Instant::now();

        let second = tokio::time::timeout(Duration::from_secs(5), accept_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(second > first);
        // Not before the configured delay has elapsed...
        assert!(
            second.duration_since(lost_at) >= delay - Duration::from_millis(20),
            "reconnected after {:?}, expected >= {:?}",
            second.duration_since(lost_at),
            delay
        );
        // ...and no extra attempt sneaks in before the next backoff expires.
        tokio::time::sleep(delay / 2).await;
        assert!(accept_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_tears_down_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            loop {
                let (mut peer, _) = listener.accept().await.unwrap();
                let _ = accept_tx.send(());
                // Garbage that can never frame (wrong marker).
                let _ = peer.write_all(&[0x00, 0x01, 0x02, 0x03, 0x04]).await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        let timer = TimerQueue::new();
        tokio::spawn(timer.clone().run());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = Connector::spawn_with_delay(
            timer.clone(),
            addr.to_string(),
            tx,
            Duration::from_millis(100),
        );

        accept_rx.recv().await.unwrap();
        recv_until(&mut rx, |e| matches!(e, LinkEvent::Malformed)).await;

        // No reconnect scheduled: the listener must not see a second dial.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(accept_rx.try_recv().is_err());
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test]
    async fn test_send_fails_while_disconnected() {
        let timer = TimerQueue::new();
        tokio::spawn(timer.clone().run());
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Nothing listens on this port.
        let link = Connector::spawn_with_delay(
            timer,
            "127.0.0.1:1".to_string(),
            tx,
            Duration::from_secs(60),
        );

        recv_until(&mut rx, |e| matches!(e, LinkEvent::ConnectFailed)).await;
        assert!(!link.is_connected());
        assert!(!link.send(vec![0xAA, 0, 0, 0, 0]).await);
    }
}
