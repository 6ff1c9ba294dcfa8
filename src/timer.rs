//! Deferred-event timer queue.
//!
//! A single binary min-heap of `(fire_at, callback)` events backed by one
//! waiter task. Everything that needs a delayed action (connector reconnect
//! backoff, keepalives) schedules it here instead of spawning its own sleep.
//!
//! Callbacks run on the queue's processing task and must not block.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Callback invoked when an event comes due.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

struct TimerEvent {
    fire_at: Instant,
    seq: u64,
    callback: TimerCallback,
}

// BinaryHeap is a max-heap; invert the ordering so the soonest event wins.
// `seq` breaks ties so events with equal fire times run in insertion order.
impl Ord for TimerEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for TimerEvent {}

struct Inner {
    heap: BinaryHeap<TimerEvent>,
    next_seq: u64,
}

/// Single-waiter deferred-callback scheduler.
pub struct TimerQueue {
    inner: Mutex<Inner>,
    rearm: Notify,
}

impl TimerQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            rearm: Notify::new(),
        })
    }

    /// Schedule `callback` to run at `fire_at`. If the new event is sooner
    /// than the currently armed wakeup, the waiter is re-armed.
    pub fn add_event(&self, fire_at: Instant, callback: TimerCallback) {
        let rearm = {
            let mut inner = self.inner.lock().expect("timer heap poisoned");
            let was_min = inner.heap.peek().map(|e| e.fire_at);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(TimerEvent {
                fire_at,
                seq,
                callback,
            });
            match was_min {
                Some(min) => fire_at < min,
                None => true,
            }
        };
        if rearm {
            self.rearm.notify_one();
        }
    }

    /// Convenience wrapper for "run this after `delay`".
    pub fn add_after(&self, delay: Duration, callback: TimerCallback) {
        self.add_event(Instant::now() + delay, callback);
    }

    /// Pop and invoke every event whose fire time is at or before `now`.
    /// Returns the number of callbacks run. This is the deterministic entry
    /// point the waiter task drives; tests call it directly.
    pub fn fire_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let callback = {
                let mut inner = self.inner.lock().expect("timer heap poisoned");
                match inner.heap.peek() {
                    Some(ev) if ev.fire_at <= now => inner.heap.pop().map(|e| e.callback),
                    _ => None,
                }
            };
            match callback {
                Some(cb) => {
                    cb();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    /// Fire time of the soonest pending event, if any.
    pub fn next_fire_at(&self) -> Option<Instant> {
        let inner = self.inner.lock().expect("timer heap poisoned");
        inner.heap.peek().map(|e| e.fire_at)
    }

    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().expect("timer heap poisoned");
        inner.heap.len()
    }

    /// Waiter loop: sleeps until the minimum event is due, fires everything
    /// due, and re-arms. `add_event` wakes it early when a sooner event
    /// arrives. Runs until the queue is dropped by all other holders.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.next_fire_at() {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at.into()) => {
                            // Fire by the slept-to deadline; anything that came
                            // due later is picked up on the next iteration.
                            self.fire_due(at);
                        }
                        _ = self.rearm.notified() => {}
                    }
                }
                None => self.rearm.notified().await,
            }
        }
    }
}
