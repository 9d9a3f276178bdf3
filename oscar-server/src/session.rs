//! The `Session` aggregate (§3, §9): the object other parts of the system
//! address when they want to push a SNAC at, or forcibly close, a
//! particular connection.
//!
//! Per §9's design note, the session is accessed by many tasks but mutated
//! by few: each mutable sub-part gets its own small guard rather than one
//! session-wide lock. `receive_queue` is an mpsc channel (many senders, one
//! receiver, taken exactly once by the owning dispatcher); `closed_signal`
//! is a `Notify` any number of producers can fire and the dispatcher awaits;
//! `remote_addr` and the rate-limit buckets are behind small `parking_lot`
//! mutexes that are never held across an `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use oscar_types::SnacMessage;

/// Identifies a rate class assigned by `SnacRateLimits::rate_class_lookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateClassId(pub u16);

/// Parameters for a rate class's token bucket. The wire protocol assigns
/// rate classes per `(food_group, sub_group)` but does not hand the core
/// per-class bucket parameters, so unseen classes get this default the
/// first time `evaluate_rate_limit` is asked about them (see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct RateClassConfig {
    pub rate_per_sec: f64,
    pub burst: f64,
}

impl Default for RateClassConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 20.0,
            burst: 40.0,
        }
    }
}

/// Outcome of evaluating a session's rate limit for an inbound SNAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    /// Still allowed, but the bucket has fallen below a "you're getting
    /// close" watermark. Carried through so a handler could warn the
    /// client; the dispatch loop itself only acts on `Limited`.
    Warn,
    Limited,
}

struct TokenBucket {
    config: RateClassConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateClassConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: config.burst,
            last_refill: now,
        }
    }

    fn evaluate(&mut self, now: Instant) -> RateLimitOutcome {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.rate_per_sec).min(self.config.burst);
        self.last_refill = now;

        if self.tokens < 1.0 {
            return RateLimitOutcome::Limited;
        }
        self.tokens -= 1.0;
        if self.tokens < self.config.burst * 0.2 {
            RateLimitOutcome::Warn
        } else {
            RateLimitOutcome::Allowed
        }
    }
}

/// The live user context addressed by other parts of the system when
/// sending notifications toward a particular connection (§3).
pub struct Session {
    pub id: String,
    pub ident_screen_name: String,
    pub display_screen_name: String,

    receive_tx: mpsc::Sender<SnacMessage>,
    receive_rx: Mutex<Option<mpsc::Receiver<SnacMessage>>>,

    closed: Notify,
    closed_flag: AtomicBool,

    remote_addr: Mutex<Option<SocketAddr>>,
    rate_buckets: Mutex<HashMap<RateClassId, TokenBucket>>,
}

/// Bound on the number of outbound SNACs buffered for a session before a
/// slow dispatcher applies backpressure to producers. The queue is
/// "bounded, lossless" per §3: producers await capacity rather than drop.
pub const RECEIVE_QUEUE_CAPACITY: usize = 256;

impl Session {
    pub fn new(id: impl Into<String>, ident_screen_name: impl Into<String>, display_screen_name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);
        Self {
            id: id.into(),
            ident_screen_name: ident_screen_name.into(),
            display_screen_name: display_screen_name.into(),
            receive_tx: tx,
            receive_rx: Mutex::new(Some(rx)),
            closed: Notify::new(),
            closed_flag: AtomicBool::new(false),
            remote_addr: Mutex::new(None),
            rate_buckets: Mutex::new(HashMap::new()),
        }
    }

    /// A cloneable handle producers use to enqueue outbound SNACs. Never
    /// read from; only the owning dispatcher drains the matching receiver.
    pub fn sender(&self) -> mpsc::Sender<SnacMessage> {
        self.receive_tx.clone()
    }

    /// Take ownership of the receive side of `receive_queue`. Must be
    /// called exactly once, by the connection that registered this
    /// session; panics otherwise, since two dispatchers draining the same
    /// session would violate the single-reader invariant (§3).
    pub fn take_receiver(&self) -> mpsc::Receiver<SnacMessage> {
        self.receive_rx
            .lock()
            .take()
            .expect("Session::take_receiver called more than once")
    }

    pub fn set_remote_addr(&self, addr: SocketAddr) {
        *self.remote_addr.lock() = Some(addr);
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote_addr.lock()
    }

    /// Fire the one-shot "closed elsewhere" signal. Idempotent: firing it
    /// twice is harmless, only the first dispatcher awaiting it observes a
    /// wakeup per call but `is_closed` reflects the first firing either way.
    pub fn signal_closed(&self) {
        self.closed_flag.store(true, Ordering::SeqCst);
        self.closed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::SeqCst)
    }

    /// Await the forced-close signal. Returns immediately if it already
    /// fired before this call.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.notified().await;
    }

    /// Evaluate (and consume, on success) one token from the bucket for
    /// `rate_class_id`, creating it with the default config on first use.
    pub fn evaluate_rate_limit(&self, now: Instant, rate_class_id: RateClassId) -> RateLimitOutcome {
        let mut buckets = self.rate_buckets.lock();
        let bucket = buckets
            .entry(rate_class_id)
            .or_insert_with(|| TokenBucket::new(RateClassConfig::default(), now));
        bucket.evaluate(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_exhausts_then_recovers() {
        let session = Session::new("s1", "alice", "Alice");
        let class = RateClassId(1);
        let now = Instant::now();

        {
            let mut buckets = session.rate_buckets.lock();
            buckets.insert(
                class,
                TokenBucket::new(
                    RateClassConfig {
                        rate_per_sec: 1.0,
                        burst: 1.0,
                    },
                    now,
                ),
            );
        }

        assert_eq!(session.evaluate_rate_limit(now, class), RateLimitOutcome::Allowed);
        assert_eq!(session.evaluate_rate_limit(now, class), RateLimitOutcome::Limited);
        assert_eq!(
            session.evaluate_rate_limit(now + Duration::from_secs(2), class),
            RateLimitOutcome::Allowed
        );
    }

    #[tokio::test]
    async fn closed_signal_wakes_a_waiter() {
        let session = std::sync::Arc::new(Session::new("s1", "alice", "Alice"));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session.closed().await;
            })
        };
        tokio::task::yield_now().await;
        session.signal_closed();
        waiter.await.unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn receive_queue_is_fifo_across_producers() {
        let session = Session::new("s1", "alice", "Alice");
        let mut rx = session.take_receiver();
        let tx = session.sender();

        tx.send(SnacMessage::new(oscar_types::SnacFrame::new(1, 1, 1), vec![1]))
            .await
            .unwrap();
        tx.send(SnacMessage::new(oscar_types::SnacFrame::new(1, 1, 2), vec![2]))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().frame.request_id, 1);
        assert_eq!(rx.recv().await.unwrap().frame.request_id, 2);
    }

    #[test]
    #[should_panic(expected = "called more than once")]
    fn take_receiver_twice_panics() {
        let session = Session::new("s1", "alice", "Alice");
        let _first = session.take_receiver();
        let _second = session.take_receiver();
    }
}
