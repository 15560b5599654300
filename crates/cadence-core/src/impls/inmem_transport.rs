//! In-memory transport implementation.
//!
//! Development/test stand-in for a real broker. It still honors the full
//! transport contract: delayed visibility for backoff, and
//! redelivery-after-visibility-timeout for consumers that die before
//! acking.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::EngineError;
use crate::ports::{AckHandle, Delivery, Transport};

/// Message parked until its visibility time.
///
/// Ordered so `BinaryHeap` acts as a min-heap on `(due, seq)`; `seq` keeps
/// the order total for messages due at the same instant.
struct DelayedMessage {
    due: Instant,
    seq: u64,
    payload: Vec<u8>,
}

impl PartialEq for DelayedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedMessage {}

impl PartialOrd for DelayedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: earlier due times have higher priority.
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

struct InFlightMessage {
    payload: Vec<u8>,
    deadline: Instant,
}

struct TransportState {
    /// Visible messages, FIFO.
    ready: VecDeque<Vec<u8>>,

    /// Messages published with a delay, keyed by due time.
    delayed: BinaryHeap<DelayedMessage>,

    /// Delivered but unacked, keyed by delivery tag. Past the deadline the
    /// payload goes back to `ready` under a fresh tag.
    in_flight: HashMap<u64, InFlightMessage>,

    next_tag: u64,
    next_seq: u64,
    closed: bool,
}

impl TransportState {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            delayed: BinaryHeap::new(),
            in_flight: HashMap::new(),
            next_tag: 1,
            next_seq: 1,
            closed: false,
        }
    }

    /// Move due delayed messages and expired in-flight messages to ready.
    fn promote(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.due > now {
                break; // heap is sorted, nothing else is due
            }
            if let Some(entry) = self.delayed.pop() {
                self.ready.push_back(entry.payload);
            }
        }

        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in expired {
            if let Some(msg) = self.in_flight.remove(&tag) {
                // Redelivery: the old ack handle is dead from here on.
                self.ready.push_back(msg.payload);
            }
        }
    }

    /// Earliest instant at which something new becomes visible.
    fn next_wake(&self) -> Option<Instant> {
        let delayed = self.delayed.peek().map(|m| m.due);
        let in_flight = self.in_flight.values().map(|m| m.deadline).min();
        match (delayed, in_flight) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Snapshot of queue depths, for status displays and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportDepth {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
}

/// In-memory transport.
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemoryTransport {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::new())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    /// Close the transport: waiting consumers return `None`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn depth(&self) -> TransportDepth {
        let state = self.state.lock().await;
        TransportDepth {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, payload: Vec<u8>, delay: Option<Duration>) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(EngineError::Transport("transport closed".to_string()));
        }
        match delay {
            Some(d) if !d.is_zero() => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.delayed.push(DelayedMessage {
                    due: Instant::now() + d,
                    seq,
                    payload,
                });
            }
            _ => state.ready.push_back(payload),
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self) -> Option<Delivery> {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote(Instant::now());

                if let Some(payload) = state.ready.pop_front() {
                    let tag = state.next_tag;
                    state.next_tag += 1;
                    state.in_flight.insert(
                        tag,
                        InFlightMessage {
                            payload: payload.clone(),
                            deadline: Instant::now() + self.visibility_timeout,
                        },
                    );
                    if !state.ready.is_empty() {
                        // Wake the next consumer in line.
                        self.notify.notify_one();
                    }
                    return Some(Delivery {
                        payload,
                        ack: AckHandle::new(tag),
                    });
                }

                if state.closed {
                    return None;
                }

                state.next_wake()
            };

            // Wait for a publish/close notification OR the next deadline.
            if let Some(wake) = next_wake {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep_until(wake.into()) => {}
                }
            } else {
                self.notify.notified().await;
            }
        }
    }

    async fn ack(&self, handle: AckHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        // A stale handle (message already redelivered) is not an error.
        state.in_flight.remove(&handle.tag());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn consume_within(t: &InMemoryTransport, ms: u64) -> Option<Delivery> {
        timeout(Duration::from_millis(ms), t.consume())
            .await
            .expect("consume timed out")
    }

    #[tokio::test]
    async fn publish_then_consume_then_ack() {
        let t = InMemoryTransport::default();
        t.publish(b"hello".to_vec(), None).await.unwrap();

        let delivery = consume_within(&t, 100).await.unwrap();
        assert_eq!(delivery.payload, b"hello");
        t.ack(delivery.ack).await.unwrap();

        assert_eq!(t.depth().await, TransportDepth::default());
    }

    #[tokio::test]
    async fn delayed_message_stays_invisible_until_due() {
        let t = InMemoryTransport::default();
        t.publish(b"later".to_vec(), Some(Duration::from_millis(80)))
            .await
            .unwrap();

        let early = timeout(Duration::from_millis(30), t.consume()).await;
        assert!(early.is_err(), "message visible before its delay");

        let delivery = consume_within(&t, 200).await.unwrap();
        assert_eq!(delivery.payload, b"later");
    }

    #[tokio::test]
    async fn unacked_delivery_comes_back_after_visibility_timeout() {
        let t = InMemoryTransport::new(Duration::from_millis(50));
        t.publish(b"crashy".to_vec(), None).await.unwrap();

        let first = consume_within(&t, 100).await.unwrap();
        // Simulate a worker crash: never ack.
        drop(first);

        let second = consume_within(&t, 300).await.unwrap();
        assert_eq!(second.payload, b"crashy");
        t.ack(second.ack).await.unwrap();
        assert_eq!(t.depth().await.in_flight, 0);
    }

    #[tokio::test]
    async fn acked_delivery_is_never_redelivered() {
        let t = InMemoryTransport::new(Duration::from_millis(30));
        t.publish(b"once".to_vec(), None).await.unwrap();

        let delivery = consume_within(&t, 100).await.unwrap();
        t.ack(delivery.ack).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let again = timeout(Duration::from_millis(50), t.consume()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn stale_ack_is_a_noop() {
        let t = InMemoryTransport::new(Duration::from_millis(20));
        t.publish(b"m".to_vec(), None).await.unwrap();

        let first = consume_within(&t, 100).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Redelivered under a new tag; the old ack must not remove it.
        let second = consume_within(&t, 100).await.unwrap();
        assert_ne!(first.ack, second.ack);
        t.ack(first.ack).await.unwrap();
        assert_eq!(t.depth().await.in_flight, 1);
    }

    #[tokio::test]
    async fn close_unblocks_waiting_consumer() {
        let t = Arc::new(InMemoryTransport::default());
        let consumer = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.consume().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.close().await;
        let got = timeout(Duration::from_millis(200), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }
}
