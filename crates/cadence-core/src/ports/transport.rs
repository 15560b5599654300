//! Transport port: the durable, at-least-once queue beneath the engine.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::EngineError;

/// Opaque acknowledgement token for one delivery.
///
/// A redelivered message gets a fresh handle; acking a stale handle is a
/// no-op rather than an error, because the original consumer may race the
/// redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckHandle(u64);

impl AckHandle {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn tag(&self) -> u64 {
        self.0
    }
}

/// One message handed to a consumer.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub ack: AckHandle,
}

/// Queue transport port (interface).
///
/// Contract the engine depends on:
/// - `publish` is durable: once it returns Ok, at least one delivery of the
///   payload will occur (duplicates are possible).
/// - A delivery that is not acked within the transport's visibility timeout
///   becomes visible again for another consumer (crash recovery).
/// - `publish` with a delay keeps the message invisible until the delay
///   elapses (retry backoff scheduling).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload, optionally invisible for `delay`.
    async fn publish(&self, payload: Vec<u8>, delay: Option<Duration>) -> Result<(), EngineError>;

    /// Wait for the next visible message. Returns `None` once the transport
    /// is closed and drained of consumers.
    async fn consume(&self) -> Option<Delivery>;

    /// Acknowledge a delivery, removing it permanently.
    async fn ack(&self, handle: AckHandle) -> Result<(), EngineError>;
}
