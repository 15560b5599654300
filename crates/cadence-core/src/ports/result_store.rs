//! Result store port: per-invocation state + chord counters.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ChordId, EngineError, InvocationId, TaskResult};

/// Key-value store keyed by invocation id, with TTL, plus the atomic chord
/// counter primitive.
///
/// The chord counter lives here and not in coordinator memory because
/// worker runtimes are independent processes: the increment-and-compare
/// must be atomic across all of them. `record_chord_arrival` is the
/// correctness mechanism that makes a chord callback fire exactly once.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, id: InvocationId) -> Result<Option<TaskResult>, EngineError>;

    async fn set(&self, result: TaskResult) -> Result<(), EngineError>;

    /// Create the counter for a chord with `expected` header members.
    async fn init_chord(&self, chord: ChordId, expected: usize) -> Result<(), EngineError>;

    /// Record one header member's terminal outcome at its declared index.
    ///
    /// Returns `Some(collected)` — the outcomes in header declaration
    /// order — to exactly one caller: the one whose arrival completes the
    /// counter. Every other call (earlier arrivals, duplicate signals for
    /// an index, signals after firing) returns `None`. The counter is
    /// destroyed once it fires.
    async fn record_chord_arrival(
        &self,
        chord: ChordId,
        index: usize,
        outcome: Value,
    ) -> Result<Option<Vec<Value>>, EngineError>;

    /// Drop expired rows; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, EngineError>;
}
