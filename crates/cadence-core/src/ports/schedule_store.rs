//! Schedule store port: beat's persisted last-fired timestamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::EngineError;

/// Persisted `{entry name -> last fired at}` surviving process restarts.
///
/// Single-writer: exactly one beat process may write a given store. The
/// engine does not arbitrate this; deploy one beat (or put a leader lock in
/// front of it).
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn last_fired(&self, entry: &str) -> Result<Option<DateTime<Utc>>, EngineError>;

    async fn record_fired(&self, entry: &str, at: DateTime<Utc>) -> Result<(), EngineError>;
}
