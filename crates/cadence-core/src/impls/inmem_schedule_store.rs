//! In-memory schedule store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::EngineError;
use crate::ports::ScheduleStore;

/// In-memory `{entry -> last fired at}` map.
///
/// Survives beat restarts within one process (hand the same `Arc` to the
/// new beat); a production deployment would back this with durable storage.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    fired: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn last_fired(&self, entry: &str) -> Result<Option<DateTime<Utc>>, EngineError> {
        Ok(self.fired.lock().await.get(entry).copied())
    }

    async fn record_fired(&self, entry: &str, at: DateTime<Utc>) -> Result<(), EngineError> {
        self.fired.lock().await.insert(entry.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back() {
        let store = InMemoryScheduleStore::new();
        assert!(store.last_fired("daily").await.unwrap().is_none());

        let at = Utc::now();
        store.record_fired("daily", at).await.unwrap();
        assert_eq!(store.last_fired("daily").await.unwrap(), Some(at));
    }
}
