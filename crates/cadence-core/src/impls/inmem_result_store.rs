//! In-memory result store implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{ChordId, EngineError, InvocationId, TaskResult, TaskState};
use crate::ports::ResultStore;

struct StoredRow {
    result: TaskResult,
    expires_at: Option<Instant>,
}

/// Join counter for one chord.
///
/// Mutated only under the store lock; `slots` holds outcomes at their
/// declared header index so collected results come out in declaration
/// order, not arrival order. The counter is removed the moment it fires,
/// which is what makes the callback fire at most once.
struct ChordCounter {
    expected: usize,
    arrived: usize,
    slots: Vec<Option<Value>>,
}

#[derive(Default)]
struct StoreState {
    results: HashMap<InvocationId, StoredRow>,
    chords: HashMap<ChordId, ChordCounter>,
}

/// Per-state row counts, for status displays and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub started: usize,
    pub retry: usize,
    pub success: usize,
    pub failure: usize,
}

/// In-memory result store.
pub struct InMemoryResultStore {
    state: Arc<Mutex<StoreState>>,

    /// TTL applied to every row on write; `None` keeps rows forever.
    ttl: Option<Duration>,
}

impl InMemoryResultStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            ttl,
        }
    }

    pub async fn counts_by_state(&self) -> StateCounts {
        let state = self.state.lock().await;
        let mut counts = StateCounts::default();
        for row in state.results.values() {
            match row.result.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Started => counts.started += 1,
                TaskState::Retry => counts.retry += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Failure => counts.failure += 1,
            }
        }
        counts
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, id: InvocationId) -> Result<Option<TaskResult>, EngineError> {
        let mut state = self.state.lock().await;
        let expired = matches!(
            state.results.get(&id),
            Some(row) if row.expires_at.is_some_and(|at| at <= Instant::now())
        );
        if expired {
            state.results.remove(&id);
            return Ok(None);
        }
        Ok(state.results.get(&id).map(|row| row.result.clone()))
    }

    async fn set(&self, result: TaskResult) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        state
            .results
            .insert(result.invocation_id, StoredRow { result, expires_at });
        Ok(())
    }

    async fn init_chord(&self, chord: ChordId, expected: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.chords.contains_key(&chord) {
            return Err(EngineError::Store(format!(
                "chord counter already initialized: {chord}"
            )));
        }
        state.chords.insert(
            chord,
            ChordCounter {
                expected,
                arrived: 0,
                slots: vec![None; expected],
            },
        );
        Ok(())
    }

    async fn record_chord_arrival(
        &self,
        chord: ChordId,
        index: usize,
        outcome: Value,
    ) -> Result<Option<Vec<Value>>, EngineError> {
        let mut state = self.state.lock().await;
        let Some(counter) = state.chords.get_mut(&chord) else {
            // Counter already fired (and was destroyed), or never existed.
            // Duplicate terminal signals land here; they must not re-fire.
            return Ok(None);
        };
        if index >= counter.expected {
            return Err(EngineError::Store(format!(
                "chord {chord}: arrival index {index} out of range ({} expected)",
                counter.expected
            )));
        }
        if counter.slots[index].is_some() {
            // Duplicate arrival for this header member.
            return Ok(None);
        }

        counter.slots[index] = Some(outcome);
        counter.arrived += 1;
        if counter.arrived < counter.expected {
            return Ok(None);
        }

        // Last arrival: fire exactly once and destroy the counter.
        let counter = state
            .chords
            .remove(&chord)
            .ok_or_else(|| EngineError::Store(format!("chord counter vanished: {chord}")))?;
        let collected = counter
            .slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Value::Null))
            .collect();
        Ok(Some(collected))
    }

    async fn purge_expired(&self) -> Result<usize, EngineError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let before = state.results.len();
        state
            .results
            .retain(|_, row| !row.expires_at.is_some_and(|at| at <= now));
        Ok(before - state.results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = InMemoryResultStore::default();
        let id = InvocationId::generate();
        store.set(TaskResult::pending(id)).await.unwrap();

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn rows_expire_after_ttl() {
        let store = InMemoryResultStore::new(Some(Duration::from_millis(30)));
        let id = InvocationId::generate();
        store.set(TaskResult::success(id, json!(1))).await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_rows() {
        let store = InMemoryResultStore::new(Some(Duration::from_millis(30)));
        let old = InvocationId::generate();
        store.set(TaskResult::success(old, json!(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Written after the sleep, still fresh.
        let fresh = InvocationId::generate();
        store.set(TaskResult::pending(fresh)).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get(fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn chord_collects_in_declared_order_and_fires_once() {
        let store = InMemoryResultStore::default();
        let chord = ChordId::generate();
        store.init_chord(chord, 3).await.unwrap();

        // Arrivals out of order: index 2 first, then 0, then 1.
        assert!(store
            .record_chord_arrival(chord, 2, json!("c"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .record_chord_arrival(chord, 0, json!("a"))
            .await
            .unwrap()
            .is_none());
        let collected = store
            .record_chord_arrival(chord, 1, json!("b"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(collected, vec![json!("a"), json!("b"), json!("c")]);

        // The counter is gone; late duplicates are silent no-ops.
        assert!(store
            .record_chord_arrival(chord, 1, json!("b"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_arrival_for_same_index_does_not_double_count() {
        let store = InMemoryResultStore::default();
        let chord = ChordId::generate();
        store.init_chord(chord, 2).await.unwrap();

        assert!(store
            .record_chord_arrival(chord, 0, json!(1))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .record_chord_arrival(chord, 0, json!(1))
            .await
            .unwrap()
            .is_none());

        let fired = store
            .record_chord_arrival(chord, 1, json!(2))
            .await
            .unwrap();
        assert_eq!(fired, Some(vec![json!(1), json!(2)]));
    }

    #[tokio::test]
    async fn concurrent_arrivals_fire_exactly_one_caller() {
        let store = Arc::new(InMemoryResultStore::default());
        let chord = ChordId::generate();
        let n = 16;
        store.init_chord(chord, n).await.unwrap();

        let mut joins = Vec::new();
        for i in 0..n {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store
                    .record_chord_arrival(chord, i, json!(i))
                    .await
                    .unwrap()
            }));
        }

        let mut fired = 0;
        for join in joins {
            if join.await.unwrap().is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}
