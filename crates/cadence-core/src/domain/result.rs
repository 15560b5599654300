//! Task result: the per-invocation row in the result store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::InvocationId;

/// Invocation state as seen by status queries.
///
/// Transitions are monotonic except the RETRY -> STARTED -> RETRY cycle:
/// - PENDING -> STARTED -> SUCCESS
/// - PENDING -> STARTED -> RETRY -> STARTED -> ... -> SUCCESS | FAILURE
/// - PENDING -> STARTED -> FAILURE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl TaskState {
    /// Terminal states remove the invocation from active consideration.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// Exactly one `TaskResult` row exists per invocation id at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub invocation_id: InvocationId,
    pub state: TaskState,

    /// Success payload.
    pub value: Option<Value>,

    /// Error description (FAILURE, or last error while in RETRY).
    pub error: Option<String>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn pending(invocation_id: InvocationId) -> Self {
        Self {
            invocation_id,
            state: TaskState::Pending,
            value: None,
            error: None,
            completed_at: None,
        }
    }

    pub fn started(invocation_id: InvocationId) -> Self {
        Self {
            invocation_id,
            state: TaskState::Started,
            value: None,
            error: None,
            completed_at: None,
        }
    }

    pub fn retry(invocation_id: InvocationId, error: impl Into<String>) -> Self {
        Self {
            invocation_id,
            state: TaskState::Retry,
            value: None,
            error: Some(error.into()),
            completed_at: None,
        }
    }

    pub fn success(invocation_id: InvocationId, value: Value) -> Self {
        Self {
            invocation_id,
            state: TaskState::Success,
            value: Some(value),
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn failure(invocation_id: InvocationId, error: impl Into<String>) -> Self {
        Self {
            invocation_id,
            state: TaskState::Failure,
            value: None,
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
        }
    }
}
