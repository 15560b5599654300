//! Invocation: one requested execution of a named task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backoff::BackoffPolicy;
use super::ids::InvocationId;

/// A single requested execution of one named task with arguments.
///
/// Design:
/// - Immutable after creation except `retries_done`, which only the worker
///   runtime increments, exactly once per retry attempt.
/// - Arguments are `serde_json::Value` so the envelope codec round-trips
///   every supported value shape without a per-task schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    id: InvocationId,
    task_name: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    retries_done: u32,
    max_retries: u32,
    backoff: BackoffPolicy,
    created_at: DateTime<Utc>,
    parent_workflow: Option<InvocationId>,
}

impl Invocation {
    pub fn new(task_name: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: InvocationId::generate(),
            task_name: task_name.into(),
            args,
            kwargs,
            retries_done: 0,
            max_retries: 0,
            backoff: BackoffPolicy::default(),
            created_at: Utc::now(),
            parent_workflow: None,
        }
    }

    pub fn with_retry(mut self, max_retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn with_parent_workflow(mut self, root: InvocationId) -> Self {
        self.parent_workflow = Some(root);
        self
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub fn retries_done(&self) -> u32 {
        self.retries_done
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn parent_workflow(&self) -> Option<InvocationId> {
        self.parent_workflow
    }

    /// Whether another retry may be scheduled after a retryable failure.
    pub fn retries_left(&self) -> bool {
        self.retries_done < self.max_retries
    }

    /// Record one retry attempt. Worker runtime only.
    pub fn record_retry(&mut self) {
        self.retries_done += 1;
    }

    /// Insert a leading positional argument (chain/chord result threading).
    pub fn prepend_arg(&mut self, value: Value) {
        self.args.insert(0, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_invocation_starts_clean() {
        let inv = Invocation::new("send_email", vec![json!("a@b.c")], Map::new());
        assert_eq!(inv.task_name(), "send_email");
        assert_eq!(inv.retries_done(), 0);
        assert!(inv.parent_workflow().is_none());
    }

    #[test]
    fn record_retry_increments_once() {
        let mut inv = Invocation::new("t", vec![], Map::new())
            .with_retry(3, BackoffPolicy::default());
        assert!(inv.retries_left());
        inv.record_retry();
        inv.record_retry();
        inv.record_retry();
        assert_eq!(inv.retries_done(), 3);
        assert!(!inv.retries_left());
    }

    #[test]
    fn prepend_arg_leads() {
        let mut inv = Invocation::new("t", vec![json!(2), json!(3)], Map::new());
        inv.prepend_arg(json!(1));
        assert_eq!(inv.args(), &[json!(1), json!(2), json!(3)]);
    }
}
