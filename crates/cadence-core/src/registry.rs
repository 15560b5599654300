//! Task registry: task name -> handler + retry policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::{BackoffPolicy, EngineError, TaskError};

/// A handler for a specific task name.
///
/// Handlers receive the invocation's positional and keyword arguments and
/// return a serializable result value. Errors are classified: `Retryable`
/// goes through the backoff policy, `Fatal` fails immediately.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskError>;
}

/// Per-task retry policy, fixed at registration time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,

    /// Watchdog timeout override; `None` uses the engine-wide default.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// No retries at all; first failure is final.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::default(),
            timeout: None,
        }
    }
}

/// One registered task.
pub struct RegisteredTask {
    handler: Arc<dyn TaskHandler>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RegisteredTask {
    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Registry of handlers.
///
/// Design:
/// - Built during startup (mutable), shared as `Arc` during operation
///   (immutable). No locks, no dynamic re-registration; changing the task
///   set means restarting the process.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        policy: RetryPolicy,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(EngineError::DuplicateHandler(name));
        }
        self.tasks.insert(name, RegisteredTask { handler, policy });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredTask, EngineError> {
        self.tasks
            .get(name)
            .ok_or_else(|| EngineError::HandlerNotFound(name.to_string()))
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
            Ok(json!(true))
        }
    }

    #[test]
    fn register_then_resolve() {
        let mut reg = TaskRegistry::new();
        reg.register("ok", Arc::new(OkHandler), RetryPolicy::default())
            .unwrap();

        let entry = reg.resolve("ok").unwrap();
        assert_eq!(entry.policy().max_retries, 3);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut reg = TaskRegistry::new();
        reg.register("ok", Arc::new(OkHandler), RetryPolicy::default())
            .unwrap();
        let err = reg
            .register("ok", Arc::new(OkHandler), RetryPolicy::none())
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateHandler(name) if name == "ok"));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let reg = TaskRegistry::new();
        let err = reg.resolve("missing").unwrap_err();
        assert!(matches!(err, EngineError::HandlerNotFound(name) if name == "missing"));
    }
}
