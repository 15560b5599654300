//! Dispatcher: producer-side submission.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::coordinator::WorkflowCoordinator;
use crate::domain::{EngineError, Invocation, InvocationId, TaskResult, WorkflowNode, envelope};
use crate::ports::{ResultStore, Transport};
use crate::registry::TaskRegistry;

/// Write the initial PENDING row and hand the envelope to the transport.
///
/// Encoding happens first: an unserializable submission is rejected before
/// it leaves any trace in the store. Once this returns Ok, the transport
/// durably holds at least one delivery (at-least-once from the caller's
/// perspective).
pub(crate) async fn publish_invocation(
    transport: &dyn Transport,
    store: &dyn ResultStore,
    invocation: &Invocation,
    delay: Option<Duration>,
) -> Result<(), EngineError> {
    let bytes = envelope::encode(invocation)?;
    store.set(TaskResult::pending(invocation.id())).await?;
    transport.publish(bytes, delay).await
}

/// Producer-side entry point: builds invocations (applying each task's
/// registered retry policy), enqueues them, and launches workflow graphs.
///
/// `submit` never blocks on execution; it returns as soon as the envelope
/// is on the transport.
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResultStore>,
    coordinator: Arc<WorkflowCoordinator>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResultStore>,
        coordinator: Arc<WorkflowCoordinator>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
            coordinator,
        }
    }

    /// Build an invocation for a registered task, applying its retry
    /// policy. Fails fast on unknown task names, before anything is
    /// enqueued.
    pub fn invocation(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Invocation, EngineError> {
        let entry = self.registry.resolve(task_name)?;
        let policy = entry.policy();
        Ok(Invocation::new(task_name, args, kwargs)
            .with_retry(policy.max_retries, policy.backoff.clone()))
    }

    /// Submit a single task. Returns its invocation id immediately.
    pub async fn submit(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<InvocationId, EngineError> {
        let invocation = self.invocation(task_name, args, kwargs)?;
        publish_invocation(
            self.transport.as_ref(),
            self.store.as_ref(),
            &invocation,
            None,
        )
        .await?;
        tracing::info!(task = task_name, id = %invocation.id(), "task submitted");
        Ok(invocation.id())
    }

    /// Submit a workflow graph. Returns the id of the root node, whose
    /// result ultimately represents the workflow's outcome.
    pub async fn submit_workflow(&self, node: WorkflowNode) -> Result<InvocationId, EngineError> {
        let root = self.coordinator.launch(node).await?;
        tracing::info!(id = %root, "workflow submitted");
        Ok(root)
    }

    /// Status polling; never raises a handler fault, failures surface only
    /// as `TaskResult { state: FAILURE, .. }`.
    pub async fn get_result(&self, id: InvocationId) -> Result<Option<TaskResult>, EngineError> {
        self.store.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::impls::{InMemoryResultStore, InMemoryTransport};
    use crate::registry::{RetryPolicy, TaskHandler};
    use async_trait::async_trait;
    use crate::domain::TaskError;
    use serde_json::json;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
            Ok(json!(true))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<InMemoryTransport>, Arc<InMemoryResultStore>) {
        let mut registry = TaskRegistry::new();
        registry
            .register("ok", Arc::new(OkHandler), RetryPolicy::default())
            .unwrap();

        let transport = Arc::new(InMemoryTransport::default());
        let store = Arc::new(InMemoryResultStore::default());
        let coordinator = Arc::new(WorkflowCoordinator::new(
            transport.clone() as Arc<dyn Transport>,
            store.clone() as Arc<dyn ResultStore>,
        ));
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            transport.clone(),
            store.clone(),
            coordinator,
        );
        (dispatcher, transport, store)
    }

    #[tokio::test]
    async fn submit_writes_pending_and_enqueues_one_envelope() {
        let (dispatcher, transport, _store) = dispatcher();

        let id = dispatcher.submit("ok", vec![json!(1)], Map::new()).await.unwrap();

        let row = dispatcher.get_result(id).await.unwrap().unwrap();
        assert_eq!(row.state, TaskState::Pending);
        assert_eq!(transport.depth().await.ready, 1);
    }

    #[tokio::test]
    async fn submit_applies_registered_retry_policy() {
        let (dispatcher, _transport, _store) = dispatcher();
        let inv = dispatcher.invocation("ok", vec![], Map::new()).unwrap();
        assert_eq!(inv.max_retries(), 3);
    }

    #[tokio::test]
    async fn unknown_task_fails_before_enqueueing() {
        let (dispatcher, transport, _store) = dispatcher();

        let err = dispatcher.submit("missing", vec![], Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::HandlerNotFound(_)));
        assert_eq!(transport.depth().await.ready, 0);
    }
}
