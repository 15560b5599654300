//! Worker runtime: consumes envelopes and executes handlers.
//!
//! A pool of N worker loops, each holding at most one delivery at a time,
//! so total prefetch is bounded by N and one busy worker cannot hoard work.
//! Handler faults never escape a slot: every outcome is folded into the
//! invocation's result row, and the pool keeps running.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{EngineError, TaskError, TaskResult, envelope};
use crate::ports::{CompletionSink, Delivery, ResultStore, TerminalOutcome, Transport};
use crate::registry::TaskRegistry;

/// Shared execution context for the worker loops.
pub struct WorkerRuntime {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResultStore>,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn CompletionSink>,

    /// Watchdog budget for tasks whose policy has no override.
    default_timeout: Duration,
}

impl WorkerRuntime {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResultStore>,
        registry: Arc<TaskRegistry>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            transport,
            store,
            registry,
            sink,
            default_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Spawn `concurrency` worker loops.
    pub fn spawn(self, concurrency: usize) -> WorkerPool {
        WorkerPool::spawn(concurrency, Arc::new(self))
    }

    /// Handle one delivery end to end. Every path acks: a message is only
    /// redelivered by the transport if this process dies mid-flight.
    async fn process(&self, delivery: Delivery) -> Result<(), EngineError> {
        let ack = delivery.ack;

        let invocation = match envelope::decode(&delivery.payload) {
            Ok(invocation) => invocation,
            Err(error) => {
                // Permanent: ack so the broker never redelivers garbage.
                let description = error.to_string();
                if let Some(id) = envelope::salvage_id(&delivery.payload) {
                    self.store
                        .set(TaskResult::failure(id, description.as_str()))
                        .await?;
                    self.transport.ack(ack).await?;
                    self.sink
                        .on_terminal(id, TerminalOutcome::Failure(description))
                        .await;
                } else {
                    tracing::error!(error = %description, "dropping undecodable envelope");
                    self.transport.ack(ack).await?;
                }
                return Ok(());
            }
        };
        let id = invocation.id();

        // Advisory idempotency: a duplicate delivery of an invocation that
        // already reached a terminal state is acked and skipped.
        if let Some(existing) = self.store.get(id).await? {
            if existing.state.is_terminal() {
                tracing::debug!(%id, "duplicate delivery of terminal invocation, skipping");
                return self.transport.ack(ack).await;
            }
        }

        let entry = match self.registry.resolve(invocation.task_name()) {
            Ok(entry) => entry,
            Err(error) => {
                let description = error.to_string();
                self.store
                    .set(TaskResult::failure(id, description.as_str()))
                    .await?;
                self.transport.ack(ack).await?;
                self.sink
                    .on_terminal(id, TerminalOutcome::Failure(description))
                    .await;
                return Ok(());
            }
        };
        let handler = entry.handler();
        let budget = entry.policy().timeout.unwrap_or(self.default_timeout);

        self.store.set(TaskResult::started(id)).await?;

        let verdict: Result<Value, TaskError> = match tokio::time::timeout(
            budget,
            handler.run(invocation.args(), invocation.kwargs()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TaskError::retryable(format!(
                "timed out after {budget:?}"
            ))),
        };

        match verdict {
            Ok(value) => {
                self.store.set(TaskResult::success(id, value.clone())).await?;
                self.transport.ack(ack).await?;
                self.sink
                    .on_terminal(id, TerminalOutcome::Success(value))
                    .await;
            }
            Err(error) if error.is_retryable() && invocation.retries_left() => {
                let mut retry = invocation;
                retry.record_retry();
                let description = error.to_string();
                self.store
                    .set(TaskResult::retry(id, description.as_str()))
                    .await?;

                let delay = retry.backoff().delay_for(retry.retries_done());
                let bytes = envelope::encode(&retry)?;
                // Re-publish before acking the original: there is never a
                // moment with zero copies on the transport.
                self.transport.publish(bytes, Some(delay)).await?;
                self.transport.ack(ack).await?;
                tracing::warn!(
                    task = retry.task_name(),
                    %id,
                    retries = retry.retries_done(),
                    delay_ms = delay.as_millis() as u64,
                    error = %description,
                    "retry scheduled"
                );
            }
            Err(error) => {
                let description = error.to_string();
                self.store
                    .set(TaskResult::failure(id, description.as_str()))
                    .await?;
                self.transport.ack(ack).await?;
                tracing::error!(task = invocation.task_name(), %id, error = %description, "task failed");
                self.sink
                    .on_terminal(id, TerminalOutcome::Failure(description))
                    .await;
            }
        }
        Ok(())
    }
}

/// Worker pool handle.
/// - `request_shutdown` stops taking new deliveries; in-flight handlers
///   run to completion.
/// - `shutdown_and_join` waits for every loop to exit.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(concurrency: usize, runtime: Arc<WorkerRuntime>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let runtime = Arc::clone(&runtime);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, runtime, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    runtime: Arc<WorkerRuntime>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let delivery = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            delivery = runtime.transport.consume() => delivery,
        };

        // None: the transport was closed.
        let Some(delivery) = delivery else { break };

        if let Err(error) = runtime.process(delivery).await {
            tracing::error!(worker_id, %error, "delivery processing failed");
        }
    }
    tracing::debug!(worker_id, "worker loop stopped");
}
