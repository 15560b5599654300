//! Demo binary: a simulated email service on top of the engine.
//!
//! Registers a handful of email tasks (flaky SMTP included), starts a worker
//! pool and the beat, then walks through the three submission shapes: a
//! single send, a bulk group, and a campaign chord whose callback chain
//! collects stats, builds a report, and notifies the admin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use cadence_core::coordinator::WorkflowCoordinator;
use cadence_core::impls::{InMemoryResultStore, InMemoryScheduleStore, InMemoryTransport};
use cadence_core::ports::{ResultStore, Transport};
use cadence_core::{
    Beat, Dispatcher, EngineConfig, EngineError, Invocation, InvocationId, RetryPolicy,
    ScheduleEntry, TaskError, TaskHandler, TaskRegistry, WorkerRuntime, WorkflowNode,
};

/// Simulated SMTP send: a short delay, then a dice roll against
/// `failure_rate`. Failures are transient, so they are retryable.
struct SendEmail {
    failure_rate: f64,
    latency: Duration,
}

#[async_trait]
impl TaskHandler for SendEmail {
    async fn run(&self, _args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
        let to = kwargs
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::fatal("missing recipient"))?;
        let subject = kwargs
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");

        tokio::time::sleep(self.latency).await;
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(TaskError::retryable(format!(
                "smtp: connection reset while sending to {to}"
            )));
        }

        tracing::info!(to, subject, "email sent");
        Ok(json!({ "to": to, "subject": subject, "status": "sent" }))
    }
}

/// Chord callback step 1: summarize the header's send results. The leading
/// argument is the collected array (absent when fired standalone by the
/// beat, in which case there is simply nothing to count).
struct CollectStats;

#[async_trait]
impl TaskHandler for CollectStats {
    async fn run(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
        let sends = args.first().and_then(Value::as_array).cloned().unwrap_or_default();
        let sent = sends
            .iter()
            .filter(|s| s.get("status").and_then(Value::as_str) == Some("sent"))
            .count();
        Ok(json!({ "sent": sent, "total": sends.len() }))
    }
}

#[derive(Debug, Deserialize)]
struct CampaignStats {
    sent: u64,
    total: u64,
}

/// Chord callback step 2: render the stats into a one-line report.
struct BuildReport;

#[async_trait]
impl TaskHandler for BuildReport {
    async fn run(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
        let stats = args.first().cloned().unwrap_or(json!({}));
        let stats: CampaignStats = serde_json::from_value(stats)
            .map_err(|e| TaskError::fatal(format!("malformed stats: {e}")))?;
        Ok(json!(format!(
            "campaign report: {}/{} delivered",
            stats.sent, stats.total
        )))
    }
}

/// Chord callback step 3: deliver the report to the admin.
struct NotifyAdmin;

#[async_trait]
impl TaskHandler for NotifyAdmin {
    async fn run(&self, args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
        let report = args.first().and_then(Value::as_str).unwrap_or("(empty report)");
        tracing::info!(report, "admin notified");
        Ok(json!({ "notified": true }))
    }
}

fn send_kwargs(to: &str, subject: &str) -> Map<String, Value> {
    let mut kwargs = Map::new();
    kwargs.insert("to".to_string(), json!(to));
    kwargs.insert("subject".to_string(), json!(subject));
    kwargs
}

async fn wait_for(
    dispatcher: &Dispatcher,
    id: InvocationId,
) -> Result<(), EngineError> {
    loop {
        if let Some(row) = dispatcher.get_result(id).await? {
            if row.state.is_terminal() {
                tracing::info!(%id, state = ?row.state, value = ?row.value, error = ?row.error, "terminal");
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig::from_env()?;

    let mut registry = TaskRegistry::new();
    registry.register(
        "send_email",
        Arc::new(SendEmail {
            failure_rate: 0.3,
            latency: Duration::from_millis(40),
        }),
        RetryPolicy {
            max_retries: config.max_retries,
            // Seconds-scale backoff would stall a demo run.
            backoff: cadence_core::BackoffPolicy::fixed(Duration::from_millis(100)),
            timeout: Some(Duration::from_secs(5)),
        },
    )?;
    registry.register("collect_stats", Arc::new(CollectStats), RetryPolicy::none())?;
    registry.register("build_report", Arc::new(BuildReport), RetryPolicy::none())?;
    registry.register("notify_admin", Arc::new(NotifyAdmin), RetryPolicy::none())?;
    let registry = Arc::new(registry);

    let transport = Arc::new(InMemoryTransport::default());
    let store = Arc::new(InMemoryResultStore::new(Some(config.result_ttl)));
    let coordinator = Arc::new(WorkflowCoordinator::new(
        transport.clone() as Arc<dyn Transport>,
        store.clone() as Arc<dyn ResultStore>,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        transport.clone(),
        store.clone(),
        coordinator.clone(),
    ));

    let pool = WorkerRuntime::new(
        transport.clone(),
        store.clone(),
        registry,
        coordinator,
    )
    .with_default_timeout(config.task_timeout)
    .spawn(config.concurrency);
    tracing::info!(concurrency = config.concurrency, "worker pool started");

    let beat = Beat::new(dispatcher.clone(), Arc::new(InMemoryScheduleStore::new()))
        .add_entry(ScheduleEntry::new(
            "periodic-stats",
            Duration::from_secs(300),
            "collect_stats",
        ))
        .add_entry(
            ScheduleEntry::new(
                "daily-reminder",
                Duration::from_secs(86400),
                "send_email",
            )
            .with_kwargs(send_kwargs("inactive@example.com", "We miss you")),
        )
        .spawn();

    // 1. A single transactional send.
    let welcome = dispatcher
        .submit(
            "send_email",
            vec![],
            send_kwargs("alice@example.com", "Welcome aboard"),
        )
        .await?;
    wait_for(&dispatcher, welcome).await?;

    // 2. A bulk batch: independent sends running in parallel.
    let recipients = ["bob", "carol", "dave", "erin"];
    let batch = dispatcher
        .submit_workflow(WorkflowNode::group(
            recipients
                .iter()
                .map(|name| {
                    WorkflowNode::single(Invocation::new(
                        "send_email",
                        vec![],
                        send_kwargs(&format!("{name}@example.com"), "Monthly newsletter"),
                    ))
                })
                .collect(),
        ))
        .await?;
    wait_for(&dispatcher, batch).await?;

    // 3. A campaign: chord over the sends, callback chain
    //    collect_stats -> build_report -> notify_admin.
    let header = recipients
        .iter()
        .map(|name| {
            WorkflowNode::single(Invocation::new(
                "send_email",
                vec![],
                send_kwargs(&format!("{name}@example.com"), "Product launch"),
            ))
        })
        .collect();
    let callback = WorkflowNode::chain(vec![
        WorkflowNode::single(Invocation::new("collect_stats", vec![], Map::new())),
        WorkflowNode::single(Invocation::new("build_report", vec![], Map::new())),
        WorkflowNode::single(Invocation::new("notify_admin", vec![], Map::new())),
    ]);
    let campaign = dispatcher
        .submit_workflow(WorkflowNode::chord(header, callback))
        .await?;
    wait_for(&dispatcher, campaign).await?;

    let counts = store.counts_by_state().await;
    tracing::info!(?counts, "final result store counts");

    beat.shutdown_and_join().await;
    transport.close().await;
    pool.shutdown_and_join().await;
    Ok(())
}
