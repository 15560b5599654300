//! Beat: periodic task submission.
//!
//! The beat owns a static table of schedule entries and a `ScheduleStore`
//! recording when each entry last fired. An entry is due when a full period
//! has elapsed since its last firing (or it has never fired). Firing records
//! the *current* time, so a beat that was down for several periods catches
//! up with exactly one firing instead of replaying every missed tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::ports::ScheduleStore;

/// One row of the schedule table: submit `task_name` every `every`.
#[derive(Clone)]
pub struct ScheduleEntry {
    name: String,
    every: Duration,
    task_name: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, every: Duration, task_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            every,
            task_name: task_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn due(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last {
            None => true,
            // to_std fails only when last is in the future; not due then.
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.every),
        }
    }
}

/// The scheduler itself. Build, add entries, then `spawn`.
pub struct Beat {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn ScheduleStore>,
    entries: Vec<ScheduleEntry>,
    tick: Duration,
}

impl Beat {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            dispatcher,
            store,
            entries: Vec::new(),
            tick: Duration::from_secs(1),
        }
    }

    /// How often the schedule table is scanned for due entries.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn add_entry(mut self, entry: ScheduleEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn spawn(self) -> BeatHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        BeatHandle { shutdown_tx, join }
    }

    async fn run(self, shutdown_rx: &mut watch::Receiver<bool>) {
        tracing::info!(entries = self.entries.len(), "beat started");
        loop {
            self.fire_due(Utc::now()).await;

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        tracing::debug!("beat stopped");
    }

    async fn fire_due(&self, now: DateTime<Utc>) {
        for entry in &self.entries {
            let last = match self.store.last_fired(&entry.name).await {
                Ok(last) => last,
                Err(error) => {
                    tracing::error!(entry = entry.name, %error, "schedule store read failed");
                    continue;
                }
            };
            if !entry.due(last, now) {
                continue;
            }

            match self
                .dispatcher
                .submit(&entry.task_name, entry.args.clone(), entry.kwargs.clone())
                .await
            {
                Ok(id) => {
                    tracing::info!(entry = entry.name, %id, "beat fired");
                }
                Err(error) => {
                    // Recorded below anyway: a failing entry retries next
                    // period, not on every tick.
                    tracing::error!(entry = entry.name, %error, "beat submission failed");
                }
            }

            if let Err(error) = self.store.record_fired(&entry.name, now).await {
                tracing::error!(entry = entry.name, %error, "schedule store write failed");
            }
        }
    }
}

/// Handle to a running beat.
pub struct BeatHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl BeatHandle {
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::WorkflowCoordinator;
    use crate::domain::TaskError;
    use crate::impls::{InMemoryResultStore, InMemoryScheduleStore, InMemoryTransport};
    use crate::ports::{ResultStore, Transport};
    use crate::registry::{RetryPolicy, TaskHandler, TaskRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(&self, _args: &[Value], _kwargs: &Map<String, Value>) -> Result<Value, TaskError> {
            Ok(json!(true))
        }
    }

    fn rig() -> (Arc<Dispatcher>, Arc<InMemoryTransport>, Arc<InMemoryScheduleStore>) {
        let mut registry = TaskRegistry::new();
        registry
            .register("report", Arc::new(OkHandler), RetryPolicy::none())
            .unwrap();

        let transport = Arc::new(InMemoryTransport::default());
        let store = Arc::new(InMemoryResultStore::default());
        let coordinator = Arc::new(WorkflowCoordinator::new(
            transport.clone() as Arc<dyn Transport>,
            store.clone() as Arc<dyn ResultStore>,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(registry),
            transport.clone(),
            store,
            coordinator,
        ));
        (dispatcher, transport, Arc::new(InMemoryScheduleStore::new()))
    }

    #[tokio::test]
    async fn fires_once_immediately_then_waits_a_full_period() {
        let (dispatcher, transport, schedule) = rig();

        let handle = Beat::new(dispatcher, schedule.clone())
            .with_tick(Duration::from_millis(10))
            .add_entry(ScheduleEntry::new(
                "hourly-report",
                Duration::from_secs(3600),
                "report",
            ))
            .spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown_and_join().await;

        // Many ticks elapsed, but only the first scan was due.
        assert_eq!(transport.depth().await.ready, 1);
        assert!(schedule.last_fired("hourly-report").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refires_after_each_period() {
        let (dispatcher, transport, schedule) = rig();

        let handle = Beat::new(dispatcher, schedule)
            .with_tick(Duration::from_millis(10))
            .add_entry(ScheduleEntry::new(
                "fast",
                Duration::from_millis(80),
                "report",
            ))
            .spawn();

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.shutdown_and_join().await;

        let fired = transport.depth().await.ready;
        assert!((2..=6).contains(&fired), "fired {fired} times");
    }

    #[tokio::test]
    async fn missed_periods_collapse_into_a_single_catch_up_firing() {
        let (dispatcher, transport, schedule) = rig();

        // Last fired three and a half periods ago (the beat was down).
        let period = Duration::from_secs(600);
        schedule
            .record_fired(
                "report-run",
                Utc::now() - chrono::Duration::seconds(2100),
            )
            .await
            .unwrap();

        let handle = Beat::new(dispatcher, schedule.clone())
            .with_tick(Duration::from_millis(10))
            .add_entry(ScheduleEntry::new("report-run", period, "report"))
            .spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown_and_join().await;

        // One catch-up firing, and the clock restarts from now.
        assert_eq!(transport.depth().await.ready, 1);
        let last = schedule.last_fired("report-run").await.unwrap().unwrap();
        assert!(Utc::now().signed_duration_since(last).num_seconds() < 10);
    }

    #[tokio::test]
    async fn entry_with_args_passes_them_through() {
        let (dispatcher, transport, schedule) = rig();

        let mut kwargs = Map::new();
        kwargs.insert("window".to_string(), json!("24h"));
        let handle = Beat::new(dispatcher, schedule)
            .with_tick(Duration::from_millis(10))
            .add_entry(
                ScheduleEntry::new("daily", Duration::from_secs(86400), "report")
                    .with_args(vec![json!("full")])
                    .with_kwargs(kwargs),
            )
            .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown_and_join().await;

        let delivery = transport.consume().await.unwrap();
        let invocation = crate::domain::envelope::decode(&delivery.payload).unwrap();
        assert_eq!(invocation.args(), &[json!("full")]);
        assert_eq!(invocation.kwargs().get("window"), Some(&json!("24h")));
    }
}
