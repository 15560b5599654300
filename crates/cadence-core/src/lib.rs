//! Cadence: an asynchronous task-queue engine.
//!
//! Producers hand serializable invocations to the [`dispatcher::Dispatcher`];
//! a [`worker::WorkerPool`] consumes them off a [`ports::Transport`], runs the
//! registered handler under a watchdog timeout, retries with backoff, and
//! records the outcome in a [`ports::ResultStore`]. Workflow graphs (chains,
//! groups, chords) are interpreted by the [`coordinator::WorkflowCoordinator`],
//! and the [`beat::Beat`] submits tasks on a periodic schedule.
//!
//! The transport and stores are ports: trait objects with in-memory
//! implementations in [`impls`] for single-process use and tests.

pub mod beat;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod registry;
pub mod worker;

pub use beat::{Beat, BeatHandle, ScheduleEntry};
pub use config::EngineConfig;
pub use coordinator::WorkflowCoordinator;
pub use dispatcher::Dispatcher;
pub use domain::{
    BackoffPolicy, EngineError, Invocation, InvocationId, TaskError, TaskResult, TaskState,
    WorkflowNode,
};
pub use registry::{RetryPolicy, TaskHandler, TaskRegistry};
pub use worker::{WorkerPool, WorkerRuntime};
