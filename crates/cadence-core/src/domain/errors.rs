//! Error taxonomy for the engine.
//!
//! Two layers, deliberately separate:
//! - `EngineError`: faults of the machinery (registry, codec, transport,
//!   store). These surface to the caller of the engine API.
//! - `TaskError`: faults raised by a task handler. These never cross the
//!   engine boundary directly; the worker folds them into the invocation's
//!   `TaskResult` (RETRY or FAILURE) and the pool keeps running.

use thiserror::Error;

/// Engine-level error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task already registered: {0}")]
    DuplicateHandler(String),

    #[error("no handler registered for task: {0}")]
    HandlerNotFound(String),

    /// Rejected at submit time; the caller handed us something that cannot
    /// be represented on the wire.
    #[error("unserializable value: {0}")]
    UnserializableValue(String),

    /// Malformed bytes off the transport. Permanent: ack and drop, never
    /// retried.
    #[error("corrupt envelope: {0}")]
    CorruptEnvelope(String),

    #[error("empty workflow node: {0}")]
    EmptyWorkflow(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("result store: {0}")]
    Store(String),
}

/// Handler-level error, classified for the retry policy.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Worth retrying under the invocation's backoff policy.
    #[error("{0}")]
    Retryable(String),

    /// Immediate FAILURE, no retry.
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
