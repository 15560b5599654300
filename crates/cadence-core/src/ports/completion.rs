//! Completion sink port: worker -> coordinator terminal signals.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::domain::InvocationId;

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Success(Value),
    Failure(String),
}

impl TerminalOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Collapse into a plain value: failures become an error marker so a
    /// chord's collected results never block on a failed slot.
    pub fn into_value(self) -> Value {
        match self {
            Self::Success(value) => value,
            Self::Failure(error) => json!({ "error": error }),
        }
    }
}

/// Receives terminal signals from the worker runtime.
///
/// The worker fires this after writing the terminal `TaskResult` and acking
/// the delivery. Implementations must tolerate ids they know nothing about
/// (plain tasks outside any workflow) and duplicate signals (at-least-once
/// delivery implies at-least-once signaling).
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn on_terminal(&self, id: InvocationId, outcome: TerminalOutcome);
}

/// Sink that drops every signal. For workers that run no workflows.
pub struct NullSink;

#[async_trait]
impl CompletionSink for NullSink {
    async fn on_terminal(&self, _id: InvocationId, _outcome: TerminalOutcome) {}
}
