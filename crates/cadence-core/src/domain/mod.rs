//! Domain model (ids, invocations, results, backoff, workflow graph).

pub mod backoff;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod invocation;
pub mod result;
pub mod workflow;

pub use backoff::BackoffPolicy;
pub use errors::{EngineError, TaskError};
pub use ids::{ChordId, InvocationId};
pub use invocation::Invocation;
pub use result::{TaskResult, TaskState};
pub use workflow::WorkflowNode;
