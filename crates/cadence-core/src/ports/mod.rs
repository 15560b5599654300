//! Ports: the interfaces the engine requires from its collaborators.
//!
//! The transport and result store are external systems in production (a
//! broker, a key-value store); `crate::impls` provides in-memory versions
//! for development and tests. The completion sink is the internal seam
//! between worker runtime and workflow coordinator.

pub mod completion;
pub mod result_store;
pub mod schedule_store;
pub mod transport;

pub use completion::{CompletionSink, NullSink, TerminalOutcome};
pub use result_store::ResultStore;
pub use schedule_store::ScheduleStore;
pub use transport::{AckHandle, Delivery, Transport};
