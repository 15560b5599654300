//! In-memory implementations of the ports, for development and tests.
//!
//! Production deployments put a real broker behind `Transport` and a real
//! key-value store behind `ResultStore`; these implementations exist so the
//! whole engine runs (and is tested) in a single process.

pub mod inmem_result_store;
pub mod inmem_schedule_store;
pub mod inmem_transport;

pub use inmem_result_store::{InMemoryResultStore, StateCounts};
pub use inmem_schedule_store::InMemoryScheduleStore;
pub use inmem_transport::{InMemoryTransport, TransportDepth};
