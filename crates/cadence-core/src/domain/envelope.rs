//! Envelope codec: the wire representation of an invocation.
//!
//! JSON bytes, nothing clever. The contract that matters:
//! - `decode(encode(inv)) == inv` for every supported argument shape
//!   (null, bool, integer, float, string, sequence, string-keyed map,
//!   recursively).
//! - Encode failure is `UnserializableValue`, surfaced at submit time.
//! - Decode failure is `CorruptEnvelope`: the worker treats it as permanent,
//!   acks the message, and never retries (dead-letter, not redelivery loop).

use serde::Serialize;
use serde_json::Value;

use super::errors::EngineError;
use super::ids::InvocationId;
use super::invocation::Invocation;

pub fn encode(invocation: &Invocation) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec(invocation).map_err(|e| EngineError::UnserializableValue(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Invocation, EngineError> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::CorruptEnvelope(e.to_string()))
}

/// Convert a caller-supplied argument into a wire value.
///
/// This is where a live resource handle (or any other unsupported type)
/// gets rejected, before anything touches the transport.
pub fn to_arg<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::UnserializableValue(e.to_string()))
}

/// Best-effort id recovery from bytes that failed to decode.
///
/// A partially mangled envelope may still carry a readable `id` field; if
/// so, the worker can record a FAILURE row against it instead of dropping
/// the invocation without a trace.
pub fn salvage_id(bytes: &[u8]) -> Option<InvocationId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}
