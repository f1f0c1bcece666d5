//! JSON value handling for recorded effects: serialization with a "live-only" escape hatch, and
//! error serialization with cycle-safe cause-chain walking.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

pub type JsonValue = serde_json::Value;

const LIVE_ONLY_MARKER: &str = "__live_only";
const LIVE_ONLY_TYPE: &str = "__type";
const LIVE_ONLY_STRING: &str = "__to_string";

/// Serializes `value`, falling back to a live-only sentinel when the value does not survive a
/// JSON round trip (e.g. it carries a non-serializable handle). The sentinel records the Rust
/// type name and a `Display`/`Debug`-derived string so history inspection tooling has something
/// readable, while replay still treats the recorded effect as opaque.
pub fn to_json<T: Serialize>(value: &T) -> JsonValue {
	match serde_json::to_value(value) {
		Ok(v) => v,
		Err(_) => live_only_sentinel(std::any::type_name::<T>(), &format!("{:?}", SkipDebug)),
	}
}

/// Same as [`to_json`] but takes an explicit display string, for callers that already know the
/// value cannot serialize (e.g. wrapping a raw handle) and want a meaningful sentinel.
pub fn to_json_opaque(type_name: &str, display: impl std::fmt::Display) -> JsonValue {
	live_only_sentinel(type_name, &display.to_string())
}

fn live_only_sentinel(type_name: &str, display: &str) -> JsonValue {
	serde_json::json!({
		LIVE_ONLY_MARKER: true,
		LIVE_ONLY_TYPE: type_name,
		LIVE_ONLY_STRING: display,
	})
}

pub fn is_live_only(value: &JsonValue) -> bool {
	value
		.as_object()
		.map(|obj| obj.get(LIVE_ONLY_MARKER).and_then(JsonValue::as_bool).unwrap_or(false))
		.unwrap_or(false)
}

pub fn from_json<T: DeserializeOwned>(value: &JsonValue) -> Result<T, serde_json::Error> {
	serde_json::from_value(value.clone())
}

struct SkipDebug;
impl std::fmt::Debug for SkipDebug {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "<unserializable value>")
	}
}

/// A serialized error, recorded in a `Next(status=err)` event.
///
/// Grounded on the cause-chain walk a `anyhow`/`thiserror` stack normally performs via
/// `std::error::Error::source`, generalized here to record the full chain so replay can
/// reconstruct a faithful (if inert) error value without holding onto the original type.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SerializedError {
	pub name: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cause: Option<Box<SerializedError>>,
}

impl SerializedError {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			cause: None,
		}
	}

	pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
		serialize_error_chain(err)
	}
}

impl std::fmt::Display for SerializedError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.name, self.message)?;
		if let Some(cause) = &self.cause {
			write!(f, " (caused by {})", cause)?;
		}
		Ok(())
	}
}

impl std::error::Error for SerializedError {}

/// Walks `err.source()` into a `SerializedError` chain. `std::error::Error::source` borrows with
/// the lifetime of the original error, so a literal reference cycle through this chain cannot be
/// constructed in safe Rust; we still cap recursion depth defensively rather than relying on that
/// guarantee alone, mirroring the spirit of the identity-set cycle guard used for cyclic payloads
/// below.
fn serialize_error_chain(err: &(dyn std::error::Error + 'static)) -> SerializedError {
	const MAX_DEPTH: usize = 32;

	fn go(err: &(dyn std::error::Error + 'static), depth: usize) -> SerializedError {
		let name = std::any::type_name_of_val(err).to_string();
		let message = err.to_string();
		if depth >= MAX_DEPTH {
			return SerializedError {
				name,
				message,
				cause: None,
			};
		}
		let cause = err.source().map(|src| Box::new(go(src, depth + 1)));
		SerializedError { name, message, cause }
	}

	go(err, 0)
}

/// A dynamic value that can genuinely contain a reference cycle via shared, interior-mutable
/// nodes (unlike a plain `serde_json::Value` tree, which Rust's ownership model makes acyclic by
/// construction). Workflows that need to record a graph-shaped payload build it from this type;
/// [`to_json_cyclic`] walks it with an identity set keyed on node pointer address and breaks
/// cycles with a live-only sentinel, exactly as recorded effect values are required to do.
#[derive(Clone)]
pub enum CyclicValue {
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	Array(Vec<CyclicValue>),
	Object(Vec<(String, CyclicValue)>),
	Node(Arc<Mutex<CyclicValue>>),
}

pub fn to_json_cyclic(value: &CyclicValue) -> JsonValue {
	let mut seen = HashSet::new();
	walk_cyclic(value, &mut seen)
}

fn walk_cyclic(value: &CyclicValue, seen: &mut HashSet<usize>) -> JsonValue {
	match value {
		CyclicValue::Null => JsonValue::Null,
		CyclicValue::Bool(b) => JsonValue::Bool(*b),
		CyclicValue::Number(n) => serde_json::json!(n),
		CyclicValue::String(s) => JsonValue::String(s.clone()),
		CyclicValue::Array(items) => JsonValue::Array(items.iter().map(|v| walk_cyclic(v, seen)).collect()),
		CyclicValue::Object(fields) => {
			let map = fields
				.iter()
				.map(|(k, v)| (k.clone(), walk_cyclic(v, seen)))
				.collect();
			JsonValue::Object(map)
		}
		CyclicValue::Node(node) => {
			let ptr = Arc::as_ptr(node) as usize;
			if !seen.insert(ptr) {
				return to_json_opaque("CyclicValue::Node", format!("<cycle at {:#x}>", ptr));
			}
			let inner = node.lock().expect("CyclicValue node poisoned").clone();
			let rendered = walk_cyclic(&inner, seen);
			seen.remove(&ptr);
			rendered
		}
	}
}
