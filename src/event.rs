//! The durable stream's wire format: four event kinds, append-only, each carrying an offset.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::value::JsonValue;

pub const ROOT_COROUTINE_ID: &str = "root";

macro_rules! string_id {
	($name:ident) => {
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub String);

		impl $name {
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<String> for $name {
			fn from(s: String) -> Self {
				Self(s)
			}
		}

		impl From<&str> for $name {
			fn from(s: &str) -> Self {
				Self(s.to_string())
			}
		}
	};
}

string_id!(CoroutineId);
string_id!(EffectId);

impl CoroutineId {
	pub fn root() -> Self {
		Self(ROOT_COROUTINE_ID.to_string())
	}

	pub fn is_root(&self) -> bool {
		self.0 == ROOT_COROUTINE_ID
	}
}

/// Mints `coroutine-N` identities, used only on the live path; replayed coroutines reuse the id
/// recorded in their `Spawn` event instead of drawing a new one.
#[derive(Debug, Default)]
pub struct CoroutineIdGen(AtomicU64);

impl CoroutineIdGen {
	pub fn next(&self) -> CoroutineId {
		let n = self.0.fetch_add(1, Ordering::Relaxed);
		CoroutineId(format!("coroutine-{n}"))
	}
}

/// Mints `effect-N` identities, seeded from the stream length at reducer startup so live ids
/// never collide with anything already recorded.
#[derive(Debug)]
pub struct EffectIdGen(AtomicU64);

impl EffectIdGen {
	pub fn starting_at(offset: u64) -> Self {
		Self(AtomicU64::new(offset))
	}

	pub fn next(&self) -> EffectId {
		let n = self.0.fetch_add(1, Ordering::Relaxed);
		EffectId(format!("effect-{n}"))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NextStatus {
	Ok,
	Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseStatus {
	Ok,
	Err,
	Cancelled,
}

/// The four-event schema: `Yield`, `Next`, `Spawn`, `Close`. This is the "cleaner core" variant
/// the specification calls out explicitly, rather than the eight-event variant that splits each
/// kind into separate enter/settle records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
	/// A coroutine suspended on a named effect.
	Yield {
		#[serde(rename = "coroutineId")]
		coroutine_id: CoroutineId,
		#[serde(rename = "effectId")]
		effect_id: EffectId,
		description: String,
	},
	/// An effect resolved, successfully or not.
	Next {
		#[serde(rename = "coroutineId")]
		coroutine_id: CoroutineId,
		#[serde(rename = "effectId")]
		effect_id: EffectId,
		status: NextStatus,
		#[serde(skip_serializing_if = "Option::is_none")]
		value: Option<JsonValue>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<crate::value::SerializedError>,
	},
	/// A coroutine created a child coroutine (scope).
	Spawn {
		#[serde(rename = "coroutineId")]
		coroutine_id: CoroutineId,
		#[serde(rename = "childCoroutineId")]
		child_coroutine_id: CoroutineId,
	},
	/// A coroutine finished: normally, with an error, or cancelled by its parent.
	Close {
		#[serde(rename = "coroutineId")]
		coroutine_id: CoroutineId,
		status: CloseStatus,
		#[serde(skip_serializing_if = "Option::is_none")]
		value: Option<JsonValue>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<crate::value::SerializedError>,
	},
}

impl Event {
	pub fn coroutine_id(&self) -> &CoroutineId {
		match self {
			Event::Yield { coroutine_id, .. }
			| Event::Next { coroutine_id, .. }
			| Event::Spawn { coroutine_id, .. }
			| Event::Close { coroutine_id, .. } => coroutine_id,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
	pub offset: u64,
	pub event: Event,
}
