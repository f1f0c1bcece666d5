//! Builds the four lookup structures a reducer and the scope-lifecycle middleware consult on
//! every decision, from a flat, ordered history.
//!
//! Grounded on `WorkflowCtx::relevant_history`/`location_idx`
//! (`packages/common/chirp-workflow/core/src/ctx/workflow.rs`), generalized from a single
//! per-location cursor to one cursor per coroutine plus a global spawn cursor, since this engine
//! indexes replay by effect id rather than by source-position location.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::classify::is_infrastructure;
use crate::event::{CloseStatus, CoroutineId, EffectId, Event, NextStatus, StreamEntry};
use crate::value::JsonValue;

#[derive(Debug, Clone)]
pub struct YieldRecord {
	pub effect_id: EffectId,
	pub description: String,
	pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct NextRecord {
	pub status: NextStatus,
	pub value: Option<JsonValue>,
	pub error: Option<crate::value::SerializedError>,
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
	pub index: usize,
	pub parent_coroutine_id: CoroutineId,
	pub child_coroutine_id: CoroutineId,
}

#[derive(Debug, Clone)]
pub struct CloseRecord {
	pub status: CloseStatus,
	pub value: Option<JsonValue>,
	pub error: Option<crate::value::SerializedError>,
}

/// Replay lookups built once from the history read at startup. Cursors are interior-mutable
/// since multiple concurrently-polled scopes consult the same index.
pub struct ReplayIndex {
	yields_by_coroutine: IndexMap<CoroutineId, Vec<YieldRecord>>,
	yield_cursor: Mutex<HashMap<CoroutineId, usize>>,
	resolutions: HashMap<EffectId, NextRecord>,
	spawns: Vec<SpawnRecord>,
	spawn_cursor: Mutex<usize>,
	closes: HashMap<CoroutineId, CloseRecord>,
	consumed_closes: Mutex<HashSet<CoroutineId>>,
	has_events: bool,
}

impl ReplayIndex {
	pub fn new(history: &[StreamEntry]) -> Self {
		let mut yields_by_coroutine: IndexMap<CoroutineId, Vec<YieldRecord>> = IndexMap::new();
		let mut resolutions = HashMap::new();
		let mut spawns = Vec::new();
		let mut closes = HashMap::new();
		// Effect ids whose `Yield` was classified infrastructure; their matching `Next` (which
		// always appears later in the log) is skipped too, so the index models only user-visible
		// effects per spec §4.3.
		let mut infrastructure_effect_ids = HashSet::new();

		for entry in history {
			match &entry.event {
				Event::Yield {
					coroutine_id,
					effect_id,
					description,
				} => {
					if is_infrastructure(description) {
						infrastructure_effect_ids.insert(effect_id.clone());
						continue;
					}
					yields_by_coroutine
						.entry(coroutine_id.clone())
						.or_default()
						.push(YieldRecord {
							effect_id: effect_id.clone(),
							description: description.clone(),
							offset: entry.offset,
						});
				}
				Event::Next {
					effect_id,
					status,
					value,
					error,
					..
				} => {
					if infrastructure_effect_ids.contains(effect_id) {
						continue;
					}
					resolutions.insert(
						effect_id.clone(),
						NextRecord {
							status: *status,
							value: value.clone(),
							error: error.clone(),
						},
					);
				}
				Event::Spawn {
					coroutine_id,
					child_coroutine_id,
				} => {
					spawns.push(SpawnRecord {
						index: spawns.len(),
						parent_coroutine_id: coroutine_id.clone(),
						child_coroutine_id: child_coroutine_id.clone(),
					});
				}
				Event::Close {
					coroutine_id,
					status,
					value,
					error,
				} => {
					closes.insert(
						coroutine_id.clone(),
						CloseRecord {
							status: *status,
							value: value.clone(),
							error: error.clone(),
						},
					);
				}
			}
		}

		Self {
			has_events: !history.is_empty(),
			yields_by_coroutine,
			yield_cursor: Mutex::new(HashMap::new()),
			resolutions,
			spawns,
			spawn_cursor: Mutex::new(0),
			closes,
			consumed_closes: Mutex::new(HashSet::new()),
		}
	}

	pub fn has_events(&self) -> bool {
		self.has_events
	}

	/// Peeks the next unconsumed `Yield` for `coroutine`, without advancing the cursor.
	pub fn peek_yield(&self, coroutine: &CoroutineId) -> Option<YieldRecord> {
		let records = self.yields_by_coroutine.get(coroutine)?;
		let cursor = self.yield_cursor.lock().expect("yield cursor poisoned");
		let idx = *cursor.get(coroutine).unwrap_or(&0);
		records.get(idx).cloned()
	}

	pub fn consume_yield(&self, coroutine: &CoroutineId) {
		let mut cursor = self.yield_cursor.lock().expect("yield cursor poisoned");
		*cursor.entry(coroutine.clone()).or_insert(0) += 1;
	}

	pub fn resolution(&self, effect_id: &EffectId) -> Option<NextRecord> {
		self.resolutions.get(effect_id).cloned()
	}

	/// Peeks the next unconsumed `Spawn` in global recorded order, without advancing the cursor.
	pub fn peek_spawn(&self) -> Option<SpawnRecord> {
		let cursor = self.spawn_cursor.lock().expect("spawn cursor poisoned");
		self.spawns.get(*cursor).cloned()
	}

	pub fn consume_spawn(&self) {
		let mut cursor = self.spawn_cursor.lock().expect("spawn cursor poisoned");
		*cursor += 1;
	}

	pub fn close_for(&self, coroutine: &CoroutineId) -> Option<CloseRecord> {
		let consumed = self.consumed_closes.lock().expect("consumed closes poisoned");
		if consumed.contains(coroutine) {
			return None;
		}
		self.closes.get(coroutine).cloned()
	}

	pub fn consume_close(&self, coroutine: &CoroutineId) {
		self.consumed_closes
			.lock()
			.expect("consumed closes poisoned")
			.insert(coroutine.clone());
	}
}
