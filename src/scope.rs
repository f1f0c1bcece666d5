//! Scope-lifecycle middleware: mints coroutine identities on scope creation, replaying recorded
//! `Spawn`s where they exist, and records or consumes the matching `Close` on scope teardown.
//!
//! Grounded on the spawn/dispatch bookkeeping in `WorkflowCtx::spawn`/`dispatch_workflow_inner`
//! (`packages/common/chirp-workflow/core/src/ctx/workflow.rs`), adapted from a recursive
//! sub-workflow model to a generic scope tree that any structured-concurrency primitive can
//! create a child under.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::{CloseStatus, CoroutineId, CoroutineIdGen, Event};
use crate::replay_index::ReplayIndex;
use crate::stream::EventStream;
use crate::value::{to_json, JsonValue, SerializedError};

/// A scope is the in-process handle structured concurrency primitives hold; it does not survive
/// a process restart the way a `CoroutineId` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeHandle(u64);

/// The outcome a scope closes with.
#[derive(Debug, Clone)]
pub enum Outcome {
	Ok(Option<JsonValue>),
	Err(SerializedError),
	Cancelled,
}

impl Outcome {
	pub fn ok<T: serde::Serialize>(value: &T) -> Self {
		Outcome::Ok(Some(to_json(value)))
	}

	pub fn ok_unit() -> Self {
		Outcome::Ok(None)
	}

	pub fn err(error: SerializedError) -> Self {
		Outcome::Err(error)
	}

	fn status(&self) -> CloseStatus {
		match self {
			Outcome::Ok(_) => CloseStatus::Ok,
			Outcome::Err(_) => CloseStatus::Err,
			Outcome::Cancelled => CloseStatus::Cancelled,
		}
	}

	fn value(&self) -> Option<JsonValue> {
		match self {
			Outcome::Ok(v) => v.clone(),
			_ => None,
		}
	}

	fn error(&self) -> Option<SerializedError> {
		match self {
			Outcome::Err(e) => Some(e.clone()),
			_ => None,
		}
	}
}

struct Registry {
	scope_to_coroutine: HashMap<ScopeHandle, CoroutineId>,
	coroutine_to_parent: HashMap<CoroutineId, Option<CoroutineId>>,
}

pub struct ScopeMiddleware {
	stream: Arc<dyn EventStream>,
	replay_index: Arc<ReplayIndex>,
	coroutine_ids: CoroutineIdGen,
	scope_handles: AtomicU64,
	registry: Mutex<Registry>,
	root_closed: AtomicBool,
}

impl ScopeMiddleware {
	pub fn new(stream: Arc<dyn EventStream>, replay_index: Arc<ReplayIndex>) -> Self {
		Self {
			stream,
			replay_index,
			coroutine_ids: CoroutineIdGen::default(),
			scope_handles: AtomicU64::new(0),
			registry: Mutex::new(Registry {
				scope_to_coroutine: HashMap::new(),
				coroutine_to_parent: HashMap::new(),
			}),
			root_closed: AtomicBool::new(false),
		}
	}

	fn mint_scope(&self) -> ScopeHandle {
		ScopeHandle(self.scope_handles.fetch_add(1, Ordering::Relaxed))
	}

	/// Creates a scope. `parent` is `None` exactly once, for the root scope `durably` opens;
	/// every other call creates a child under `parent` and either replays the recorded `Spawn`
	/// for it or, on the live path, mints a new coroutine id and appends a fresh `Spawn`.
	pub async fn create(&self, parent: Option<(ScopeHandle, CoroutineId)>) -> (ScopeHandle, CoroutineId) {
		let handle = self.mint_scope();

		let coroutine_id = match parent {
			None => CoroutineId::root(),
			Some((_, parent_id)) => {
				if let Some(rec) = self.replay_index.peek_spawn() {
					if rec.parent_coroutine_id == parent_id {
						self.replay_index.consume_spawn();
						rec.child_coroutine_id
					} else {
						self.live_spawn(&parent_id).await
					}
				} else {
					self.live_spawn(&parent_id).await
				}
			}
		};

		let mut registry = self.registry.lock().expect("scope registry poisoned");
		registry.scope_to_coroutine.insert(handle, coroutine_id.clone());
		registry
			.coroutine_to_parent
			.insert(coroutine_id.clone(), parent.map(|(_, id)| id));
		drop(registry);

		(handle, coroutine_id)
	}

	async fn live_spawn(&self, parent_id: &CoroutineId) -> CoroutineId {
		let child_id = self.coroutine_ids.next();
		let _ = self
			.stream
			.append(Event::Spawn {
				coroutine_id: parent_id.clone(),
				child_coroutine_id: child_id.clone(),
			})
			.await;
		child_id
	}

	/// Tears a scope down, recording or consuming its `Close`.
	pub async fn destroy(&self, handle: ScopeHandle, outcome: Outcome) {
		let coroutine_id = {
			let mut registry = self.registry.lock().expect("scope registry poisoned");
			registry.scope_to_coroutine.remove(&handle)
		};
		let Some(coroutine_id) = coroutine_id else {
			return;
		};
		self.close_coroutine(&coroutine_id, outcome).await;
	}

	async fn close_coroutine(&self, coroutine_id: &CoroutineId, outcome: Outcome) {
		if self.replay_index.close_for(coroutine_id).is_some() {
			self.replay_index.consume_close(coroutine_id);
			return;
		}
		let _ = self
			.stream
			.append(Event::Close {
				coroutine_id: coroutine_id.clone(),
				status: outcome.status(),
				value: outcome.value(),
				error: outcome.error(),
			})
			.await;
	}

	/// Closes the root coroutine exactly once. Called by `durably` once the top-level workflow
	/// future resolves, before the stream itself is closed. Idempotent: a second call is a
	/// no-op, guarding against the root being torn down twice if a caller also routes it through
	/// `destroy`.
	pub async fn close_root(&self, outcome: Outcome) {
		if self.root_closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.close_coroutine(&CoroutineId::root(), outcome).await;
	}

	/// Removes a scope's bookkeeping without recording (or consuming) a `Close`. Used only when
	/// a scope unwinds via [`crate::error::ReducerError::Divergence`], which must leave no trace
	/// in the stream at all.
	pub async fn destroy_without_recording(&self, handle: ScopeHandle) {
		self.registry
			.lock()
			.expect("scope registry poisoned")
			.scope_to_coroutine
			.remove(&handle);
	}

	pub fn parent_of(&self, coroutine_id: &CoroutineId) -> Option<CoroutineId> {
		self.registry
			.lock()
			.expect("scope registry poisoned")
			.coroutine_to_parent
			.get(coroutine_id)
			.cloned()
			.flatten()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stream::MemoryStream;

	#[tokio::test]
	async fn root_create_uses_well_known_id() {
		let stream: Arc<dyn EventStream> = Arc::new(MemoryStream::new());
		let replay_index = Arc::new(ReplayIndex::new(&[]));
		let middleware = ScopeMiddleware::new(stream, replay_index);
		let (_, root_id) = middleware.create(None).await;
		assert!(root_id.is_root());
	}

	#[tokio::test]
	async fn child_spawn_appends_spawn_event() {
		let stream = Arc::new(MemoryStream::new());
		let replay_index = Arc::new(ReplayIndex::new(&[]));
		let middleware = ScopeMiddleware::new(stream.clone() as Arc<dyn EventStream>, replay_index);
		let (root_handle, root_id) = middleware.create(None).await;
		let (_, child_id) = middleware.create(Some((root_handle, root_id))).await;
		assert_eq!(stream.len().await, 1);
		assert_eq!(child_id.as_str(), "coroutine-0");
	}
}
