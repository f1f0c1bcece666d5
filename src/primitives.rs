//! Structured-concurrency primitives: `spawn`, `all`, `race`, `resource`, `scoped`, `each`, and
//! the `durably` entry point that opens the root scope.
//!
//! Grounded on `WorkflowCtx::spawn`/`join` for the spawn/join shape and on
//! `WorkflowCtx::catch_unrecoverable` for the user-failure/divergence split
//! (`packages/common/chirp-workflow/core/src/ctx/workflow.rs`); `race`'s cancel-the-losers
//! behavior and `each`'s subscription-scope split are this crate's own generalization, since the
//! teacher's workflow model does not have a direct analogue for either.
//!
//! Every primitive and workflow body here speaks in [`ReducerResult`], not a bare
//! `Result<T, SerializedError>`: that is what lets [`ReducerError::Divergence`] flow through `?`
//! exactly like any other error while still being recognizable at every scope boundary as the
//! one failure that must never be recorded as a `Close`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::StreamExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ReducerError, ReducerResult};
use crate::event::CoroutineId;
use crate::reducer::ReducerHandle;
use crate::replay_index::ReplayIndex;
use crate::scope::{Outcome, ScopeHandle, ScopeMiddleware};
use crate::stream::EventStream;
use crate::value::{JsonValue, SerializedError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// A unit of concurrent work handed to `spawn`/`all`/`race`: a closure that receives its own
/// child `Scope` and returns a workflow-level result.
pub type Operation<T> = Box<dyn FnOnce(Scope) -> BoxFuture<'static, ReducerResult<T>> + Send>;

/// Converts a combinator's result into the `Close` it should record, or `None` if the result is
/// a divergence, in which case no `Close` is recorded at all — the stream is left exactly as it
/// was, so a future replay attempt sees the same suspended tail.
fn outcome_for<T: Serialize>(result: &ReducerResult<T>) -> Option<Outcome> {
	match result {
		Ok(v) => Some(Outcome::ok(v)),
		Err(ReducerError::Divergence(_)) => None,
		Err(other) => Some(Outcome::err(other.to_serialized())),
	}
}

/// The handle a workflow body threads through its own code and into every primitive it calls.
/// Cloning a `Scope` does not create a new coroutine; it is a cheap reference to the same one.
#[derive(Clone)]
pub struct Scope {
	handle: ScopeHandle,
	coroutine_id: CoroutineId,
	reducer: ReducerHandle,
	middleware: Arc<ScopeMiddleware>,
}

impl Scope {
	pub fn coroutine_id(&self) -> &CoroutineId {
		&self.coroutine_id
	}

	fn child(&self, handle: ScopeHandle, coroutine_id: CoroutineId) -> Scope {
		Scope {
			handle,
			coroutine_id,
			reducer: self.reducer.clone(),
			middleware: self.middleware.clone(),
		}
	}

	/// Closes `handle` according to `result`, or leaves no trace at all if `result` is a
	/// divergence.
	async fn close(&self, handle: ScopeHandle, result: &ReducerResult<impl Serialize>) {
		match outcome_for(result) {
			Some(outcome) => self.middleware.destroy(handle, outcome).await,
			None => self.middleware.destroy_without_recording(handle).await,
		}
	}

	/// Runs a recordable effect. On replay, if the recorded description matches, `enter` may not
	/// run at all; if it does not match, this returns [`ReducerError::Divergence`] without
	/// running `enter`. A failure inside `enter` itself comes back as
	/// [`ReducerError::UserFailure`], recoverable with [`Scope::catch_user_failure`].
	pub async fn effect<T, Fut>(
		&self,
		description: impl Into<String>,
		enter: impl FnOnce() -> Fut + Send + 'static,
	) -> ReducerResult<T>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		Fut: Future<Output = Result<T, SerializedError>> + Send + 'static,
	{
		let description = description.into();
		match self.reducer.effect(&self.coroutine_id, description.clone(), enter).await? {
			Ok(value) => Ok(value),
			Err(source) => Err(ReducerError::UserFailure { description, source }),
		}
	}

	/// Recovers an effect failure the way a workflow's own `try`/`catch` would, refusing to hand
	/// back [`ReducerError::Divergence`] — mirrors `WorkflowCtx::catch_unrecoverable` excluding
	/// `HistoryDiverged` from its catch set.
	pub fn catch_user_failure<T>(result: ReducerResult<T>) -> ReducerResult<Result<T, SerializedError>> {
		match result {
			Ok(v) => Ok(Ok(v)),
			Err(ReducerError::UserFailure { source, .. }) => Ok(Err(source)),
			Err(other) => Err(other),
		}
	}

	/// Creates a child scope and runs `op` concurrently with the caller. The child's effects are
	/// recorded against its own coroutine id, not the caller's.
	pub async fn spawn<F, Fut, T>(&self, op: F) -> ReducerResult<JoinedScope<T>>
	where
		F: FnOnce(Scope) -> Fut + Send + 'static,
		Fut: Future<Output = ReducerResult<T>> + Send + 'static,
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let (child_handle, child_id) = self.middleware.create(Some((self.handle, self.coroutine_id.clone()))).await;
		let child_scope = self.child(child_handle, child_id.clone());
		let parent = self.clone();

		let task = tokio::spawn(async move {
			let result = op(child_scope).await;
			parent.close(child_handle, &result).await;
			result
		});

		Ok(JoinedScope {
			child_handle,
			child_coroutine_id: child_id,
			task,
		})
	}

	/// Runs `op` as a child scope sequentially: the child always closes, with the op's own
	/// outcome, before `scoped` returns.
	pub async fn scoped<F, Fut, T>(&self, op: F) -> ReducerResult<T>
	where
		F: FnOnce(Scope) -> Fut + Send + 'static,
		Fut: Future<Output = ReducerResult<T>> + Send + 'static,
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let (child_handle, child_id) = self.middleware.create(Some((self.handle, self.coroutine_id.clone()))).await;
		let child_scope = self.child(child_handle, child_id);
		let result = op(child_scope).await;
		self.close(child_handle, &result).await;
		result
	}

	/// Runs every operation concurrently as its own child scope and waits for all of them.
	pub async fn all<T>(&self, ops: Vec<Operation<T>>) -> ReducerResult<Vec<T>>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let mut joined = Vec::with_capacity(ops.len());
		for op in ops {
			joined.push(self.spawn(op).await?);
		}

		let mut results = Vec::with_capacity(joined.len());
		for j in joined {
			results.push(j.join().await?);
		}
		Ok(results)
	}

	/// Runs every operation concurrently as its own child scope, returns the first to settle, and
	/// cancels the rest. A cancelled branch records `Close(status=cancelled)`.
	pub async fn race<T>(&self, ops: Vec<Operation<T>>) -> ReducerResult<T>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
	{
		let mut joined = Vec::with_capacity(ops.len());
		for op in ops {
			joined.push(self.spawn(op).await?);
		}

		let mut metas: Vec<(ScopeHandle, CoroutineId)> = Vec::with_capacity(joined.len());
		let mut tasks = Vec::with_capacity(joined.len());
		for j in joined {
			metas.push((j.child_handle, j.child_coroutine_id));
			tasks.push(j.task);
		}

		let (outcome, winner_idx, losers) = futures_util::future::select_all(tasks).await;
		let (_winner_handle, winner_id) = metas.remove(winner_idx);

		// `select_all` preserves the relative order of the futures it didn't resolve, and
		// removing `winner_idx` from `metas` above preserves the same relative order, so the two
		// line up index-for-index.
		for (idx, loser) in losers.into_iter().enumerate() {
			loser.abort();
			let _ = loser.await;
			self.close_cancelled(metas[idx].0).await;
		}

		match outcome {
			Ok(result) => result,
			Err(_join_err) => Err(ReducerError::ChildTaskFailed(winner_id)),
		}
	}

	async fn close_cancelled(&self, handle: ScopeHandle) {
		self.middleware.destroy(handle, Outcome::Cancelled).await;
	}

	/// Acquires a resource deterministically (replay reuses the recorded acquisition) and returns
	/// a guard that must be explicitly closed; the release runs inside its own child scope so a
	/// release failure is itself a recorded, replayable event rather than a silent drop.
	pub async fn resource<T, AcqFut, Rel, RelFut>(
		&self,
		description: impl Into<String>,
		acquire: AcqFut,
		release: Rel,
	) -> ReducerResult<Resource<T>>
	where
		T: Serialize + DeserializeOwned + Clone + Send + 'static,
		AcqFut: Future<Output = Result<T, SerializedError>> + Send + 'static,
		Rel: FnOnce(T) -> RelFut + Send + 'static,
		RelFut: Future<Output = Result<(), SerializedError>> + Send + 'static,
	{
		let (child_handle, child_id) = self.middleware.create(Some((self.handle, self.coroutine_id.clone()))).await;
		let child_scope = self.child(child_handle, child_id.clone());
		let value = child_scope.effect(description, move || acquire).await?;

		Ok(Resource {
			value,
			handle: child_handle,
			coroutine_id: child_id,
			parent: self.clone(),
			release: Some(Box::new(move |v: T| -> BoxFuture<'static, Result<(), SerializedError>> {
				Box::pin(release(v))
			})),
		})
	}

	/// Iterates an async source, recording the loop body's effects against the caller's own
	/// scope while the pull itself runs inside a dedicated, never-recorded subscription scope.
	pub async fn each<S, F, Fut>(&self, mut source: S, mut body: F) -> ReducerResult<()>
	where
		S: futures_util::Stream<Item = JsonValue> + Unpin + Send,
		F: FnMut(Scope, JsonValue) -> Fut + Send,
		Fut: Future<Output = ReducerResult<()>> + Send,
	{
		let (sub_handle, sub_id) = self.middleware.create(Some((self.handle, self.coroutine_id.clone()))).await;
		let _subscription = self.child(sub_handle, sub_id);

		// The pull itself (`source.next()`) is the subscription scope's only effect, and it is
		// never recorded: `each` always re-subscribes live on replay rather than replaying
		// individual items, the same way `resource:acquire-scope` is live but what it acquires
		// inside a user effect is what actually gets recorded.
		let result = loop {
			match source.next().await {
				Some(value) => {
					if let Err(err) = body(self.clone(), value).await {
						break Err(err);
					}
				}
				None => break Ok(()),
			}
		};

		self.close(sub_handle, &result).await;
		result
	}
}

type ReleaseFn<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, Result<(), SerializedError>> + Send>;

/// A resource acquired with [`Scope::resource`]. Async Rust has no way to run an awaited release
/// from an ordinary `Drop`, so closing is explicit rather than RAII; an un-closed `Resource` is a
/// leaked child scope, which is why `close` consumes `self`.
pub struct Resource<T> {
	value: T,
	handle: ScopeHandle,
	coroutine_id: CoroutineId,
	parent: Scope,
	release: Option<ReleaseFn<T>>,
}

impl<T: Clone + Serialize + DeserializeOwned + Send + 'static> Resource<T> {
	pub fn get(&self) -> &T {
		&self.value
	}

	pub fn coroutine_id(&self) -> &CoroutineId {
		&self.coroutine_id
	}

	pub async fn close(mut self) -> ReducerResult<()> {
		let release = self.release.take().expect("Resource::close called twice");
		let value = self.value.clone();
		let scope = self.parent.child(self.handle, self.coroutine_id.clone());
		let result = scope.effect("resource:release-scope", move || release(value)).await;
		self.parent.close(self.handle, &result).await;
		result
	}
}

/// A child scope spawned with [`Scope::spawn`]; join it to observe its result, or let it race.
pub struct JoinedScope<T> {
	child_handle: ScopeHandle,
	child_coroutine_id: CoroutineId,
	task: tokio::task::JoinHandle<ReducerResult<T>>,
}

impl<T> JoinedScope<T> {
	pub fn coroutine_id(&self) -> &CoroutineId {
		&self.child_coroutine_id
	}

	pub async fn join(self) -> ReducerResult<T> {
		match self.task.await {
			Ok(result) => result,
			Err(_join_err) => Err(ReducerError::ChildTaskFailed(self.child_coroutine_id)),
		}
	}
}

/// Opens the root scope against `stream`'s recorded history (if any) and runs `factory` to
/// completion, recording the root's `Close` exactly once when it settles.
///
/// Grounded on the top-level `run`/`run_inner` split in `WorkflowCtx` — `durably` plays the role
/// the engine's dispatcher plays there, minus persistence retry, which this in-process engine
/// delegates entirely to the `EventStream` implementation.
pub async fn durably<F, Fut, T>(stream: Arc<dyn EventStream>, factory: F) -> ReducerResult<T>
where
	F: FnOnce(Scope) -> Fut,
	Fut: Future<Output = ReducerResult<T>>,
	T: Serialize + DeserializeOwned + Send + 'static,
{
	let history = stream.read(0).await.map_err(|_| ReducerError::StreamClosed)?;
	let history_len = history.len() as u64;
	let replay_index = Arc::new(ReplayIndex::new(&history));
	let middleware = Arc::new(ScopeMiddleware::new(stream.clone(), replay_index.clone()));
	let reducer = ReducerHandle::spawn(stream, replay_index, history_len);

	let (root_handle, root_id) = middleware.create(None).await;
	let root_scope = Scope {
		handle: root_handle,
		coroutine_id: root_id,
		reducer,
		middleware: middleware.clone(),
	};

	let result = factory(root_scope).await;
	match outcome_for(&result) {
		Some(outcome) => middleware.close_root(outcome).await,
		None => middleware.destroy_without_recording(root_handle).await,
	}
	result
}
