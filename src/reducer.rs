//! The reducer: a single-consumer decision loop that serializes every effect decision across all
//! concurrently-polled scopes, then hands the actual (potentially slow) side effect off to run
//! independently so the decision loop itself never blocks.
//!
//! Grounded on `WorkflowCtx::activity` (`packages/common/chirp-workflow/core/src/ctx/workflow.rs`):
//! the replay-vs-live branch there (compare recorded event, replay on match, diverge on
//! mismatch, execute live and append on absence) is the same branch implemented here, generalized
//! from per-location indexing to per-coroutine effect-id indexing, and from a single in-process
//! workflow task to arbitrarily many concurrently-polled scopes sharing one stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::classify::is_infrastructure;
use crate::error::{Divergence, ReducerError, ReducerResult};
use crate::event::{CoroutineId, Event, EffectIdGen, NextStatus};
use crate::metrics;
use crate::replay_index::ReplayIndex;
use crate::stream::EventStream;
use crate::value::{from_json, to_json, JsonValue, SerializedError};

type EnterFuture = Pin<Box<dyn Future<Output = Result<JsonValue, SerializedError>> + Send>>;
type Enter = Box<dyn FnOnce() -> EnterFuture + Send>;

enum Job {
	HandleEffect {
		coroutine: CoroutineId,
		description: String,
		enter: Enter,
		respond: oneshot::Sender<ReducerResult<Result<JsonValue, SerializedError>>>,
	},
}

/// Owns the decision loop's receiving half; dropped once all [`ReducerHandle`] clones are gone,
/// which ends the background task.
struct ReducerInner {
	stream: Arc<dyn EventStream>,
	replay_index: Arc<ReplayIndex>,
	effect_ids: EffectIdGen,
}

impl ReducerInner {
	async fn handle(&self, coroutine: CoroutineId, description: String, enter: Enter) -> ReducerResult<Result<JsonValue, SerializedError>> {
		if is_infrastructure(&description) {
			trace!(coroutine = %coroutine, %description, "infrastructure effect, not recorded");
			return Ok(enter().await);
		}

		match self.replay_index.peek_yield(&coroutine) {
			Some(rec) if rec.description == description => {
				self.replay_index.consume_yield(&coroutine);
				match self.replay_index.resolution(&rec.effect_id) {
					Some(next) => {
						debug!(coroutine = %coroutine, effect_id = %rec.effect_id, "replaying effect");
						metrics::EFFECTS_REPLAYED.inc();
						Ok(match next.status {
							NextStatus::Ok => Ok(next.value.unwrap_or(JsonValue::Null)),
							NextStatus::Err => Err(next.error.unwrap_or_else(|| SerializedError::new("Unknown", "missing recorded error"))),
						})
					}
					None => {
						// Yield was recorded but its Next never made it to the stream (the
						// process died between recording the suspend and recording the
						// settlement). Re-run live, reusing the recorded effect id so a second
						// crash at this point still replays the same Yield on the next attempt.
						warn!(coroutine = %coroutine, effect_id = %rec.effect_id, "replaying Yield without a recorded Next, re-entering live");
						metrics::EFFECTS_LIVE.inc();
						let result = enter().await;
						self.record_next(&coroutine, rec.effect_id.clone(), &result).await?;
						Ok(result)
					}
				}
			}
			Some(rec) => {
				metrics::DIVERGENCES.inc();
				Err(ReducerError::Divergence(Divergence {
					coroutine_id: coroutine,
					effect_id: Some(rec.effect_id),
					expected: rec.description,
					actual: description,
					offset: rec.offset,
				}))
			}
			None => {
				let effect_id = self.effect_ids.next();
				self.stream
					.append(Event::Yield {
						coroutine_id: coroutine.clone(),
						effect_id: effect_id.clone(),
						description,
					})
					.await
					.map_err(|_| ReducerError::StreamClosed)?;
				metrics::EFFECTS_LIVE.inc();
				let result = enter().await;
				self.record_next(&coroutine, effect_id, &result).await?;
				Ok(result)
			}
		}
	}

	async fn record_next(
		&self,
		coroutine: &CoroutineId,
		effect_id: crate::event::EffectId,
		result: &Result<JsonValue, SerializedError>,
	) -> ReducerResult<()> {
		let (status, value, error) = match result {
			Ok(v) => (NextStatus::Ok, Some(v.clone()), None),
			Err(e) => (NextStatus::Err, None, Some(e.clone())),
		};
		self.stream
			.append(Event::Next {
				coroutine_id: coroutine.clone(),
				effect_id,
				status,
				value,
				error,
			})
			.await
			.map_err(|_| ReducerError::StreamClosed)?;
		Ok(())
	}
}

/// A cheaply cloneable handle to the reducer's decision queue.
#[derive(Clone)]
pub struct ReducerHandle {
	tx: mpsc::Sender<Job>,
}

impl ReducerHandle {
	/// Spawns the background decision task. `history` is the stream's content at startup; the
	/// effect id generator is seeded past the end of it so live-path ids never collide with
	/// replayed ones.
	pub fn spawn(stream: Arc<dyn EventStream>, replay_index: Arc<ReplayIndex>, history_len: u64) -> Self {
		let (tx, mut rx) = mpsc::channel::<Job>(256);
		let inner = Arc::new(ReducerInner {
			stream,
			replay_index,
			effect_ids: EffectIdGen::starting_at(history_len),
		});

		tokio::spawn(async move {
			while let Some(job) = rx.recv().await {
				match job {
					Job::HandleEffect {
						coroutine,
						description,
						enter,
						respond,
					} => {
						let inner = inner.clone();
						// The decision branch above is fast (one stream append at most); the
						// `enter` future is where arbitrary-latency side effects live, so it must
						// not block the next queued decision. Spawning here is what keeps the
						// "single-threaded cooperative" scheduling guarantee cheap: only the
						// bookkeeping is serialized, not the world.
						tokio::spawn(async move {
							let outcome = inner.handle(coroutine, description, enter).await;
							let _ = respond.send(outcome);
						});
					}
				}
			}
		});

		Self { tx }
	}

	/// Runs `description` as an effect on behalf of `coroutine`. On replay, `enter` may not run
	/// at all. On divergence, `enter` never runs.
	pub async fn effect<T, Fut>(
		&self,
		coroutine: &CoroutineId,
		description: impl Into<String>,
		enter: impl FnOnce() -> Fut + Send + 'static,
	) -> ReducerResult<Result<T, SerializedError>>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		Fut: Future<Output = Result<T, SerializedError>> + Send + 'static,
	{
		let boxed: Enter = Box::new(move || -> EnterFuture { Box::pin(async move { enter().await.map(|v| to_json(&v)) }) });
		let (respond, recv) = oneshot::channel();
		self.tx
			.send(Job::HandleEffect {
				coroutine: coroutine.clone(),
				description: description.into(),
				enter: boxed,
				respond,
			})
			.await
			.map_err(|_| ReducerError::ReducerGone)?;

		let outcome = recv.await.map_err(|_| ReducerError::ReducerGone)??;
		match outcome {
			Ok(value) => from_json::<T>(&value)
				.map(Ok)
				.map_err(|e| ReducerError::Serialize(e)),
			Err(err) => Ok(Err(err)),
		}
	}
}

impl std::fmt::Debug for ReducerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReducerHandle").finish_non_exhaustive()
	}
}
