mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chronicle_workflow::event::{CloseStatus, Event};
use chronicle_workflow::prelude::*;
use chronicle_workflow::primitives::BoxFuture;
use chronicle_workflow::stream::EventStream;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pure_workflow_records_only_its_own_close() {
	let stream = fresh_stream();

	let result: i64 = durably(stream.clone(), |_scope| async move { Ok(42) })
		.await
		.expect("pure workflow succeeds");

	assert_eq!(result, 42);
	let history = stream.read(0).await.unwrap();
	assert_eq!(history.len(), 1);
	match &history[0].event {
		Event::Close { status, value, .. } => {
			assert_eq!(*status, CloseStatus::Ok);
			assert_eq!(value.as_ref().unwrap(), &serde_json::json!(42));
		}
		other => panic!("expected a Close event, got {other:?}"),
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_reuses_recorded_effect_without_rerunning_it() {
	let stream = fresh_stream();
	let calls = Arc::new(AtomicUsize::new(0));

	let run = |calls: Arc<AtomicUsize>| {
		move |scope: Scope| {
			let calls = calls.clone();
			async move {
				let value: i64 = scope
					.effect("fetch-balance", move || {
						calls.fetch_add(1, Ordering::SeqCst);
						async move { Ok(7) }
					})
					.await?;
				Ok(value)
			}
		}
	};

	let first: i64 = durably(stream.clone(), run(calls.clone())).await.unwrap();
	assert_eq!(first, 7);
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	let history = stream.read(0).await.unwrap();
	let replay_stream = replay_stream(history);

	let second: i64 = durably(replay_stream, run(calls.clone())).await.unwrap();
	assert_eq!(second, 7);
	assert_eq!(calls.load(Ordering::SeqCst), 1, "replay must not re-run the recorded effect");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_replay_continues_live_for_the_remaining_suffix() {
	let calls = Arc::new(AtomicUsize::new(0));

	let run = |calls: Arc<AtomicUsize>| {
		move |scope: Scope| {
			let calls = calls.clone();
			async move {
				let calls2 = calls.clone();
				let a: i64 = scope
					.effect("step-a", move || {
						calls2.fetch_add(1, Ordering::SeqCst);
						async move { Ok(1) }
					})
					.await?;
				let calls3 = calls.clone();
				let b: i64 = scope
					.effect("step-b", move || {
						calls3.fetch_add(1, Ordering::SeqCst);
						async move { Ok(2) }
					})
					.await?;
				Ok(a + b)
			}
		}
	};

	let stream = fresh_stream();
	let total: i64 = durably(stream.clone(), run(calls.clone())).await.unwrap();
	assert_eq!(total, 3);
	assert_eq!(calls.load(Ordering::SeqCst), 2);

	// Truncate to only the Yield/Next pair for "step-a": replay sees a recorded prefix that
	// covers the first effect only, then must fall through to live execution for "step-b".
	let full_history = stream.read(0).await.unwrap();
	let prefix: Vec<_> = full_history.into_iter().take(2).collect();
	let partial = replay_stream(prefix);

	calls.store(0, Ordering::SeqCst);
	let total: i64 = durably(partial, run(calls.clone())).await.unwrap();
	assert_eq!(total, 3);
	assert_eq!(calls.load(Ordering::SeqCst), 1, "only step-b should re-execute live");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn effect_failure_is_recorded_and_replays_as_the_same_failure() {
	let stream = fresh_stream();

	let run = |scope: Scope| async move {
		let outcome = Scope::catch_user_failure(
			scope
				.effect::<i64, _>("flaky-call", || async move { Err(ok_err("boom")) })
				.await,
		)?;
		match outcome {
			Ok(v) => Ok(v),
			Err(e) => Ok(-(e.message.len() as i64)),
		}
	};

	let first: i64 = durably(stream.clone(), run).await.unwrap();
	let history = stream.read(0).await.unwrap();
	let replayed = replay_stream(history);
	let second: i64 = durably(replayed, run).await.unwrap();

	assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn diverged_history_is_reported_without_running_the_new_effect() {
	let stream = fresh_stream();
	let ran_first_version = Arc::new(AtomicUsize::new(0));
	{
		let ran = ran_first_version.clone();
		let _: i64 = durably(stream.clone(), move |scope: Scope| {
			let ran = ran.clone();
			async move {
				let v: i64 = scope
					.effect("step-a", move || {
						ran.fetch_add(1, Ordering::SeqCst);
						async move { Ok(1) }
					})
					.await?;
				Ok(v)
			}
		})
		.await
		.unwrap();
	}

	let history = stream.read(0).await.unwrap();
	let replayed = replay_stream(history);
	let ran_second_version = Arc::new(AtomicUsize::new(0));
	let ran2 = ran_second_version.clone();

	let result: ReducerResult<i64> = durably(replayed, move |scope: Scope| {
		let ran2 = ran2.clone();
		async move {
			let v: i64 = scope
				.effect("step-a-renamed", move || {
					ran2.fetch_add(1, Ordering::SeqCst);
					async move { Ok(1) }
				})
				.await?;
			Ok(v)
		}
	})
	.await;

	let err = result.unwrap_err();
	assert!(err.is_divergence());
	assert_eq!(ran_second_version.load(Ordering::SeqCst), 0, "diverging effect must not run");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_children_close_before_the_parent_observes_their_result() {
	let stream = fresh_stream();

	let total: i64 = durably(stream.clone(), |scope: Scope| async move {
		let child = scope
			.spawn(|child_scope: Scope| async move {
				let v: i64 = child_scope.effect("child-effect", || async move { Ok(5) }).await?;
				Ok(v)
			})
			.await?;
		let value = child.join().await?;
		Ok(value * 2)
	})
	.await
	.unwrap();

	assert_eq!(total, 10);

	let history = stream.read(0).await.unwrap();
	let kinds: Vec<&str> = history
		.iter()
		.map(|e| match &e.event {
			Event::Spawn { .. } => "spawn",
			Event::Yield { .. } => "yield",
			Event::Next { .. } => "next",
			Event::Close { .. } => "close",
		})
		.collect();

	// Spawn precedes the child's own Yield/Next, which precede the child's Close, which
	// precedes the root's own Close.
	assert_eq!(kinds.first(), Some(&"spawn"));
	assert_eq!(kinds.last(), Some(&"close"));
	let child_close_idx = kinds.iter().position(|k| *k == "close").unwrap();
	assert!(child_close_idx < kinds.len() - 1, "child must close before the root does");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn race_cancels_the_losing_branch() {
	let stream = fresh_stream();

	let winner: i64 = durably(stream.clone(), |scope: Scope| async move {
		let ops: Vec<Operation<i64>> = vec![
			Box::new(|s: Scope| -> BoxFuture<'static, ReducerResult<i64>> {
				Box::pin(async move { s.effect("fast", || async move { Ok(1) }).await })
			}),
			Box::new(|s: Scope| -> BoxFuture<'static, ReducerResult<i64>> {
				Box::pin(async move {
					// Never resolves on its own; `race` must cancel it once "fast" wins.
					s.effect("slow", || std::future::pending::<Result<i64, SerializedError>>())
						.await
				})
			}),
		];
		scope.race(ops).await
	})
	.await
	.unwrap();

	assert_eq!(winner, 1);

	let history = stream.read(0).await.unwrap();
	let cancelled = history
		.iter()
		.any(|e| matches!(&e.event, Event::Close { status: CloseStatus::Cancelled, .. }));
	assert!(cancelled, "the losing branch must record Close(status=cancelled)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_waits_for_every_branch_and_preserves_order() {
	let stream = fresh_stream();

	let total: Vec<i64> = durably(stream.clone(), |scope: Scope| async move {
		let ops: Vec<Operation<i64>> = vec![
			Box::new(|s: Scope| -> BoxFuture<'static, ReducerResult<i64>> {
				Box::pin(async move { s.effect("first", || async move { Ok(1) }).await })
			}),
			Box::new(|s: Scope| -> BoxFuture<'static, ReducerResult<i64>> {
				Box::pin(async move { s.effect("second", || async move { Ok(2) }).await })
			}),
			Box::new(|s: Scope| -> BoxFuture<'static, ReducerResult<i64>> {
				Box::pin(async move { s.effect("third", || async move { Ok(3) }).await })
			}),
		];
		scope.all(ops).await
	})
	.await
	.unwrap();

	assert_eq!(total, vec![1, 2, 3], "results must line up with the input order, not completion order");

	let history = stream.read(0).await.unwrap();
	let spawn_count = history.iter().filter(|e| matches!(e.event, Event::Spawn { .. })).count();
	assert_eq!(spawn_count, 3);
	let close_count = history
		.iter()
		.filter(|e| matches!(&e.event, Event::Close { status: CloseStatus::Ok, .. }))
		.count();
	assert_eq!(close_count, 4, "three children plus the root");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resource_records_acquire_and_release_as_separate_effects() {
	let stream = fresh_stream();
	let acquired = Arc::new(AtomicUsize::new(0));
	let released = Arc::new(AtomicUsize::new(0));

	{
		let acquired = acquired.clone();
		let released = released.clone();
		let _: i64 = durably(stream.clone(), move |scope: Scope| {
			let acquired = acquired.clone();
			let released = released.clone();
			async move {
				let handle = scope
					.resource(
						"resource:acquire-scope",
						async move {
							acquired.fetch_add(1, Ordering::SeqCst);
							Ok(99)
						},
						move |v: i64| async move {
							released.fetch_add(1, Ordering::SeqCst);
							assert_eq!(v, 99);
							Ok(())
						},
					)
					.await?;
				let value = *handle.get();
				handle.close().await?;
				Ok(value)
			}
		})
		.await
		.unwrap();
	}

	assert_eq!(acquired.load(Ordering::SeqCst), 1);
	assert_eq!(released.load(Ordering::SeqCst), 1);

	let history = stream.read(0).await.unwrap();
	let yields: Vec<&str> = history
		.iter()
		.filter_map(|e| match &e.event {
			Event::Yield { description, .. } => Some(description.as_str()),
			_ => None,
		})
		.collect();
	assert!(yields.contains(&"resource:acquire-scope"));
	assert!(yields.contains(&"resource:release-scope"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_drives_the_loop_body_against_the_caller_scope() {
	use futures_util::stream;

	let source_stream = fresh_stream();
	let visited = Arc::new(std::sync::Mutex::new(Vec::new()));

	let total: i64 = durably(source_stream.clone(), |scope: Scope| {
		let visited = visited.clone();
		async move {
			let items = stream::iter(vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!(3)]);
			let sum = Arc::new(std::sync::Mutex::new(0i64));
			let sum2 = sum.clone();
			scope
				.each(items, move |item_scope: Scope, value| {
					let visited = visited.clone();
					let sum = sum2.clone();
					async move {
						visited.lock().unwrap().push(item_scope.coroutine_id().clone());
						let n: i64 = chronicle_workflow::value::from_json(&value).unwrap();
						*sum.lock().unwrap() += n;
						Ok(())
					}
				})
				.await?;
			Ok(*sum.lock().unwrap())
		}
	})
	.await
	.unwrap();

	assert_eq!(total, 6);
	let visited = visited.lock().unwrap();
	assert_eq!(visited.len(), 3);
	assert!(visited.iter().all(|id| id.is_root()), "the loop body runs against the caller's own scope");
}
