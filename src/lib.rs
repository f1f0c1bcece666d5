//! Durable execution runtime for structured-concurrency workflows.
//!
//! A workflow suspends on named *effects* instead of calling out to the world directly. The
//! [`reducer`] intercepts every effect: on first execution it records the decision to an
//! append-only [`stream`]; on replay it feeds the recorded resolution back without re-running the
//! side effect, then falls through to live execution once the recorded prefix is exhausted.
//!
//! Grounded on `packages/common/chirp-workflow/core` and its successor
//! `packages/common/gasoline/core` — see `DESIGN.md` for the module-by-module ledger.

pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod primitives;
pub mod replay_index;
pub mod reducer;
pub mod scope;
pub mod stream;
pub mod value;

pub mod prelude {
	pub use crate::{
		config::ReducerConfig,
		error::{Divergence, ReducerError, ReducerResult},
		event::{CloseStatus, CoroutineId, EffectId, Event, NextStatus, StreamEntry, ROOT_COROUTINE_ID},
		primitives::{durably, Operation, Scope},
		stream::{EventStream, MemoryStream},
		value::{to_json, SerializedError},
	};
}
