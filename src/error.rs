use crate::event::{CoroutineId, EffectId};

/// Detail attached to [`ReducerError::Divergence`].
///
/// Grounded on `WorkflowError::HistoryDiverged` in
/// `packages/common/chirp-workflow/core/src/error.rs`, generalized from location-indexed replay
/// to effect-id-indexed replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
	pub coroutine_id: CoroutineId,
	pub effect_id: Option<EffectId>,
	pub expected: String,
	pub actual: String,
	pub offset: u64,
}

impl std::fmt::Display for Divergence {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"expected `{}`, found `{}` at offset {} (coroutine {})",
			self.expected, self.actual, self.offset, self.coroutine_id
		)
	}
}

pub type ReducerResult<T> = std::result::Result<T, ReducerError>;

/// Errors produced by the reducer, the replay index, and the scope-lifecycle middleware.
///
/// [`ReducerError::Divergence`] is the one variant a workflow body must never intercept: it is
/// not a recorded effect failure, it means the recorded history no longer matches the code that
/// is replaying it. `Scope::catch_user_failure` enforces this the same way
/// `WorkflowCtx::catch_unrecoverable` refuses to hand `HistoryDiverged` back to caller code.
#[derive(Debug, thiserror::Error)]
pub enum ReducerError {
	#[error("history diverged: {0}")]
	Divergence(Divergence),

	#[error("effect `{description}` failed: {source}")]
	UserFailure {
		description: String,
		source: crate::value::SerializedError,
	},

	#[error("stream is closed, cannot append further events")]
	StreamClosed,

	#[error("invalid read offset: {0}")]
	InvalidOffset(i64),

	#[error("replayed Next for effect {0} carries a value that does not deserialize to the expected type: {1}")]
	ResolutionMismatch(EffectId, serde_json::Error),

	#[error("replay index has no recorded spawn for coroutine {0}, but live execution observed one")]
	MissingSpawn(CoroutineId),

	#[error("spawned scope `{0}` panicked or was cancelled before it recorded its own Close")]
	ChildTaskFailed(CoroutineId),

	#[error(transparent)]
	Serialize(#[from] serde_json::Error),

	#[error("effect channel closed before a response was produced (reducer task panicked or shut down)")]
	ReducerGone,
}

impl ReducerError {
	/// Mirrors `WorkflowError::is_recoverable`: divergence is the one failure mode a workflow
	/// can never treat as a normal, catchable effect error.
	pub fn is_recoverable(&self) -> bool {
		!matches!(self, ReducerError::Divergence(_))
	}

	pub fn is_divergence(&self) -> bool {
		matches!(self, ReducerError::Divergence(_))
	}

	pub fn as_divergence(&self) -> Option<&Divergence> {
		match self {
			ReducerError::Divergence(d) => Some(d),
			_ => None,
		}
	}

	/// Renders any non-divergence error as the `SerializedError` a `Close(status=err)` would
	/// carry. `UserFailure` already has one; everything else is rendered from its `Display`.
	pub fn to_serialized(&self) -> crate::value::SerializedError {
		match self {
			ReducerError::UserFailure { source, .. } => source.clone(),
			other => crate::value::SerializedError::new("ReducerError", other.to_string()),
		}
	}
}
