//! The durable stream: an append-only log of recorded events, closeable exactly once.
//!
//! Grounded on the storage-backed append/read split in
//! `packages/common/chirp-workflow/core/src/db/mod.rs` (the `Database` trait there separates
//! "write history" from "read history" the same way); the concrete storage backend (FoundationDB,
//! SQLite, Postgres) is explicitly out of scope here, so only an in-memory implementation ships.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::{Event, StreamEntry};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
	#[error("stream is closed")]
	Closed,
	#[error("invalid read offset: {0}")]
	InvalidOffset(i64),
}

/// The durable stream abstraction a reducer replays against and appends to.
#[async_trait]
pub trait EventStream: Send + Sync {
	async fn append(&self, event: Event) -> Result<u64, StreamError>;

	/// Reads all entries at or after `from_offset`. Negative offsets are rejected rather than
	/// clamped, since a negative offset can only arise from a caller bug.
	async fn read(&self, from_offset: i64) -> Result<Vec<StreamEntry>, StreamError>;

	async fn len(&self) -> u64;

	async fn is_closed(&self) -> bool;

	/// Marks the stream closed. Idempotent; closing an already-closed stream is a no-op.
	async fn close(&self);
}

/// An in-memory `EventStream`, primarily for tests and for hosts that checkpoint the whole
/// history elsewhere and only need `durably` to see it as a stream.
#[derive(Debug, Default)]
pub struct MemoryStream {
	entries: RwLock<Vec<StreamEntry>>,
	closed: AtomicBool,
}

impl MemoryStream {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds a stream from a previously recorded history, e.g. loaded from a checkpoint.
	pub fn from_history(entries: Vec<StreamEntry>, closed: bool) -> Self {
		Self {
			entries: RwLock::new(entries),
			closed: AtomicBool::new(closed),
		}
	}

	pub fn into_shared(self) -> Arc<dyn EventStream> {
		Arc::new(self)
	}
}

#[async_trait]
impl EventStream for MemoryStream {
	async fn append(&self, event: Event) -> Result<u64, StreamError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(StreamError::Closed);
		}
		let mut entries = self.entries.write().await;
		let offset = entries.len() as u64;
		entries.push(StreamEntry { offset, event });
		Ok(offset)
	}

	async fn read(&self, from_offset: i64) -> Result<Vec<StreamEntry>, StreamError> {
		if from_offset < 0 {
			return Err(StreamError::InvalidOffset(from_offset));
		}
		let entries = self.entries.read().await;
		Ok(entries
			.iter()
			.skip(from_offset as usize)
			.cloned()
			.collect())
	}

	async fn len(&self) -> u64 {
		self.entries.read().await.len() as u64
	}

	async fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}
