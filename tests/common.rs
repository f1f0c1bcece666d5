#![allow(dead_code)]

use std::sync::Arc;

use chronicle_workflow::prelude::*;
use chronicle_workflow::stream::MemoryStream;

pub fn fresh_stream() -> Arc<MemoryStream> {
	Arc::new(MemoryStream::new())
}

pub fn replay_stream(entries: Vec<StreamEntry>) -> Arc<MemoryStream> {
	Arc::new(MemoryStream::from_history(entries, false))
}

pub fn ok_err(message: &str) -> SerializedError {
	SerializedError::new("TestError", message)
}
