//! Runtime configuration and logging setup.
//!
//! The workspace's services configure `tracing-subscriber` with an env-filter and either a plain
//! or json formatter depending on deployment; `ReducerConfig` plays the same role `rivet_config`
//! plays for the monorepo's services, scaled down to what this crate actually needs (the full
//! layered TOML/env config system is out of scope here, see `DESIGN.md`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	Pretty,
	Json,
}

impl Default for LogFormat {
	fn default() -> Self {
		LogFormat::Pretty
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
	/// Bound of the reducer's decision queue; a full queue applies backpressure to callers
	/// submitting new effects rather than growing unbounded.
	pub queue_capacity: usize,
	pub log_format: LogFormat,
}

impl Default for ReducerConfig {
	fn default() -> Self {
		Self {
			queue_capacity: 256,
			log_format: LogFormat::default(),
		}
	}
}

/// Installs a `tracing-subscriber` global default driven by `RUST_LOG`, matching the pattern the
/// workspace's binaries use at startup. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(config: &ReducerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

	let result = match config.log_format {
		LogFormat::Pretty => subscriber.try_init(),
		LogFormat::Json => subscriber.json().try_init(),
	};

	if let Err(err) = result {
		tracing::trace!(%err, "tracing subscriber already installed");
	}
}
