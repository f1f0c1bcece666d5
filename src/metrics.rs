//! Process-wide counters for the reducer's decision loop.
//!
//! Grounded on the `lazy_static!` + `prometheus` registration pattern used throughout the
//! workspace's services for ambient metrics (the successor `gasoline` crate carries the same
//! concern via the internal `rivet-metrics` crate, which this workspace cannot depend on outside
//! the monorepo; `prometheus` + `lazy_static` directly is the portable equivalent — see
//! `DESIGN.md`).

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
	pub static ref EFFECTS_REPLAYED: IntCounter =
		register_int_counter!("chronicle_effects_replayed_total", "Effects resolved from recorded history without re-executing.")
			.expect("metric registration is infallible for a unique name");
	pub static ref EFFECTS_LIVE: IntCounter =
		register_int_counter!("chronicle_effects_live_total", "Effects executed live and appended to the stream.")
			.expect("metric registration is infallible for a unique name");
	pub static ref DIVERGENCES: IntCounter =
		register_int_counter!("chronicle_divergences_total", "Replays aborted because recorded history no longer matched the running code.")
			.expect("metric registration is infallible for a unique name");
}
