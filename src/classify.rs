//! Effect classification: infrastructure effects are never recorded, everything else is a
//! recordable "user" effect subject to record/replay and divergence checks.

use std::collections::HashSet;

use lazy_static::lazy_static;

/// Primitives emit these descriptions for their own internal bookkeeping effects. They are
/// deterministic consequences of structural code shape (which primitive was called, in what
/// order) rather than of the outside world, so recording them would be redundant with the
/// `Spawn`/`Close` events the primitives already emit.
// Notably absent: `resource:acquire-scope` / `resource:release-scope`. Those names label real
// user-supplied side effects (what a resource actually acquires and releases) and must go
// through ordinary record/replay — only the scope bookkeeping around them is infrastructure.
const INFRASTRUCTURE_DESCRIPTIONS: &[&str] = &[
	"spawn:create-scope",
	"all:await-branch",
	"race:await-winner",
	"race:cancel-losers",
	"scoped:enter",
	"scoped:exit",
	"each:subscribe",
	"each:next-item",
	"each:done",
	"callcc",
];

/// Descriptions with this prefix are generated per call site (e.g. an inline closure given a
/// unique id at expansion time) and are infrastructure regardless of the generated suffix.
const INFRASTRUCTURE_PREFIX: &str = "inline-generator:";

lazy_static! {
	static ref INFRASTRUCTURE_SET: HashSet<&'static str> = INFRASTRUCTURE_DESCRIPTIONS.iter().copied().collect();
}

pub fn is_infrastructure(description: &str) -> bool {
	INFRASTRUCTURE_SET.contains(description) || description.starts_with(INFRASTRUCTURE_PREFIX)
}
