use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Identity of an addressable actor.
///
/// Cheap to clone (backed by `Arc<str>`) since it's threaded through every resolved
/// action, child registry entry, and log line.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(Arc<str>);

/// The conventional target denoting "this actor's own inbox", regardless of which
/// state is currently active.
pub const SELF_TARGET: &str = "#_internal";

impl ActorId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	#[must_use]
	pub fn is_self_target(&self) -> bool {
		&*self.0 == SELF_TARGET
	}
}

impl fmt::Display for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ActorId({})", self.0)
	}
}

impl From<&str> for ActorId {
	fn from(s: &str) -> Self {
		Self::new(Arc::from(s))
	}
}

impl From<String> for ActorId {
	fn from(s: String) -> Self {
		Self::new(Arc::from(s.as_str()))
	}
}

/// The capability every actor exposes to holders of an `ActorRef`, regardless of
/// whether it's backed by a nested machine, a promise, an observable, or a callback.
///
/// This is the "capability, not concrete type" `ActorRef` from the data model: a
/// parent holds `Arc<dyn ActorHandle>` for each of its children and never needs to
/// know which `Behavior` variant produced it.
pub trait ActorHandle: Send + Sync {
	fn id(&self) -> &ActorId;

	/// Enqueue an event on this actor's inbox. Must not block and must be safe to
	/// call after the actor has stopped (a no-op in that case).
	fn send(&self, event: Event);

	/// Stop the actor. Idempotent; safe to call more than once.
	fn stop(&self);
}

impl fmt::Debug for dyn ActorHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ActorRef({})", self.id())
	}
}

/// Shared handle to any actor. Held by a parent as a strong reference; other
/// holders (siblings, the public façade) must assume the actor may be stopped out
/// from under them at any time, per the data model's "weak-by-convention" note.
pub type ActorRef = Arc<dyn ActorHandle>;
