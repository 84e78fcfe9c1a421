use std::collections::HashMap;
use std::sync::Arc;

use statechart_clock::{Clock, ClockHandle};
use tracing::trace;

/// The Delayed-Send Registry (§4.4): tracks the clock handle backing each
/// outstanding delayed send, keyed by `sendId`.
///
/// Registering under an id that's already in use first cancels the prior
/// registration (the cancel-on-duplicate resolution of the §9 open question —
/// see DESIGN.md), which is what makes "at most one outstanding delayed dispatch
/// per id" an actual invariant rather than a best-effort one.
pub struct DelayedSendRegistry {
	clock: Arc<dyn Clock>,
	handles: HashMap<String, ClockHandle>,
}

impl DelayedSendRegistry {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self { clock, handles: HashMap::new() }
	}

	/// Register `handle` under `send_id`, cancelling any prior registration for
	/// the same id first.
	pub fn register(&mut self, send_id: String, handle: ClockHandle) {
		if let Some(previous) = self.handles.insert(send_id.clone(), handle) {
			self.clock.clear_timeout(previous);
			trace!(send_id, "superseded delayed send cancelled on re-registration");
		}
	}

	/// Cancel and remove the registration for `send_id`, if any. Silent if not
	/// found, per §4.2's `cancel` contract.
	pub fn cancel(&mut self, send_id: &str) {
		if let Some(handle) = self.handles.remove(send_id) {
			self.clock.clear_timeout(handle);
			trace!(send_id, "delayed send cancelled");
		}
	}

	/// Cancel every outstanding delayed send. Called from `stop()`.
	pub fn cancel_all(&mut self) {
		for (send_id, handle) in self.handles.drain() {
			self.clock.clear_timeout(handle);
			trace!(send_id, "delayed send cancelled on interpreter stop");
		}
	}
}
