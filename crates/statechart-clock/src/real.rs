use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

use crate::{Clock, ClockHandle, TimerCallback};

/// The default, real-time `Clock`. Every `set_timeout` spawns a task on the
/// ambient tokio runtime that sleeps for `delay` and then invokes the callback;
/// `clear_timeout` aborts that task if it hasn't already run.
///
/// `pending` is shared with each spawned task (not just held by `RealClock`) so a
/// timer can remove its own entry once it fires naturally — otherwise a
/// long-lived clock backing a machine with many never-cancelled delayed sends
/// (e.g. a traffic light cycling forever) would accumulate one stale
/// `AbortHandle` per firing for the lifetime of the process.
#[derive(Debug, Default)]
pub struct RealClock {
	next_id: AtomicU64,
	pending: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl RealClock {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

impl Clock for RealClock {
	fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> ClockHandle {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let pending = self.pending.clone();

		let task = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			callback();
			pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
		});
		let abort = task.abort_handle();

		self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, abort);
		trace!(timer_id = id, delay_ms = delay.as_millis() as u64, "timer scheduled");

		ClockHandle::new(id)
	}

	fn clear_timeout(&self, handle: ClockHandle) {
		let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(abort) = pending.remove(&handle.0) {
			abort.abort();
			trace!(timer_id = handle.0, "timer cancelled");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use tokio::sync::Notify;

	use super::*;

	#[tokio::test]
	async fn fires_after_delay() {
		let clock = RealClock::new();
		let notify = Arc::new(Notify::new());
		let notify_clone = notify.clone();

		clock.set_timeout(Duration::from_millis(5), Box::new(move || notify_clone.notify_one()));

		tokio::time::timeout(Duration::from_secs(1), notify.notified()).await.expect("timer should fire");
	}

	#[tokio::test]
	async fn cleared_timer_never_fires() {
		let clock = RealClock::new();
		let notify = Arc::new(Notify::new());
		let notify_clone = notify.clone();

		let handle = clock.set_timeout(Duration::from_millis(20), Box::new(move || notify_clone.notify_one()));
		clock.clear_timeout(handle);

		let result = tokio::time::timeout(Duration::from_millis(60), notify.notified()).await;
		assert!(result.is_err(), "cancelled timer must not fire");
	}
}
