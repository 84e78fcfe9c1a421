use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::trace;

use crate::{Clock, ClockHandle, TimerCallback};

struct Timer {
	id: u64,
	/// Virtual time (since this clock's construction) at which this timer fires.
	fire_at: Duration,
	/// Registration order, used to break ties between timers with equal `fire_at`.
	seq: u64,
	callback: Option<TimerCallback>,
}

struct Inner {
	now: Duration,
	next_id: u64,
	next_seq: u64,
	timers: Vec<Timer>,
}

/// A manually-driven `Clock` for deterministic tests. Time never advances on its
/// own; callers move it forward with `advance`, and every timer due at or before
/// the new time fires, in `(fire_at, registration order)` order, before `advance`
/// returns.
#[derive(Debug)]
pub struct SimulatedClock {
	inner: Mutex<Inner>,
}

impl Default for SimulatedClock {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Inner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Inner").field("now", &self.now).field("pending", &self.timers.len()).finish()
	}
}

impl SimulatedClock {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				now: Duration::ZERO,
				next_id: 0,
				next_seq: 0,
				timers: Vec::new(),
			}),
		}
	}

	/// Current virtual time.
	#[must_use]
	pub fn now(&self) -> Duration {
		self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).now
	}

	/// How many timers are still pending.
	#[must_use]
	pub fn pending_count(&self) -> usize {
		self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).timers.len()
	}

	/// Move virtual time forward by `by`, firing every timer due along the way.
	///
	/// Callbacks are invoked without holding the internal lock, so a callback that
	/// itself schedules or cancels a timer (e.g. a `raise`-driven re-send) observes
	/// a consistent clock rather than deadlocking.
	pub fn advance(&self, by: Duration) {
		let target = {
			let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			inner.now + by
		};

		loop {
			let due = {
				let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
				let next_index = inner
					.timers
					.iter()
					.enumerate()
					.filter(|(_, t)| t.fire_at <= target)
					.min_by_key(|(_, t)| (t.fire_at, t.seq))
					.map(|(idx, _)| idx);

				match next_index {
					Some(idx) => {
						let mut timer = inner.timers.remove(idx);
						inner.now = timer.fire_at;
						timer.callback.take()
					}
					None => {
						inner.now = target;
						break;
					}
				}
			};

			if let Some(callback) = due {
				callback();
			}
		}
	}
}

impl Clock for SimulatedClock {
	fn set_timeout(&self, delay: Duration, callback: TimerCallback) -> ClockHandle {
		let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		let id = inner.next_id;
		inner.next_id += 1;
		let seq = inner.next_seq;
		inner.next_seq += 1;
		let fire_at = inner.now + delay;

		inner.timers.push(Timer {
			id,
			fire_at,
			seq,
			callback: Some(callback),
		});
		trace!(timer_id = id, fire_at_ms = fire_at.as_millis() as u64, "simulated timer scheduled");

		ClockHandle::new(id)
	}

	fn clear_timeout(&self, handle: ClockHandle) {
		let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		let ClockHandle(id) = handle;
		if let Some(pos) = inner.timers.iter().position(|t| t.id == id) {
			inner.timers.remove(pos);
			trace!(timer_id = id, "simulated timer cancelled");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[test]
	fn fires_in_fire_at_then_registration_order() {
		let clock = SimulatedClock::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		for (label, delay_ms) in [("b", 10), ("a", 10), ("c", 5)] {
			let order = order.clone();
			clock.set_timeout(Duration::from_millis(delay_ms), Box::new(move || order.lock().unwrap().push(label)));
		}

		clock.advance(Duration::from_millis(10));
		assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
	}

	#[test]
	fn cancelled_timer_does_not_fire() {
		let clock = SimulatedClock::new();
		let fired = Arc::new(Mutex::new(false));
		let fired_clone = fired.clone();

		let handle = clock.set_timeout(Duration::from_millis(10), Box::new(move || *fired_clone.lock().unwrap() = true));
		clock.clear_timeout(handle);
		clock.advance(Duration::from_millis(20));

		assert!(!*fired.lock().unwrap());
	}

	#[test]
	fn advance_stops_exactly_at_target_with_no_timers_due() {
		let clock = SimulatedClock::new();
		clock.set_timeout(Duration::from_millis(100), Box::new(|| {}));
		clock.advance(Duration::from_millis(30));
		assert_eq!(clock.now(), Duration::from_millis(30));
		assert_eq!(clock.pending_count(), 1);
	}

	#[test]
	fn callback_can_schedule_a_new_timer_without_deadlock() {
		let clock = Arc::new(SimulatedClock::new());
		let fired = Arc::new(Mutex::new(0u32));

		let clock_clone = clock.clone();
		let fired_clone = fired.clone();
		clock.set_timeout(
			Duration::from_millis(5),
			Box::new(move || {
				*fired_clone.lock().unwrap() += 1;
				let fired_inner = fired_clone.clone();
				clock_clone.set_timeout(Duration::from_millis(5), Box::new(move || *fired_inner.lock().unwrap() += 1));
			}),
		);

		clock.advance(Duration::from_millis(20));
		assert_eq!(*fired.lock().unwrap(), 2);
	}
}
