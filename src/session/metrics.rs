// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for session activity.
#[derive(Debug, Default)]
pub struct SessionMetrics {
	refresh_attempts: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_failures: AtomicU64,
	waiters_parked: AtomicU64,
	replays: AtomicU64,
	terminations: AtomicU64,
}
impl SessionMetrics {
	/// Returns the number of refresh calls that were started.
	pub fn refresh_attempts(&self) -> u64 {
		self.refresh_attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh calls that produced a stored credential.
	pub fn refresh_successes(&self) -> u64 {
		self.refresh_successes.load(Ordering::Relaxed)
	}

	/// Returns the number of refresh calls that failed.
	pub fn refresh_failures(&self) -> u64 {
		self.refresh_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of requests that parked behind an in-flight refresh.
	pub fn waiters_parked(&self) -> u64 {
		self.waiters_parked.load(Ordering::Relaxed)
	}

	/// Returns the number of requests replayed with a newer credential.
	pub fn replays(&self) -> u64 {
		self.replays.load(Ordering::Relaxed)
	}

	/// Returns the number of session terminations.
	pub fn terminations(&self) -> u64 {
		self.terminations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_refresh_attempt(&self) {
		self.refresh_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_success(&self) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_failure(&self) {
		self.refresh_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_waiter_parked(&self) {
		self.waiters_parked.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_replay(&self) {
		self.replays.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_termination(&self) {
		self.terminations.fetch_add(1, Ordering::Relaxed);
	}
}
