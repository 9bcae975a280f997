//! Retry budget shared by every refresh cascade of one coordinator.

// self
use crate::_prelude::*;

/// When the retry counter returns to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryResetPolicy {
	/// Reset as soon as a refresh call returns a credential.
	#[default]
	OnRefresh,
	/// Reset only once a request replayed with the refreshed credential is accepted.
	OnAcceptance,
}

/// Bounds the number of refresh attempts before the session is terminated.
///
/// The budget is global to the coordinator rather than per request, so unrelated requests that
/// fail in the same cascade draw from one counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryGovernor {
	max_retries: u32,
	retry_count: u32,
	policy: RetryResetPolicy,
}
impl RetryGovernor {
	/// Creates a governor with an unused budget.
	pub fn new(max_retries: u32, policy: RetryResetPolicy) -> Self {
		Self { max_retries, retry_count: 0, policy }
	}

	/// Configured ceiling.
	pub fn max_retries(&self) -> u32 {
		self.max_retries
	}

	/// Attempts made since the last reset.
	pub fn retry_count(&self) -> u32 {
		self.retry_count
	}

	/// Active reset policy.
	pub fn policy(&self) -> RetryResetPolicy {
		self.policy
	}

	/// Returns `true` once no further refresh may start.
	pub fn is_exhausted(&self) -> bool {
		self.retry_count >= self.max_retries
	}

	/// Spends one attempt; returns `false` without spending when the budget is exhausted.
	pub fn try_acquire(&mut self) -> bool {
		if self.is_exhausted() {
			return false;
		}

		self.retry_count += 1;

		true
	}

	/// Called after a refresh call produced a credential.
	pub fn on_refresh_success(&mut self) {
		if self.policy == RetryResetPolicy::OnRefresh {
			self.reset();
		}
	}

	/// Called after the backend accepted a refreshed credential.
	pub fn on_acceptance(&mut self) {
		if self.policy == RetryResetPolicy::OnAcceptance {
			self.reset();
		}
	}

	/// Returns the budget to zero; used by fresh logins.
	pub fn reset(&mut self) {
		self.retry_count = 0;
	}
}
