//! Single-flight refresh coordination.
//!
//! Every state transition happens under one short critical section; nothing awaits while the
//! lock is held. Requests that hit a 401 ask the coordinator for an [`Admission`] and act on it:
//! lead the refresh, park behind it, replay immediately, or give up.

// std
use std::collections::VecDeque;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	credential::Credential,
	error::TerminationReason,
	obs,
	session::{RetryGovernor, RetryResetPolicy, SessionMetrics},
};

type WakeSender = oneshot::Sender<Wake>;

/// Message delivered to a parked request when the refresh it waits on settles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wake {
	/// A new credential is available; replay with it.
	Refreshed {
		/// Credential to attach to the replay.
		credential: Credential,
		/// Generation the credential belongs to.
		generation: u64,
	},
	/// The session ended; fail with this reason.
	Terminated(TerminationReason),
}

/// Observable coordinator phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
	/// No refresh in flight.
	Idle,
	/// A refresh is in flight.
	Refreshing {
		/// Requests currently parked behind it.
		waiters: usize,
	},
	/// The session ended; every request is rejected until the next login.
	Terminated {
		/// Why the session ended.
		reason: TerminationReason,
	},
}
impl SessionPhase {
	/// Returns a stable label suitable for span fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Refreshing { .. } => "refreshing",
			Self::Terminated { .. } => "terminated",
		}
	}
}

#[derive(Debug)]
enum Phase {
	Idle,
	Refreshing { flight: u64, waiters: VecDeque<WakeSender> },
	Terminated { reason: TerminationReason },
}
impl Phase {
	fn observe(&self) -> SessionPhase {
		match self {
			Self::Idle => SessionPhase::Idle,
			Self::Refreshing { waiters, .. } => SessionPhase::Refreshing { waiters: waiters.len() },
			Self::Terminated { reason } => SessionPhase::Terminated { reason: *reason },
		}
	}
}

#[derive(Debug)]
struct State {
	phase: Phase,
	governor: RetryGovernor,
	// Bumped whenever a new credential becomes current.
	generation: u64,
	// Bumped by every login; lets a late termination notice that it was superseded.
	epoch: u64,
	// Bumped on every Idle -> Refreshing transition; identifies the flight that owns the phase.
	flights: u64,
}

/// Decision handed to a request that was rejected with 401.
#[derive(Debug)]
pub enum Admission<'a> {
	/// The caller must perform the refresh and settle the flight.
	Lead(RefreshFlight<'a>),
	/// A refresh is already in flight; await the waiter.
	Wait(Waiter),
	/// A newer credential became current after the request was sent; replay with it.
	Replay {
		/// Generation of the current credential.
		generation: u64,
	},
	/// The retry budget is spent; the session was just terminated.
	Exhausted(Termination),
	/// The session had already ended.
	Rejected(TerminationReason),
}

/// Receiving half of a parked request.
#[derive(Debug)]
pub struct Waiter {
	rx: oneshot::Receiver<Wake>,
}
impl Waiter {
	/// Resolves once the refresh settles; `None` when the leader was cancelled before settling.
	pub async fn settled(self) -> Option<Wake> {
		self.rx.await.ok()
	}
}

/// Proof that the session was just terminated; carries what the terminator needs.
#[derive(Debug, PartialEq, Eq)]
pub struct Termination {
	reason: TerminationReason,
	epoch: u64,
	rejected: usize,
}
impl Termination {
	/// Why the session ended.
	pub fn reason(&self) -> TerminationReason {
		self.reason
	}

	/// Number of parked requests that were rejected.
	pub fn rejected(&self) -> usize {
		self.rejected
	}

	pub(crate) fn epoch(&self) -> u64 {
		self.epoch
	}
}

/// Where an unsettled flight stands relative to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightStanding {
	/// The flight still owns the refresh.
	Active,
	/// A login installed a credential while the flight was running.
	Superseded,
	/// The session ended while the flight was running.
	Terminated(TerminationReason),
}

/// How a failed flight was settled.
#[derive(Debug, PartialEq, Eq)]
pub enum FlightFailure {
	/// The failure ended the session.
	Terminated(Termination),
	/// The session had already ended for another reason.
	AlreadyTerminated(TerminationReason),
	/// A login installed a credential while the flight was running; the failure is moot.
	Superseded,
}

/// Coordinates refreshes for one session.
#[derive(Debug)]
pub struct SessionCoordinator {
	state: Mutex<State>,
	metrics: Arc<SessionMetrics>,
}
impl SessionCoordinator {
	/// Creates an idle coordinator with a fresh retry budget.
	pub fn new(max_retries: u32, policy: RetryResetPolicy, metrics: Arc<SessionMetrics>) -> Self {
		Self {
			state: Mutex::new(State {
				phase: Phase::Idle,
				governor: RetryGovernor::new(max_retries, policy),
				generation: 0,
				epoch: 0,
				flights: 0,
			}),
			metrics,
		}
	}

	/// Current phase.
	pub fn phase(&self) -> SessionPhase {
		self.state.lock().phase.observe()
	}

	/// Generation of the current credential.
	pub fn generation(&self) -> u64 {
		self.state.lock().generation
	}

	/// Refresh attempts spent since the last reset.
	pub fn retry_count(&self) -> u32 {
		self.state.lock().governor.retry_count()
	}

	/// Reason the session ended, if it has.
	pub fn terminated_reason(&self) -> Option<TerminationReason> {
		match self.state.lock().phase {
			Phase::Terminated { reason } => Some(reason),
			_ => None,
		}
	}

	/// Decides what a request that was sent with credential `observed` and rejected must do.
	pub fn admit(&self, observed: u64) -> Admission<'_> {
		let mut state = self.state.lock();

		match &mut state.phase {
			Phase::Terminated { reason } => return Admission::Rejected(*reason),
			Phase::Refreshing { waiters, .. } => {
				let (tx, rx) = oneshot::channel();

				waiters.push_back(tx);
				self.metrics.record_waiter_parked();
				obs::trace_parked(waiters.len());

				return Admission::Wait(Waiter { rx });
			},
			Phase::Idle => {},
		}

		if state.generation > observed {
			return Admission::Replay { generation: state.generation };
		}
		if !state.governor.try_acquire() {
			let termination = self.terminate_locked(&mut state, TerminationReason::RetriesExhausted);

			return Admission::Exhausted(termination);
		}

		state.flights += 1;

		let id = state.flights;

		state.phase = Phase::Refreshing { flight: id, waiters: VecDeque::new() };
		obs::trace_phase("idle", "refreshing");

		Admission::Lead(RefreshFlight { coordinator: self, id, settled: false })
	}

	/// Records that the backend accepted a request sent with credential `generation`.
	pub fn accept(&self, generation: u64) {
		let mut state = self.state.lock();

		if state.generation == generation {
			state.governor.on_acceptance();
		}
	}

	/// Installs a credential obtained outside the refresh path and reopens the session.
	///
	/// Requests parked behind an in-flight refresh are released with the new credential.
	pub fn establish(&self, credential: Credential) -> u64 {
		let mut state = self.state.lock();

		state.epoch += 1;
		state.generation += 1;
		state.governor.reset();

		let generation = state.generation;
		let previous = std::mem::replace(&mut state.phase, Phase::Idle);

		obs::trace_phase(previous.observe().as_str(), "idle");

		if let Phase::Refreshing { waiters, .. } = previous {
			wake_all(waiters, || Wake::Refreshed { credential: credential.clone(), generation });
		}

		generation
	}

	/// Ends the session. Only the first caller receives the [`Termination`].
	pub fn terminate(&self, reason: TerminationReason) -> Option<Termination> {
		let mut state = self.state.lock();

		if matches!(state.phase, Phase::Terminated { .. }) {
			return None;
		}

		Some(self.terminate_locked(&mut state, reason))
	}

	pub(crate) fn is_terminated_in(&self, epoch: u64) -> bool {
		let state = self.state.lock();

		state.epoch == epoch && matches!(state.phase, Phase::Terminated { .. })
	}

	fn terminate_locked(&self, state: &mut State, reason: TerminationReason) -> Termination {
		let previous = std::mem::replace(&mut state.phase, Phase::Terminated { reason });
		let rejected = match previous {
			Phase::Refreshing { waiters, .. } => wake_all(waiters, || Wake::Terminated(reason)),
			_ => 0,
		};

		self.metrics.record_termination();
		obs::trace_termination(reason, rejected);

		Termination { reason, epoch: state.epoch, rejected }
	}

	fn standing(&self, id: u64) -> FlightStanding {
		standing_in(&self.state.lock().phase, id)
	}

	fn settle_success(
		&self,
		id: u64,
		credential: Credential,
	) -> Result<ReplayBatch, FlightStanding> {
		let mut state = self.state.lock();

		match standing_in(&state.phase, id) {
			FlightStanding::Active => {},
			standing => return Err(standing),
		}

		let waiters = match std::mem::replace(&mut state.phase, Phase::Idle) {
			Phase::Refreshing { waiters, .. } => waiters,
			_ => VecDeque::new(),
		};

		state.generation += 1;
		state.governor.on_refresh_success();
		obs::trace_phase("refreshing", "idle");

		Ok(ReplayBatch { waiters, credential, generation: state.generation })
	}

	fn settle_failure(&self, id: u64, reason: TerminationReason) -> FlightFailure {
		let mut state = self.state.lock();

		match standing_in(&state.phase, id) {
			FlightStanding::Active =>
				FlightFailure::Terminated(self.terminate_locked(&mut state, reason)),
			FlightStanding::Superseded => FlightFailure::Superseded,
			FlightStanding::Terminated(reason) => FlightFailure::AlreadyTerminated(reason),
		}
	}

	fn abandon(&self, id: u64) {
		let mut state = self.state.lock();

		if standing_in(&state.phase, id) == FlightStanding::Active {
			// Dropping the senders lets every waiter re-enter admission.
			state.phase = Phase::Idle;
			obs::trace_phase("refreshing", "idle");
		}
	}
}

fn standing_in(phase: &Phase, id: u64) -> FlightStanding {
	match phase {
		Phase::Refreshing { flight, .. } if *flight == id => FlightStanding::Active,
		Phase::Refreshing { .. } | Phase::Idle => FlightStanding::Superseded,
		Phase::Terminated { reason } => FlightStanding::Terminated(*reason),
	}
}

/// Exclusive right to perform the current refresh.
///
/// Dropping an unsettled flight (for example when the leading request is cancelled) returns the
/// coordinator to idle and releases the waiters so one of them can lead instead.
#[derive(Debug)]
pub struct RefreshFlight<'a> {
	coordinator: &'a SessionCoordinator,
	id: u64,
	settled: bool,
}
impl RefreshFlight<'_> {
	/// Reports whether the flight still owns the refresh.
	pub fn standing(&self) -> FlightStanding {
		self.coordinator.standing(self.id)
	}

	/// Publishes `credential` as current and hands back the parked requests.
	///
	/// Fails with the flight's standing when a login or a termination took the refresh away from
	/// it; the coordinator is left untouched in that case.
	pub fn succeed(mut self, credential: Credential) -> Result<ReplayBatch, FlightStanding> {
		self.settled = true;

		self.coordinator.settle_success(self.id, credential)
	}

	/// Ends the session because the refresh failed, unless a login or another termination
	/// already settled the phase.
	pub fn fail(mut self, reason: TerminationReason) -> FlightFailure {
		self.settled = true;

		self.coordinator.settle_failure(self.id, reason)
	}
}
impl Drop for RefreshFlight<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.coordinator.abandon(self.id);
		}
	}
}

/// Requests that parked behind a successful refresh.
///
/// They are woken in arrival order when the batch is released or dropped, so the request that
/// led the refresh can replay first.
#[derive(Debug)]
pub struct ReplayBatch {
	waiters: VecDeque<WakeSender>,
	credential: Credential,
	generation: u64,
}
impl ReplayBatch {
	/// Credential produced by the refresh.
	pub fn credential(&self) -> &Credential {
		&self.credential
	}

	/// Generation of the refreshed credential.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Number of parked requests.
	pub fn len(&self) -> usize {
		self.waiters.len()
	}

	/// Returns `true` when nobody parked behind the refresh.
	pub fn is_empty(&self) -> bool {
		self.waiters.is_empty()
	}

	/// Wakes every parked request.
	pub fn release(self) {}
}
impl Drop for ReplayBatch {
	fn drop(&mut self) {
		let waiters = std::mem::take(&mut self.waiters);
		let (credential, generation) = (&self.credential, self.generation);

		wake_all(waiters, || Wake::Refreshed { credential: credential.clone(), generation });
	}
}

fn wake_all(waiters: VecDeque<WakeSender>, mut wake: impl FnMut() -> Wake) -> usize {
	let count = waiters.len();

	for tx in waiters {
		// A closed receiver belongs to a waiter that timed out.
		let _ = tx.send(wake());
	}

	count
}
