//! Session termination side effects: clearing the stored credential and announcing the end.

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	error::TerminationReason,
	session::{SessionCoordinator, Termination},
	store::{CredentialStore, StoreError},
};

/// Receives a callback whenever the session ends.
pub trait SessionObserver
where
	Self: Send + Sync,
{
	/// Called once per termination, after the stored credential was cleared.
	fn session_ended(&self, event: &SessionEnded);
}

/// Details of a session end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnded {
	/// Why the session ended.
	pub reason: TerminationReason,
	/// When the termination was published.
	pub at: OffsetDateTime,
}

/// Session lifecycle status broadcast to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
	/// Requests are dispatched normally.
	Active,
	/// The session ended; a login is required.
	Ended(SessionEnded),
}
impl SessionStatus {
	/// Returns `true` once the session ended.
	pub fn is_ended(&self) -> bool {
		matches!(self, Self::Ended(_))
	}
}

/// Applies the side effects of a [`Termination`].
pub struct SessionTerminator {
	store: Arc<dyn CredentialStore>,
	slot: String,
	store_guard: Arc<AsyncMutex<()>>,
	status: watch::Sender<SessionStatus>,
	observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}
impl SessionTerminator {
	/// Creates a terminator for `slot` of `store`.
	///
	/// `store_guard` must be the same lock that serializes logins and refresh writes.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		slot: impl Into<String>,
		store_guard: Arc<AsyncMutex<()>>,
	) -> Self {
		let (status, _) = watch::channel(SessionStatus::Active);

		Self { store, slot: slot.into(), store_guard, status, observers: Default::default() }
	}

	/// Registers an observer for future terminations.
	pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
		self.observers.write().push(observer);
	}

	/// Current status.
	pub fn status(&self) -> SessionStatus {
		self.status.borrow().clone()
	}

	/// Returns a receiver that sees every status change.
	pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
		self.status.subscribe()
	}

	/// Marks the session active again after a login.
	pub fn activate(&self) {
		self.status.send_replace(SessionStatus::Active);
	}

	/// Clears the stored credential and announces the end.
	///
	/// Resolves to `false` without side effects when a login reopened the session first.
	/// Observers are notified even when clearing the store fails; the store error is returned
	/// afterwards.
	pub async fn finish(
		&self,
		coordinator: &SessionCoordinator,
		termination: Termination,
	) -> Result<bool, StoreError> {
		let _guard = self.store_guard.lock().await;

		if !coordinator.is_terminated_in(termination.epoch()) {
			return Ok(false);
		}

		let cleared = self.store.clear(&self.slot).await;
		let event = SessionEnded { reason: termination.reason(), at: OffsetDateTime::now_utc() };

		self.status.send_replace(SessionStatus::Ended(event.clone()));

		let observers = self.observers.read().clone();

		for observer in observers {
			observer.session_ended(&event);
		}

		cleared.map(|_| true)
	}
}
impl Debug for SessionTerminator {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SessionTerminator")
			.field("slot", &self.slot)
			.field("status", &*self.status.borrow())
			.field("observers", &self.observers.read().len())
			.finish()
	}
}
