//! Storage contracts and built-in store implementations for the session credential.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, credential::Credential};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable key-value storage for named credential slots.
///
/// The session client only ever touches one slot (see
/// [`ClientConfig::credential_slot`](crate::config::ClientConfig::credential_slot)); the slot
/// name is part of the contract so several clients can share one backend.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the credential stored in `slot`, if any.
	fn load<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, Option<Credential>>;

	/// Persists or replaces the credential stored in `slot`.
	fn save<'a>(&'a self, slot: &'a str, credential: Credential) -> StoreFuture<'a, ()>;

	/// Removes the credential from `slot`; resolves to `true` when something was removed.
	fn clear<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, bool>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
