//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	credential::Credential,
	store::{CredentialStore, StoreError, StoreFuture},
};

type SlotMap = Arc<RwLock<HashMap<String, Credential>>>;

/// Storage backend that keeps credentials in-process; nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(SlotMap);
impl MemoryStore {
	/// Returns a store pre-seeded with `credential` in `slot`.
	pub fn seeded(slot: impl Into<String>, credential: Credential) -> Self {
		let store = Self::default();

		store.0.write().insert(slot.into(), credential);

		store
	}

	fn load_now(map: SlotMap, slot: &str) -> Option<Credential> {
		map.read().get(slot).cloned()
	}

	fn save_now(map: SlotMap, slot: &str, credential: Credential) -> Result<(), StoreError> {
		map.write().insert(slot.to_owned(), credential);

		Ok(())
	}

	fn clear_now(map: SlotMap, slot: &str) -> bool {
		map.write().remove(slot).is_some()
	}
}
impl CredentialStore for MemoryStore {
	fn load<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, Option<Credential>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::load_now(map, slot)) })
	}

	fn save<'a>(&'a self, slot: &'a str, credential: Credential) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, slot, credential) })
	}

	fn clear<'a>(&'a self, slot: &'a str) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::clear_now(map, slot)) })
	}
}
