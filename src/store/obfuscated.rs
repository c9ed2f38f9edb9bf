//! Namespaced key/value wrapper that obfuscates values before they reach the backend.
//!
//! Every operation is total: backend and obfuscation failures are logged and degrade to a
//! plaintext write, a raw read, or "absent", never to an error surfaced to the caller.

// self
use crate::{
	_prelude::*,
	store::{DeviceProfile, StorageBackend, StorageBroadcast, StorageEvent, StoreOrigin},
};

const DEFAULT_NAMESPACE: &str = "secure_";
const AUTH_KEY_MARKERS: [&str; 3] = ["token", "auth", "claims"];

/// Obfuscating, namespaced view over a [`StorageBackend`].
///
/// Each instance represents one tab: it has its own [`StoreOrigin`] and publishes removals of
/// auth-related keys to the shared [`StorageBroadcast`] so other tabs can react.
pub struct ObfuscatedStore {
	backend: Arc<dyn StorageBackend>,
	profile: DeviceProfile,
	namespace: String,
	broadcast: StorageBroadcast,
	origin: StoreOrigin,
}
impl ObfuscatedStore {
	/// Creates a store using the default `secure_` namespace.
	pub fn new(
		backend: Arc<dyn StorageBackend>,
		profile: DeviceProfile,
		broadcast: StorageBroadcast,
	) -> Self {
		Self {
			backend,
			profile,
			namespace: DEFAULT_NAMESPACE.into(),
			broadcast,
			origin: StoreOrigin::next(),
		}
	}

	/// Overrides the key namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();

		self
	}

	/// Origin stamped on events this store publishes.
	pub fn origin(&self) -> StoreOrigin {
		self.origin
	}

	/// Shared change bus.
	pub fn broadcast(&self) -> &StorageBroadcast {
		&self.broadcast
	}

	/// Device profile the key material is derived from.
	pub fn profile(&self) -> &DeviceProfile {
		&self.profile
	}

	/// Obfuscates and stores `value` under `key`, writing plaintext if obfuscation fails.
	pub fn set(&self, key: &str, value: &str) {
		let stored = match self.profile.seal(value) {
			Ok(sealed) => sealed,
			Err(e) => {
				tracing::warn!(key, error = %e, "Obfuscation failed; storing raw value.");

				value.to_owned()
			},
		};

		if let Err(e) = self.backend.set_item(&self.namespaced(key), &stored) {
			tracing::error!(key, error = %e, "Failed to write storage item.");
		}
	}

	/// Reads and reveals the value under `key`.
	///
	/// Falls back to the raw stored value when revealing yields nothing; returns `None` when the
	/// key is absent or the backend fails.
	pub fn get(&self, key: &str) -> Option<String> {
		let raw = match self.backend.get_item(&self.namespaced(key)) {
			Ok(raw) => raw?,
			Err(e) => {
				tracing::error!(key, error = %e, "Failed to read storage item.");

				return None;
			},
		};

		match self.profile.open(&raw) {
			Ok(plain) if !plain.is_empty() => Some(plain),
			Ok(_) => Some(raw),
			Err(e) => {
				tracing::warn!(key, error = %e, "Failed to reveal item; returning the raw value.");

				Some(raw)
			},
		}
	}

	/// Removes `key`, broadcasting the removal when the key is auth-related.
	pub fn remove(&self, key: &str) {
		if let Err(e) = self.backend.remove_item(&self.namespaced(key)) {
			tracing::error!(key, error = %e, "Failed to remove storage item.");

			return;
		}

		if is_auth_key(key) {
			self.broadcast.publish(&StorageEvent {
				key: key.to_owned(),
				new_value: None,
				origin: self.origin,
			});
		}
	}

	/// Removes every namespaced key, leaving unrelated storage untouched.
	pub fn clear(&self) {
		let keys = match self.backend.keys() {
			Ok(keys) => keys,
			Err(e) => {
				tracing::error!(error = %e, "Failed to list storage keys.");

				return;
			},
		};

		for key in keys.iter().filter_map(|key| key.strip_prefix(self.namespace.as_str())) {
			self.remove(key);
		}
	}

	/// Returns `true` when `key` holds a value.
	pub fn has(&self, key: &str) -> bool {
		match self.backend.get_item(&self.namespaced(key)) {
			Ok(value) => value.is_some(),
			Err(e) => {
				tracing::error!(key, error = %e, "Failed to probe storage item.");

				false
			},
		}
	}

	fn namespaced(&self, key: &str) -> String {
		format!("{}{key}", self.namespace)
	}
}
impl Debug for ObfuscatedStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ObfuscatedStore")
			.field("namespace", &self.namespace)
			.field("origin", &self.origin)
			.finish()
	}
}

fn is_auth_key(key: &str) -> bool {
	let lowered = key.to_ascii_lowercase();

	AUTH_KEY_MARKERS.iter().any(|marker| lowered.contains(marker))
}
