//! Persistent key/value storage contracts, built-in backends, and the obfuscating wrapper the
//! session layer persists through.

pub mod device;
pub mod file;
pub mod memory;
pub mod obfuscated;

pub use device::*;
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use obfuscated::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;

/// Synchronous string key/value storage, the shape of browser persistent storage.
///
/// Implementations are shared between every store that represents the same "device"; two
/// [`ObfuscatedStore`]s over one backend behave like two tabs of the same origin.
pub trait StorageBackend
where
	Self: Send + Sync,
{
	/// Reads the raw value stored under `key`.
	fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

	/// Writes `value` under `key`, replacing any previous value.
	fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

	/// Removes `key`; removing an absent key is not an error.
	fn remove_item(&self, key: &str) -> Result<(), StoreError>;

	/// Lists every key currently stored.
	fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Error type produced by [`StorageBackend`] implementations.
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

/// Identifies the store (tab) that produced a [`StorageEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreOrigin(u64);
impl StoreOrigin {
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);

		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// Change notification broadcast to every store sharing a [`StorageBroadcast`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
	/// Logical (un-namespaced) key that changed.
	pub key: String,
	/// New value, `None` for removals.
	pub new_value: Option<String>,
	/// Store that performed the change.
	pub origin: StoreOrigin,
}

type StorageListener = Arc<dyn Fn(&StorageEvent) + Send + Sync>;

/// Handle returned by [`StorageBroadcast::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process stand-in for the cross-tab storage event bus.
///
/// Clones share the same listener list. Delivery is best-effort and synchronous; listeners run
/// outside the internal lock so they may publish or unsubscribe.
#[derive(Clone, Default)]
pub struct StorageBroadcast {
	listeners: Arc<Mutex<Vec<(SubscriptionId, StorageListener)>>>,
	next_id: Arc<AtomicU64>,
}
impl StorageBroadcast {
	/// Registers a listener and returns its subscription handle.
	pub fn subscribe(
		&self,
		listener: impl 'static + Fn(&StorageEvent) + Send + Sync,
	) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

		self.listeners.lock().push((id, Arc::new(listener)));

		id
	}

	/// Removes a listener; unknown ids are ignored.
	pub fn unsubscribe(&self, id: SubscriptionId) {
		self.listeners.lock().retain(|(existing, _)| *existing != id);
	}

	/// Delivers `event` to every listener.
	pub fn publish(&self, event: &StorageEvent) {
		let listeners: Vec<_> =
			self.listeners.lock().iter().map(|(_, listener)| listener.clone()).collect();

		for listener in listeners {
			listener(event);
		}
	}

	/// Number of registered listeners.
	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}
impl Debug for StorageBroadcast {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StorageBroadcast").field("listeners", &self.listener_count()).finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// self
	use super::*;

	#[test]
	fn broadcast_delivers_until_unsubscribed() {
		let bus = StorageBroadcast::default();
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = hits.clone();
		let id = bus.subscribe(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		let event =
			StorageEvent { key: "auth_token".into(), new_value: None, origin: StoreOrigin::next() };

		bus.publish(&event);
		bus.clone().publish(&event);
		bus.unsubscribe(id);
		bus.publish(&event);

		assert_eq!(hits.load(Ordering::SeqCst), 2);
		assert_eq!(bus.listener_count(), 0);
	}

	#[test]
	fn origins_are_unique() {
		assert_ne!(StoreOrigin::next(), StoreOrigin::next());
	}
}
