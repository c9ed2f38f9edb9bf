//! Thread-safe in-memory [`StorageBackend`] for tests, demos, and multi-tab simulations.

// self
use crate::{
	_prelude::*,
	store::{StorageBackend, StoreError},
};

type ItemMap = Arc<RwLock<HashMap<String, String>>>;

/// In-process backend; clones share the same map, like tabs sharing one origin's storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend(ItemMap);
impl MemoryBackend {
	/// Number of stored items.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl StorageBackend for MemoryBackend {
	fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.0.read().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.0.write().insert(key.to_owned(), value.to_owned());

		Ok(())
	}

	fn remove_item(&self, key: &str) -> Result<(), StoreError> {
		self.0.write().remove(key);

		Ok(())
	}

	fn keys(&self) -> Result<Vec<String>, StoreError> {
		Ok(self.0.read().keys().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn clones_share_items() {
		let tab_a = MemoryBackend::default();
		let tab_b = tab_a.clone();

		tab_a.set_item("k", "v").expect("Memory backend writes should succeed.");

		assert_eq!(
			tab_b.get_item("k").expect("Memory backend reads should succeed."),
			Some("v".into())
		);

		tab_b.remove_item("k").expect("Memory backend removals should succeed.");

		assert!(tab_a.is_empty());
	}
}
