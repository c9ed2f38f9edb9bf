//! Simple file-backed [`StorageBackend`] for desktop shells and CLIs that need sessions to
//! survive restarts.

// std
use std::{
	fs::{self, File},
	io::{self, ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{StorageBackend, StoreError},
};

/// Persists items to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileBackend {
	path: PathBuf,
	items: Arc<RwLock<BTreeMap<String, String>>>,
}
impl FileBackend {
	/// Opens (or creates) a backend at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, items: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
			Err(e) => return Err(io_failure("read", path, e)),
		};

		if bytes.is_empty() {
			return Ok(BTreeMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Session snapshot {} is not a JSON object: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() =>
				fs::create_dir_all(parent).map_err(|e| io_failure("create", parent, e)),
			_ => Ok(()),
		}
	}

	// Stages to a sibling file, then renames it over the snapshot.
	fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StoreError> {
		let encoded = serde_json::to_vec_pretty(items).map_err(|e| StoreError::Serialization {
			message: format!("Session snapshot could not be encoded: {e}"),
		})?;
		let staging = self.path.with_extension("tmp");

		Self::ensure_parent_exists(&self.path)?;

		let mut file = File::create(&staging).map_err(|e| io_failure("create", &staging, e))?;

		file.write_all(&encoded).map_err(|e| io_failure("write", &staging, e))?;
		file.sync_all().map_err(|e| io_failure("sync", &staging, e))?;
		drop(file);

		fs::rename(&staging, &self.path).map_err(|e| io_failure("replace", &self.path, e))
	}
}
impl StorageBackend for FileBackend {
	fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.items.read().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let mut items = self.items.write();

		items.insert(key.to_owned(), value.to_owned());

		self.persist(&items)
	}

	fn remove_item(&self, key: &str) -> Result<(), StoreError> {
		let mut items = self.items.write();

		if items.remove(key).is_none() {
			return Ok(());
		}

		self.persist(&items)
	}

	fn keys(&self) -> Result<Vec<String>, StoreError> {
		Ok(self.items.read().keys().cloned().collect())
	}
}

fn io_failure(action: &str, path: &Path, e: io::Error) -> StoreError {
	StoreError::Backend { message: format!("Could not {action} {}: {e}", path.display()) }
}
