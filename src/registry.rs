use crate::error::{Result, SyncError};
use crate::file::FileBackend;
use crate::StorageBackend;
use std::collections::HashMap;
use std::sync::Mutex;

type BackendFactory = Box<dyn Fn(&str) -> Result<Box<dyn StorageBackend>> + Send + Sync>;

/// Registry mapping backend identifier strings to backend factories.
///
/// Lets code that only knows an identifier and a locator string (say, from a
/// config file) construct backends without compile-time knowledge of the
/// concrete types. Asking for an unregistered identifier fails loudly with
/// [`SyncError::UnknownBackend`]; nothing is ever silently passed through.
///
/// # Examples
/// ```
/// use synced::{BackendRegistry, SyncedMap};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let locator = dir.path().join("doc.json").display().to_string();
/// let registry = BackendRegistry::with_defaults();
/// let backend = registry.open("json-file", &locator)?;
/// let doc = SyncedMap::open(backend)?;
/// # Ok::<(), synced::SyncError>(())
/// ```
pub struct BackendRegistry {
	factories: Mutex<HashMap<String, BackendFactory>>,
}

impl BackendRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		BackendRegistry {
			factories: Mutex::new(HashMap::new()),
		}
	}

	/// A registry with the built-in file backend registered as `json-file`
	/// (locator: a filesystem path). Store-backed backends capture a client
	/// handle, so they are registered by the caller who owns that handle.
	pub fn with_defaults() -> Self {
		let registry = Self::new();
		registry.register("json-file", |locator| {
			Ok(Box::new(FileBackend::new(locator)) as Box<dyn StorageBackend>)
		});
		registry
	}

	/// Registers `factory` under `id`, replacing any previous registration.
	pub fn register<F>(&self, id: impl Into<String>, factory: F)
	where
		F: Fn(&str) -> Result<Box<dyn StorageBackend>> + Send + Sync + 'static,
	{
		self.factories
			.lock()
			.unwrap()
			.insert(id.into(), Box::new(factory));
	}

	/// True if a factory is registered under `id`.
	pub fn contains(&self, id: &str) -> bool {
		self.factories.lock().unwrap().contains_key(id)
	}

	/// Constructs a backend for `locator` via the factory registered under
	/// `id`.
	///
	/// # Errors
	/// [`SyncError::UnknownBackend`] if nothing is registered under `id`.
	pub fn open(&self, id: &str, locator: &str) -> Result<Box<dyn StorageBackend>> {
		let factories = self.factories.lock().unwrap();
		match factories.get(id) {
			Some(factory) => factory(locator),
			None => Err(SyncError::UnknownBackend(id.to_string())),
		}
	}
}

impl Default for BackendRegistry {
	fn default() -> Self {
		Self::with_defaults()
	}
}

#[cfg(test)]
mod tests {
	use super::BackendRegistry;
	use crate::kv::KvStore;
	use crate::{StorageBackend, SyncError, SyncedMap};
	use serde_json::json;
	use tempfile::TempDir;

	#[test]
	fn test_unknown_backend_fails_loudly() {
		let registry = BackendRegistry::new();
		let err = match registry.open("nope", "anything") {
			Err(err) => err,
			Ok(_) => panic!("expected an error for an unregistered backend"),
		};
		match err {
			SyncError::UnknownBackend(id) => assert_eq!(id, "nope"),
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn test_default_file_backend() {
		let dir = TempDir::new().unwrap();
		let locator = dir.path().join("doc.json").display().to_string();

		let registry = BackendRegistry::with_defaults();
		assert!(registry.contains("json-file"));

		let backend = registry.open("json-file", &locator).unwrap();
		backend.save_resource(&json!({"via": "registry"})).unwrap();
		assert!(dir.path().join("doc.json").exists());
	}

	#[test]
	fn test_registered_store_backend_feeds_collections() {
		let store = KvStore::new("registry-test");
		let registry = BackendRegistry::new();
		let captured = store.clone();
		registry.register("kv", move |locator| {
			Ok(Box::new(captured.backend(locator)) as Box<dyn StorageBackend>)
		});

		let doc = SyncedMap::open(registry.open("kv", "doc-1").unwrap()).unwrap();
		doc.insert("ok", true).unwrap();
		assert!(store.get_raw("doc-1").is_some());
	}
}
