use crate::error::Result;
use crate::{ResourceMeta, ResourceVersion, StorageBackend};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An in-memory key-value store standing in for a Redis-like client.
///
/// Values are JSON-encoded byte strings; each key carries a monotonic write
/// revision that backends expose as their modification stamp. The handle is
/// cheaply cloneable and shared, exactly like a real client connection.
///
/// # Examples
/// ```
/// use synced::{KvStore, SyncedMap};
///
/// let store = KvStore::new("sessions");
/// let doc = SyncedMap::open(store.backend("user-42"))?;
/// doc.insert("visits", 1)?;
/// # Ok::<(), synced::SyncError>(())
/// ```
#[derive(Clone)]
pub struct KvStore {
	name: String,
	inner: Arc<Mutex<HashMap<String, KvSlot>>>,
}

struct KvSlot {
	bytes: Vec<u8>,
	revision: u64,
}

impl KvStore {
	/// Creates an empty named store.
	pub fn new(name: impl Into<String>) -> Self {
		KvStore {
			name: name.into(),
			inner: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// A backend bound to one key of this store.
	pub fn backend(&self, key: impl Into<String>) -> KvBackend {
		KvBackend {
			store: self.clone(),
			key: key.into(),
		}
	}

	/// Writes raw bytes directly, bypassing any collection or buffer. Bumps
	/// the key's revision like any other write; useful to stand in for an
	/// independent external writer.
	pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
		let mut inner = self.inner.lock().unwrap();
		let revision = inner.get(key).map_or(0, |slot| slot.revision) + 1;
		inner.insert(key.to_string(), KvSlot { bytes, revision });
	}

	/// Reads the raw bytes stored under `key`, if any.
	pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
		self.inner.lock().unwrap().get(key).map(|slot| slot.bytes.clone())
	}

	/// Removes `key` entirely, so it reads back as absent.
	pub fn delete(&self, key: &str) {
		self.inner.lock().unwrap().remove(key);
	}

	/// Number of keys currently stored.
	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len()
	}

	/// True if the store holds no keys.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Backend bound to one key of a [`KvStore`].
pub struct KvBackend {
	store: KvStore,
	key: String,
}

impl StorageBackend for KvBackend {
	fn resource_id(&self) -> String {
		format!("kv://{}/{}", self.store.name, self.key)
	}

	fn load_resource(&self) -> Result<Option<Value>> {
		let bytes = self.store.get_raw(&self.key);
		match bytes {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	fn save_resource(&self, data: &Value) -> Result<()> {
		let bytes = serde_json::to_vec(data)?;
		self.store.put_raw(&self.key, bytes);
		Ok(())
	}

	fn resource_meta(&self) -> Result<Option<ResourceMeta>> {
		let inner = self.store.inner.lock().unwrap();
		Ok(inner.get(&self.key).map(|slot| ResourceMeta {
			len: slot.bytes.len() as u64,
			version: ResourceVersion::Revision(slot.revision),
		}))
	}
}
