use crate::buffer::{BufferGuard, BufferManager};
use crate::collection::{Core, Seg};
use crate::error::{Result, SyncError};
use crate::kind::ValueKind;
use crate::validate::{no_dotted_keys, Validator};
use crate::StorageBackend;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A string-keyed mapping kept consistent with a persistent backend.
///
/// Every read loads fresh data from the backend first; every write loads,
/// validates the new data, mutates, and saves. Handles returned by
/// [`map_at`](SyncedMap::map_at) and [`list_at`](SyncedMap::list_at) are
/// views into the same root: writing through them costs the same single
/// backend round-trip as writing at the top level.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::{FileBackend, SyncedMap};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let doc = SyncedMap::open(FileBackend::new(dir.path().join("doc.json")))?;
/// doc.insert("count", 1)?;
/// doc.insert("tags", json!(["a", "b"]))?;
///
/// assert_eq!(doc.get("count")?, Some(json!(1)));
/// assert_eq!(doc.len()?, 2);
/// assert!(doc.contains_key("tags")?);
/// # Ok::<(), synced::SyncError>(())
/// ```
#[derive(Clone)]
pub struct SyncedMap {
	core: Arc<Core>,
	path: Vec<Seg>,
}

fn expect_map(value: &Value) -> Result<&Map<String, Value>> {
	match value {
		Value::Object(map) => Ok(map),
		other => Err(SyncError::ShapeMismatch {
			expected: ValueKind::Mapping,
			actual: ValueKind::of(other),
		}),
	}
}

fn expect_map_mut(value: &mut Value) -> Result<&mut Map<String, Value>> {
	match value {
		Value::Object(map) => Ok(map),
		other => Err(SyncError::ShapeMismatch {
			expected: ValueKind::Mapping,
			actual: ValueKind::of(other),
		}),
	}
}

impl SyncedMap {
	/// Opens a root mapping over `backend`, bound to the process-wide shared
	/// [`BufferManager`]. Performs an initial load; an absent resource is an
	/// empty mapping.
	pub fn open(backend: impl StorageBackend) -> Result<Self> {
		Self::with_manager(backend, Arc::clone(BufferManager::shared()))
	}

	/// Opens a root mapping bound to an explicit [`BufferManager`].
	///
	/// # Errors
	/// [`SyncError::ShapeMismatch`] if the resource exists but holds
	/// sequence- or scalar-shaped data.
	pub fn with_manager(backend: impl StorageBackend, manager: Arc<BufferManager>) -> Result<Self> {
		let core = Core::open(
			Arc::new(backend),
			manager,
			ValueKind::Mapping,
			vec![no_dotted_keys()],
		)?;
		Ok(SyncedMap {
			core,
			path: Vec::new(),
		})
	}

	pub(crate) fn nested(core: Arc<Core>, path: Vec<Seg>) -> Self {
		SyncedMap { core, path }
	}

	/// Installs an additional validator, run against the new data of every
	/// subsequent mutation on any handle sharing this root.
	pub fn add_validator(&self, validator: Validator) {
		self.core.add_validator(validator);
	}

	/// Returns the value stored under `key`, if any.
	pub fn get(&self, key: &str) -> Result<Option<Value>> {
		self.core
			.read(&self.path, |value| Ok(expect_map(value)?.get(key).cloned()))
	}

	/// Returns the value stored under `key`, or `default` if absent.
	pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
		Ok(self.get(key)?.unwrap_or_else(|| default.into()))
	}

	/// Stores `value` under `key`, returning the previous value if any.
	///
	/// The new entry is validated before anything is committed; a rejection
	/// leaves both memory and backend unchanged.
	pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>> {
		let key = key.into();
		let value = value.into();

		let mut probe = Map::new();
		probe.insert(key.clone(), value.clone());
		self.core.validate(&Value::Object(probe))?;

		self.core.mutate(&self.path, move |target| {
			Ok(expect_map_mut(target)?.insert(key, value))
		})
	}

	/// Removes `key`, returning its value if it was present.
	pub fn remove(&self, key: &str) -> Result<Option<Value>> {
		self.core.mutate(&self.path, |target| {
			Ok(expect_map_mut(target)?.remove(key))
		})
	}

	/// Removes and returns an arbitrary entry, or `None` if empty.
	pub fn pop_entry(&self) -> Result<Option<(String, Value)>> {
		self.core.mutate(&self.path, |target| {
			let map = expect_map_mut(target)?;
			let key = match map.keys().next() {
				Some(key) => key.clone(),
				None => return Ok(None),
			};
			Ok(map.remove(&key).map(|value| (key, value)))
		})
	}

	/// True if `key` is present.
	pub fn contains_key(&self, key: &str) -> Result<bool> {
		self.core
			.read(&self.path, |value| Ok(expect_map(value)?.contains_key(key)))
	}

	/// Number of entries.
	pub fn len(&self) -> Result<usize> {
		self.core.read(&self.path, |value| Ok(expect_map(value)?.len()))
	}

	/// True if the mapping has no entries.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len()? == 0)
	}

	/// All keys, loaded in one round-trip.
	pub fn keys(&self) -> Result<Vec<String>> {
		self.core.read(&self.path, |value| {
			Ok(expect_map(value)?.keys().cloned().collect())
		})
	}

	/// All values, loaded in one round-trip.
	pub fn values(&self) -> Result<Vec<Value>> {
		self.core.read(&self.path, |value| {
			Ok(expect_map(value)?.values().cloned().collect())
		})
	}

	/// All `(key, value)` pairs, loaded in one round-trip.
	pub fn entries(&self) -> Result<Vec<(String, Value)>> {
		self.core.read(&self.path, |value| {
			Ok(expect_map(value)?
				.iter()
				.map(|(key, value)| (key.clone(), value.clone()))
				.collect())
		})
	}

	/// Removes every entry.
	pub fn clear(&self) -> Result<()> {
		self.core.mutate(&self.path, |target| {
			expect_map_mut(target)?.clear();
			Ok(())
		})
	}

	/// Inserts every pair from `entries`, overwriting existing keys. All
	/// pairs are validated up front; one rejection aborts the whole update.
	pub fn update<I>(&self, entries: I) -> Result<()>
	where
		I: IntoIterator<Item = (String, Value)>,
	{
		let incoming: Map<String, Value> = entries.into_iter().collect();
		self.core.validate(&Value::Object(incoming.clone()))?;

		self.core.mutate(&self.path, move |target| {
			let map = expect_map_mut(target)?;
			for (key, value) in incoming {
				map.insert(key, value);
			}
			Ok(())
		})
	}

	/// Returns the value under `key`, inserting `default` first if absent.
	pub fn set_default(&self, key: impl Into<String>, default: impl Into<Value>) -> Result<Value> {
		let key = key.into();
		let default = default.into();

		let mut probe = Map::new();
		probe.insert(key.clone(), default.clone());
		self.core.validate(&Value::Object(probe))?;

		self.core.mutate(&self.path, move |target| {
			let map = expect_map_mut(target)?;
			match map.get(&key) {
				Some(existing) => Ok(existing.clone()),
				None => {
					map.insert(key, default.clone());
					Ok(default)
				}
			}
		})
	}

	/// Replaces the entire mapping with `new_data` in one write.
	///
	/// Unlike the implicit diff-based reconciliation that happens on every
	/// load, this is a deliberate wholesale replacement. The data must be
	/// mapping-shaped and pass validation; otherwise nothing is touched.
	pub fn reset(&self, new_data: Value) -> Result<()> {
		let actual = ValueKind::of(&new_data);
		if actual != ValueKind::Mapping {
			return Err(SyncError::ShapeMismatch {
				expected: ValueKind::Mapping,
				actual,
			});
		}
		self.core.validate(&new_data)?;

		self.core.mutate(&self.path, move |target| {
			*target = new_data;
			Ok(())
		})
	}

	/// The mapping as a plain JSON value, freshly loaded.
	pub fn to_value(&self) -> Result<Value> {
		self.core.read(&self.path, |value| Ok(value.clone()))
	}

	/// A handle to the mapping stored under `key`.
	///
	/// # Errors
	/// [`SyncError::KeyNotFound`] if `key` is absent,
	/// [`SyncError::ShapeMismatch`] if the value is not a mapping.
	pub fn map_at(&self, key: &str) -> Result<SyncedMap> {
		self.child_path(key, ValueKind::Mapping)?;
		let mut path = self.path.clone();
		path.push(Seg::Key(key.to_string()));
		Ok(SyncedMap::nested(Arc::clone(&self.core), path))
	}

	/// A handle to the sequence stored under `key`.
	///
	/// # Errors
	/// [`SyncError::KeyNotFound`] if `key` is absent,
	/// [`SyncError::ShapeMismatch`] if the value is not a sequence.
	pub fn list_at(&self, key: &str) -> Result<crate::SyncedList> {
		self.child_path(key, ValueKind::Sequence)?;
		let mut path = self.path.clone();
		path.push(Seg::Key(key.to_string()));
		Ok(crate::SyncedList::nested(Arc::clone(&self.core), path))
	}

	fn child_path(&self, key: &str, expected: ValueKind) -> Result<()> {
		self.core.read(&self.path, |value| {
			match expect_map(value)?.get(key) {
				Some(child) => {
					let actual = ValueKind::of(child);
					if actual == expected {
						Ok(())
					} else {
						Err(SyncError::ShapeMismatch { expected, actual })
					}
				}
				None => Err(SyncError::KeyNotFound {
					key: key.to_string(),
				}),
			}
		})
	}

	/// Opens a per-instance buffering scope for this collection's resource.
	/// Reentrant; composes with [`crate::buffer_all`] in either order.
	pub fn buffered(&self) -> BufferGuard {
		BufferGuard::new(Arc::clone(&self.core))
	}

	/// The backend resource identity this mapping is stored in.
	pub fn resource_id(&self) -> String {
		self.core.backend.resource_id()
	}
}

impl PartialEq<Value> for SyncedMap {
	/// Compares by value after a best-effort load; a failed load compares
	/// unequal.
	fn eq(&self, other: &Value) -> bool {
		self.to_value().map(|value| value == *other).unwrap_or(false)
	}
}

impl fmt::Debug for SyncedMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncedMap")
			.field("resource", &self.core.backend.resource_id())
			.field("path", &crate::collection::path_display(&self.path))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::SyncedMap;
	use crate::kv::KvStore;
	use crate::SyncError;
	use serde_json::json;

	fn fresh_map(name: &str) -> SyncedMap {
		let store = KvStore::new(name);
		SyncedMap::open(store.backend("doc")).unwrap()
	}

	#[test]
	fn test_basic_mapping_operations() {
		let map = fresh_map("map-basic");
		assert!(map.is_empty().unwrap());

		assert_eq!(map.insert("a", 1).unwrap(), None);
		assert_eq!(map.insert("a", 2).unwrap(), Some(json!(1)));
		assert_eq!(map.get("a").unwrap(), Some(json!(2)));
		assert_eq!(map.get("missing").unwrap(), None);
		assert_eq!(map.get_or("missing", "fallback").unwrap(), json!("fallback"));
		assert!(map.contains_key("a").unwrap());
		assert_eq!(map.len().unwrap(), 1);

		assert_eq!(map.remove("a").unwrap(), Some(json!(2)));
		assert_eq!(map.remove("a").unwrap(), None);
	}

	#[test]
	fn test_keys_values_entries() {
		let map = fresh_map("map-iter");
		map.insert("x", 1).unwrap();
		map.insert("y", 2).unwrap();

		let mut keys = map.keys().unwrap();
		keys.sort();
		assert_eq!(keys, vec!["x".to_string(), "y".to_string()]);
		assert_eq!(map.values().unwrap().len(), 2);
		assert_eq!(map.entries().unwrap().len(), 2);
	}

	#[test]
	fn test_update_and_set_default() {
		let map = fresh_map("map-update");
		map.update(vec![
			("a".to_string(), json!(1)),
			("b".to_string(), json!({"c": 2})),
		])
		.unwrap();
		assert_eq!(map.len().unwrap(), 2);

		assert_eq!(map.set_default("a", 99).unwrap(), json!(1));
		assert_eq!(map.set_default("z", 99).unwrap(), json!(99));
		assert_eq!(map.get("z").unwrap(), Some(json!(99)));
	}

	#[test]
	fn test_pop_entry_and_clear() {
		let map = fresh_map("map-pop");
		map.insert("only", 1).unwrap();
		assert_eq!(map.pop_entry().unwrap(), Some(("only".to_string(), json!(1))));
		assert_eq!(map.pop_entry().unwrap(), None);

		map.insert("a", 1).unwrap();
		map.insert("b", 2).unwrap();
		map.clear().unwrap();
		assert!(map.is_empty().unwrap());
	}

	#[test]
	fn test_validator_rejects_dotted_keys_without_mutating() {
		let map = fresh_map("map-validate");
		map.insert("ok", 1).unwrap();

		let err = map.insert("bad.key", 2).unwrap_err();
		assert!(matches!(err, SyncError::InvalidKey { .. }));
		// Nested occurrences are caught too.
		assert!(map.insert("outer", json!({"in.ner": 1})).is_err());

		assert_eq!(map.to_value().unwrap(), json!({"ok": 1}));
	}

	#[test]
	fn test_custom_validator_composes_with_default() {
		use std::sync::Arc;

		let map = fresh_map("map-custom-validate");
		map.add_validator(Arc::new(|value| {
			if value.get("forbidden").is_some() {
				Err(SyncError::Validation("'forbidden' is reserved".to_string()))
			} else {
				Ok(())
			}
		}));

		map.insert("fine", 1).unwrap();
		let err = map.insert("forbidden", 2).unwrap_err();
		assert!(matches!(err, SyncError::Validation(_)));
		// The default dotted-key rule still applies alongside.
		assert!(map.insert("still.bad", 3).is_err());
		assert_eq!(map.to_value().unwrap(), json!({"fine": 1}));
	}

	#[test]
	fn test_reset_requires_mapping_shape() {
		let map = fresh_map("map-reset");
		map.insert("a", 1).unwrap();

		let err = map.reset(json!([1, 2, 3])).unwrap_err();
		assert!(matches!(err, SyncError::ShapeMismatch { .. }));
		assert_eq!(map.to_value().unwrap(), json!({"a": 1}));

		map.reset(json!({"b": 2})).unwrap();
		assert_eq!(map.to_value().unwrap(), json!({"b": 2}));
	}

	#[test]
	fn test_nested_handles() {
		let map = fresh_map("map-nested");
		map.insert("child", json!({"grand": {"n": 1}})).unwrap();

		let child = map.map_at("child").unwrap();
		let grand = child.map_at("grand").unwrap();
		grand.insert("n", 2).unwrap();

		assert_eq!(map.to_value().unwrap(), json!({"child": {"grand": {"n": 2}}}));

		assert!(matches!(
			map.map_at("missing").unwrap_err(),
			SyncError::KeyNotFound { .. }
		));
		map.insert("scalar", 5).unwrap();
		assert!(matches!(
			map.map_at("scalar").unwrap_err(),
			SyncError::ShapeMismatch { .. }
		));
	}

	#[test]
	fn test_equality_against_plain_value() {
		let map = fresh_map("map-eq");
		map.insert("a", json!([1, 2])).unwrap();
		assert!(map == json!({"a": [1, 2]}));
		assert!(!(map == json!({"a": [1]})));
	}

	#[test]
	fn test_two_handles_share_one_resource() {
		let store = KvStore::new("map-shared");
		let first = SyncedMap::open(store.backend("doc")).unwrap();
		let second = SyncedMap::open(store.backend("doc")).unwrap();

		first.insert("written-by", "first").unwrap();
		assert_eq!(second.get("written-by").unwrap(), Some(json!("first")));
	}
}
