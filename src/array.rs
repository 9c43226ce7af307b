use crate::error::Result;
use crate::{ResourceMeta, ResourceVersion, StorageBackend};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An in-memory dataset group standing in for a Zarr-like chunked-array
/// store.
///
/// Each dataset name maps to a single object-coded slot holding one JSON
/// value; the on-disk chunk format of the real thing is out of scope and the
/// group is treated as an opaque name→value surface. Slots carry a write
/// revision used as the modification stamp.
///
/// # Examples
/// ```
/// use synced::{ArrayGroup, SyncedList};
///
/// let group = ArrayGroup::new("results");
/// let runs = SyncedList::open(group.backend("runs"))?;
/// runs.push(0.25)?;
/// # Ok::<(), synced::SyncError>(())
/// ```
#[derive(Clone)]
pub struct ArrayGroup {
	name: String,
	inner: Arc<Mutex<HashMap<String, Slot>>>,
}

struct Slot {
	value: Value,
	revision: u64,
}

impl ArrayGroup {
	/// Creates an empty named group.
	pub fn new(name: impl Into<String>) -> Self {
		ArrayGroup {
			name: name.into(),
			inner: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// A backend bound to one dataset slot of this group.
	pub fn backend(&self, dataset: impl Into<String>) -> ArrayBackend {
		ArrayBackend {
			group: self.clone(),
			dataset: dataset.into(),
		}
	}

	/// Overwrites a slot directly, bypassing any collection or buffer.
	/// Stands in for an independent external writer.
	pub fn put_raw(&self, dataset: &str, value: Value) {
		let mut inner = self.inner.lock().unwrap();
		let revision = inner.get(dataset).map_or(0, |slot| slot.revision) + 1;
		inner.insert(dataset.to_string(), Slot { value, revision });
	}

	/// Removes a dataset, so it reads back as absent.
	pub fn delete(&self, dataset: &str) {
		self.inner.lock().unwrap().remove(dataset);
	}

	/// Number of datasets in the group.
	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len()
	}

	/// True if the group holds no datasets.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Backend bound to one dataset slot of an [`ArrayGroup`].
pub struct ArrayBackend {
	group: ArrayGroup,
	dataset: String,
}

impl StorageBackend for ArrayBackend {
	fn resource_id(&self) -> String {
		format!("array://{}/{}", self.group.name, self.dataset)
	}

	fn load_resource(&self) -> Result<Option<Value>> {
		let inner = self.group.inner.lock().unwrap();
		Ok(inner.get(&self.dataset).map(|slot| slot.value.clone()))
	}

	fn save_resource(&self, data: &Value) -> Result<()> {
		self.group.put_raw(&self.dataset, data.clone());
		Ok(())
	}

	fn resource_meta(&self) -> Result<Option<ResourceMeta>> {
		let inner = self.group.inner.lock().unwrap();
		let meta = match inner.get(&self.dataset) {
			Some(slot) => Some(ResourceMeta {
				len: serde_json::to_vec(&slot.value)?.len() as u64,
				version: ResourceVersion::Revision(slot.revision),
			}),
			None => None,
		};
		Ok(meta)
	}
}

#[cfg(test)]
mod tests {
	use super::ArrayGroup;
	use crate::{ResourceVersion, StorageBackend};
	use serde_json::json;

	#[test]
	fn test_missing_dataset_loads_as_none() {
		let group = ArrayGroup::new("test");
		let backend = group.backend("missing");
		assert_eq!(backend.load_resource().unwrap(), None);
		assert_eq!(backend.resource_meta().unwrap(), None);
	}

	#[test]
	fn test_round_trip() {
		let group = ArrayGroup::new("test");
		let backend = group.backend("slot");

		let data = json!([{"step": 0, "energy": -1.5}, {"step": 1, "energy": -1.7}]);
		backend.save_resource(&data).unwrap();
		assert_eq!(backend.load_resource().unwrap(), Some(data));
	}

	#[test]
	fn test_revision_and_delete() {
		let group = ArrayGroup::new("test");
		let backend = group.backend("slot");

		backend.save_resource(&json!(1)).unwrap();
		backend.save_resource(&json!(2)).unwrap();
		let meta = backend.resource_meta().unwrap().unwrap();
		assert_eq!(meta.version, ResourceVersion::Revision(2));

		group.delete("slot");
		assert_eq!(backend.load_resource().unwrap(), None);
	}
}
