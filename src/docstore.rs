use crate::error::Result;
use crate::{ResourceMeta, ResourceVersion, StorageBackend};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// An in-memory document collection standing in for a Mongo-like client.
///
/// A backend addresses one document through a unique-match filter on a
/// single field; the synced payload lives in one field of that document.
/// Documents carry a per-document write revision used as the modification
/// stamp.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::{DocStore, SyncedMap};
///
/// let store = DocStore::new("jobs");
/// let doc = SyncedMap::open(store.backend("job_id", json!("a1b2")))?;
/// doc.insert("status", "running")?;
/// # Ok::<(), synced::SyncError>(())
/// ```
#[derive(Clone)]
pub struct DocStore {
	name: String,
	inner: Arc<Mutex<Vec<Document>>>,
}

struct Document {
	fields: Map<String, Value>,
	revision: u64,
}

/// Field name the synced payload is stored under.
const DATA_FIELD: &str = "data";

impl DocStore {
	/// Creates an empty named collection.
	pub fn new(name: impl Into<String>) -> Self {
		DocStore {
			name: name.into(),
			inner: Arc::new(Mutex::new(Vec::new())),
		}
	}

	/// A backend bound to the document whose `filter_field` equals
	/// `filter_value`. The document is created on first save.
	pub fn backend(&self, filter_field: impl Into<String>, filter_value: Value) -> DocBackend {
		DocBackend {
			store: self.clone(),
			filter_field: filter_field.into(),
			filter_value,
		}
	}

	/// Overwrites the payload of the matched document directly, bypassing any
	/// collection or buffer. Stands in for an independent external writer.
	pub fn put_raw(&self, filter_field: &str, filter_value: &Value, data: Value) {
		let mut docs = self.inner.lock().unwrap();
		match docs
			.iter_mut()
			.find(|doc| doc.fields.get(filter_field) == Some(filter_value))
		{
			Some(doc) => {
				doc.fields.insert(DATA_FIELD.to_string(), data);
				doc.revision += 1;
			}
			None => {
				let mut fields = Map::new();
				fields.insert(filter_field.to_string(), filter_value.clone());
				fields.insert(DATA_FIELD.to_string(), data);
				docs.push(Document {
					fields,
					revision: 1,
				});
			}
		}
	}

	/// Number of documents in the collection.
	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len()
	}

	/// True if the collection holds no documents.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Backend bound to one filter-matched document of a [`DocStore`].
pub struct DocBackend {
	store: DocStore,
	filter_field: String,
	filter_value: Value,
}

impl DocBackend {
	fn with_matched<R>(&self, f: impl FnOnce(Option<&Document>) -> R) -> R {
		let docs = self.store.inner.lock().unwrap();
		let matched = docs
			.iter()
			.find(|doc| doc.fields.get(&self.filter_field) == Some(&self.filter_value));
		f(matched)
	}
}

impl StorageBackend for DocBackend {
	fn resource_id(&self) -> String {
		format!(
			"doc://{}/{}={}",
			self.store.name, self.filter_field, self.filter_value
		)
	}

	fn load_resource(&self) -> Result<Option<Value>> {
		self.with_matched(|matched| {
			Ok(matched.and_then(|doc| doc.fields.get(DATA_FIELD)).cloned())
		})
	}

	fn save_resource(&self, data: &Value) -> Result<()> {
		self.store
			.put_raw(&self.filter_field, &self.filter_value, data.clone());
		Ok(())
	}

	fn resource_meta(&self) -> Result<Option<ResourceMeta>> {
		self.with_matched(|matched| {
			let meta = match matched {
				Some(doc) => {
					let payload = doc.fields.get(DATA_FIELD).cloned().unwrap_or(Value::Null);
					Some(ResourceMeta {
						len: serde_json::to_vec(&payload)?.len() as u64,
						version: ResourceVersion::Revision(doc.revision),
					})
				}
				None => None,
			};
			Ok(meta)
		})
	}
}
