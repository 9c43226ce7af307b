//! Synced collections: in-memory JSON mappings and sequences whose contents
//! are transparently kept consistent with a persistent backend.
//!
//! A collection pairs a *shape* ([`SyncedMap`] or [`SyncedList`]) with a
//! *backend* (anything implementing [`StorageBackend`]). Every read loads
//! fresh data from the backend first; every write loads, mutates, and saves.
//! Values nested inside a collection are reached through handles that share
//! the root's backend, so a write at any depth is exactly one backend
//! round-trip.
//!
//! Writes can be deferred with scoped buffering: inside a
//! [`SyncedMap::buffered`] or [`buffer_all`] scope, loads are served from a
//! shared cache and saves land in it. Leaving the outermost scope flushes the
//! cache back to the backends, refusing to overwrite any resource that was
//! modified by someone else in the meantime.
//!
//! # Examples
//! ```
//! use serde_json::json;
//! use synced::{FileBackend, SyncedMap};
//!
//! # let dir = tempfile::tempdir().unwrap();
//! let doc = SyncedMap::open(FileBackend::new(dir.path().join("doc.json")))?;
//! doc.insert("a", json!({"b": 1}))?;
//!
//! // Nested handles write through the root.
//! let a = doc.map_at("a")?;
//! a.insert("b", 2)?;
//! assert_eq!(doc.to_value()?, json!({"a": {"b": 2}}));
//! # Ok::<(), synced::SyncError>(())
//! ```

mod array;
mod buffer;
mod collection;
mod docstore;
mod error;
mod file;
mod kind;
mod kv;
mod list;
mod map;
mod registry;
mod validate;

use chrono::{DateTime, Utc};
use serde_json::Value;

pub use array::{ArrayBackend, ArrayGroup};
pub use buffer::{
	buffer_all, BufferGuard, BufferManager, GlobalBufferGuard, DEFAULT_BUFFER_CAPACITY,
};
pub use docstore::{DocBackend, DocStore};
pub use error::{FlushError, Result, SyncError};
pub use file::FileBackend;
pub use kind::ValueKind;
pub use kv::{KvBackend, KvStore};
pub use list::SyncedList;
pub use map::SyncedMap;
pub use registry::BackendRegistry;
pub use validate::{forbid_key_char, no_dotted_keys, Validator};

/// The persistence hooks a backend supplies.
///
/// A backend is bound to exactly one resource (a file path, a key in a
/// key-value store, a document in a collection, a dataset slot in a group)
/// and knows how to move a JSON value in and out of it. An absent resource
/// is not an error: `load_resource` returns `Ok(None)` and the collection
/// treats it as empty.
pub trait StorageBackend: Send + Sync + 'static {
	/// Stable identifier for the bound resource, e.g. `file:///path/doc.json`
	/// or `kv://sessions/user-42`. Buffer entries are keyed by this string,
	/// so two backends naming the same resource share one entry.
	fn resource_id(&self) -> String;

	/// Reads and deserializes the resource. Returns `Ok(None)` if the
	/// resource does not exist yet.
	fn load_resource(&self) -> Result<Option<Value>>;

	/// Serializes `data` and persists it, replacing whatever was there.
	fn save_resource(&self, data: &Value) -> Result<()>;

	/// Size and modification stamp of the live resource, or `None` if it does
	/// not exist. Compared at flush time to detect concurrent writers.
	fn resource_meta(&self) -> Result<Option<ResourceMeta>>;
}

impl StorageBackend for Box<dyn StorageBackend> {
	fn resource_id(&self) -> String {
		(**self).resource_id()
	}

	fn load_resource(&self) -> Result<Option<Value>> {
		(**self).load_resource()
	}

	fn save_resource(&self, data: &Value) -> Result<()> {
		(**self).save_resource(data)
	}

	fn resource_meta(&self) -> Result<Option<ResourceMeta>> {
		(**self).resource_meta()
	}
}

/// Size and modification stamp of a backend resource.
///
/// Captured when a buffer entry is created and compared against the live
/// resource at flush time. Any difference means someone else wrote the
/// resource while it was buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
	/// Serialized size of the resource in bytes.
	pub len: u64,
	/// Backend-specific modification stamp.
	pub version: ResourceVersion,
}

/// How a backend stamps modifications: filesystem mtime for files, a write
/// counter for store-backed resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceVersion {
	/// Last-modified time, for filesystem resources.
	Modified(DateTime<Utc>),
	/// Monotonic write counter, for store-backed resources.
	Revision(u64),
}
