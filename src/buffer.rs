use crate::collection::Core;
use crate::error::{FlushError, Result, SyncError};
use crate::{ResourceMeta, StorageBackend};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

/// Default buffer capacity: 32 MiB of serialized content.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32 * 1024 * 1024;

/// Shared write buffer for synced collections.
///
/// While a buffering scope is active, collections bound to this manager stop
/// talking to their backends directly: loads are served from a per-resource
/// cache entry and saves update it. Leaving the outermost scope flushes the
/// cache, and each entry is only written back if its content actually changed
/// *and* the live resource still looks the way it did when the entry was
/// created. Anything else is a conflict and is reported, never overwritten.
///
/// All internal state sits behind one mutex, so a manager can be shared
/// freely across threads.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::{BufferManager, FileBackend, SyncedMap};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let path = dir.path().join("doc.json");
/// let manager = BufferManager::new(1024 * 1024);
/// let doc = SyncedMap::with_manager(FileBackend::new(&path), manager.clone())?;
///
/// let scope = doc.buffered();
/// doc.insert("a", 1)?;             // lands in the buffer, not the file
/// assert!(!path.exists());
/// scope.commit()?;                 // flushed to disk
/// assert!(path.exists());
/// # Ok::<(), synced::SyncError>(())
/// ```
pub struct BufferManager {
	capacity: usize,
	state: Mutex<BufferState>,
}

struct BufferState {
	entries: HashMap<String, BufferEntry>,
	total_bytes: usize,
	global_depth: u32,
}

/// One buffered resource: its serialized content plus everything needed to
/// verify integrity at flush time.
struct BufferEntry {
	backend: Arc<dyn StorageBackend>,
	/// Serialized JSON, `None` while the resource is known to be absent.
	contents: Option<Vec<u8>>,
	/// Hash of `contents` at entry creation. Matching hash at flush time
	/// means nothing changed and no write is needed.
	hash_at_load: [u8; 32],
	/// Live resource metadata at entry creation. Must still match at flush
	/// time before the entry may overwrite the resource.
	meta_at_load: Option<ResourceMeta>,
	/// Instance ids holding this entry under an active per-instance scope.
	/// A held entry is never eagerly evicted.
	holders: HashSet<u64>,
}

fn content_hash(contents: &Option<Vec<u8>>) -> [u8; 32] {
	let mut hasher = Sha256::new();
	if let Some(bytes) = contents {
		hasher.update(bytes);
	}
	hasher.finalize().into()
}

impl BufferEntry {
	/// Captures the live resource: content, content hash, and metadata.
	fn capture(backend: &Arc<dyn StorageBackend>) -> Result<Self> {
		let contents = match backend.load_resource()? {
			Some(value) => Some(serde_json::to_vec(&value)?),
			None => None,
		};
		let meta_at_load = backend.resource_meta()?;
		Ok(BufferEntry {
			backend: Arc::clone(backend),
			hash_at_load: content_hash(&contents),
			contents,
			meta_at_load,
			holders: HashSet::new(),
		})
	}

	fn len(&self) -> usize {
		self.contents.as_ref().map_or(0, Vec::len)
	}
}

/// Writes one detached entry back to its resource.
///
/// Skips the write entirely when the content hash is unchanged. Otherwise the
/// live metadata must equal the captured metadata or the flush fails with
/// [`SyncError::Conflict`].
fn flush_entry(resource: &str, entry: BufferEntry) -> Result<()> {
	if content_hash(&entry.contents) == entry.hash_at_load {
		tracing::debug!(resource, "buffered content unchanged, skipping write");
		return Ok(());
	}

	let live = entry.backend.resource_meta()?;
	if live != entry.meta_at_load {
		tracing::warn!(resource, "resource changed while buffered");
		return Err(SyncError::Conflict {
			resource: resource.to_string(),
		});
	}

	match entry.contents {
		Some(bytes) => {
			let value: Value = serde_json::from_slice(&bytes)?;
			tracing::debug!(resource, "flushing buffered content");
			entry.backend.save_resource(&value)
		}
		// Content can only move from absent to present; an entry whose
		// content is still None hashes equal and was skipped above.
		None => Ok(()),
	}
}

impl BufferManager {
	/// Creates a manager that eagerly flushes unheld entries once the total
	/// serialized content exceeds `capacity` bytes.
	pub fn new(capacity: usize) -> Arc<Self> {
		Arc::new(BufferManager {
			capacity,
			state: Mutex::new(BufferState {
				entries: HashMap::new(),
				total_bytes: 0,
				global_depth: 0,
			}),
		})
	}

	/// The process-wide shared manager, used by collections opened without an
	/// explicit one. This is what makes [`buffer_all`] cover every such
	/// collection at once.
	pub fn shared() -> &'static Arc<BufferManager> {
		static SHARED: OnceLock<Arc<BufferManager>> = OnceLock::new();
		SHARED.get_or_init(|| BufferManager::new(DEFAULT_BUFFER_CAPACITY))
	}

	/// True while at least one global buffering scope is open.
	pub fn is_globally_buffered(&self) -> bool {
		self.state.lock().unwrap().global_depth > 0
	}

	/// Number of resources currently buffered.
	pub fn pending_resources(&self) -> usize {
		self.state.lock().unwrap().entries.len()
	}

	/// Total serialized bytes currently buffered.
	pub fn pending_bytes(&self) -> usize {
		self.state.lock().unwrap().total_bytes
	}

	/// Opens a global buffering scope covering every collection bound to this
	/// manager. Reentrant: only the outermost exit flushes.
	pub fn buffer_all(self: &Arc<Self>) -> GlobalBufferGuard {
		self.state.lock().unwrap().global_depth += 1;
		GlobalBufferGuard {
			manager: Some(Arc::clone(self)),
		}
	}

	/// Flushes every entry not held by an active per-instance scope,
	/// attempting all of them and aggregating failures into one
	/// [`FlushError`].
	pub fn flush(&self) -> Result<()> {
		let mut st = self.state.lock().unwrap();
		self.flush_unheld_locked(&mut st)
	}

	fn flush_unheld_locked(&self, st: &mut BufferState) -> Result<()> {
		let ids: Vec<String> = st
			.entries
			.iter()
			.filter(|(_, entry)| entry.holders.is_empty())
			.map(|(id, _)| id.clone())
			.collect();

		let mut failures = BTreeMap::new();
		for id in ids {
			if let Some(entry) = st.entries.remove(&id) {
				st.total_bytes -= entry.len();
				if let Err(err) = flush_entry(&id, entry) {
					failures.insert(id, err);
				}
			}
		}

		if failures.is_empty() {
			Ok(())
		} else {
			Err(FlushError { failures }.into())
		}
	}

	/// Serves a buffered load, creating the entry from the live resource on
	/// first touch. `pin` registers `instance` as a holder so the entry
	/// survives eager eviction while that instance's scope is open.
	pub(crate) fn load(
		&self,
		backend: &Arc<dyn StorageBackend>,
		instance: u64,
		pin: bool,
	) -> Result<Option<Value>> {
		let mut st = self.state.lock().unwrap();
		let id = backend.resource_id();

		if !st.entries.contains_key(&id) {
			let entry = BufferEntry::capture(backend)?;
			st.total_bytes += entry.len();
			st.entries.insert(id.clone(), entry);
		}

		let mut out = Ok(None);
		if let Some(entry) = st.entries.get_mut(&id) {
			if pin {
				entry.holders.insert(instance);
			}
			out = match &entry.contents {
				Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
				None => Ok(None),
			};
		}
		out
	}

	/// Buffers a save. The entry baseline (hash + metadata) is captured from
	/// the live resource on first touch, then the new serialized content
	/// replaces the cached one. Exceeding capacity triggers an eager flush of
	/// all unheld entries.
	pub(crate) fn save(
		&self,
		backend: &Arc<dyn StorageBackend>,
		instance: u64,
		pin: bool,
		data: &Value,
	) -> Result<()> {
		let bytes = serde_json::to_vec(data)?;
		let mut st = self.state.lock().unwrap();
		let id = backend.resource_id();

		if !st.entries.contains_key(&id) {
			let entry = BufferEntry::capture(backend)?;
			st.total_bytes += entry.len();
			st.entries.insert(id.clone(), entry);
		}

		let new_len = bytes.len();
		let mut old_len = 0;
		if let Some(entry) = st.entries.get_mut(&id) {
			old_len = entry.len();
			entry.contents = Some(bytes);
			if pin {
				entry.holders.insert(instance);
			}
		}
		st.total_bytes = st.total_bytes - old_len + new_len;

		if st.total_bytes > self.capacity {
			tracing::debug!(
				total = st.total_bytes,
				capacity = self.capacity,
				"buffer over capacity, flushing unheld entries"
			);
			self.flush_unheld_locked(&mut st)?;
		}
		Ok(())
	}

	/// Drops `instance`'s hold on `resource`. Once nothing holds the entry
	/// and no global scope is open, the entry is flushed.
	pub(crate) fn release(&self, instance: u64, resource: &str) -> Result<()> {
		let mut st = self.state.lock().unwrap();

		let flush_now = match st.entries.get_mut(resource) {
			Some(entry) => {
				entry.holders.remove(&instance);
				entry.holders.is_empty() && st.global_depth == 0
			}
			None => false,
		};

		if flush_now {
			if let Some(entry) = st.entries.remove(resource) {
				st.total_bytes -= entry.len();
				return flush_entry(resource, entry);
			}
		}
		Ok(())
	}

	fn exit_global(&self) -> Result<()> {
		let mut st = self.state.lock().unwrap();
		st.global_depth = st.global_depth.saturating_sub(1);
		if st.global_depth == 0 {
			self.flush_unheld_locked(&mut st)
		} else {
			Ok(())
		}
	}
}

/// Opens a global buffering scope on the process-wide shared manager.
///
/// Every collection opened without an explicit manager participates. See
/// [`BufferManager::buffer_all`] for scoping semantics.
///
/// # Examples
/// ```
/// use synced::{buffer_all, FileBackend, SyncedMap};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let path = dir.path().join("doc.json");
/// let doc = SyncedMap::open(FileBackend::new(&path))?;
///
/// let scope = buffer_all();
/// doc.insert("a", 1)?;
/// assert!(!path.exists());
/// scope.commit()?;
/// assert!(path.exists());
/// # Ok::<(), synced::SyncError>(())
/// ```
pub fn buffer_all() -> GlobalBufferGuard {
	BufferManager::shared().buffer_all()
}

/// Scope guard for global buffering. Prefer [`GlobalBufferGuard::commit`] to
/// observe flush failures; dropping the guard flushes best-effort and logs.
#[must_use = "dropping the guard immediately ends the buffering scope"]
pub struct GlobalBufferGuard {
	manager: Option<Arc<BufferManager>>,
}

impl GlobalBufferGuard {
	/// Ends the scope, flushing if this was the outermost one, and reports
	/// any flush failures.
	pub fn commit(mut self) -> Result<()> {
		match self.manager.take() {
			Some(manager) => manager.exit_global(),
			None => Ok(()),
		}
	}
}

impl Drop for GlobalBufferGuard {
	fn drop(&mut self) {
		if let Some(manager) = self.manager.take() {
			if let Err(err) = manager.exit_global() {
				tracing::warn!("global buffer flush failed on drop: {err}");
			}
		}
	}
}

/// Scope guard for one collection's buffering. Reentrant with itself and
/// composable with global buffering in either nesting order.
#[must_use = "dropping the guard immediately ends the buffering scope"]
pub struct BufferGuard {
	core: Option<Arc<Core>>,
}

impl BufferGuard {
	pub(crate) fn new(core: Arc<Core>) -> Self {
		core.enter_buffered();
		BufferGuard { core: Some(core) }
	}

	/// Ends the scope, flushing this collection's resource if this was the
	/// outermost scope and global buffering is not active.
	pub fn commit(mut self) -> Result<()> {
		match self.core.take() {
			Some(core) => core.exit_buffered(),
			None => Ok(()),
		}
	}
}

impl Drop for BufferGuard {
	fn drop(&mut self) {
		if let Some(core) = self.core.take() {
			if let Err(err) = core.exit_buffered() {
				tracing::warn!("buffered scope exit failed on drop: {err}");
			}
		}
	}
}
