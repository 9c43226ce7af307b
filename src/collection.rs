use crate::buffer::BufferManager;
use crate::error::{Result, SyncError};
use crate::kind::ValueKind;
use crate::validate::Validator;
use crate::StorageBackend;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// One step of a path from a root collection down to a nested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seg {
	Key(String),
	Index(usize),
}

/// Shared root of a synced collection.
///
/// Exactly one `Core` exists per opened collection; nested handles clone the
/// `Arc` and carry a path into `data`. All backend traffic goes through here,
/// which is what keeps a logical operation at one backend round-trip no
/// matter how deeply nested the handle that performed it.
pub(crate) struct Core {
	pub(crate) backend: Arc<dyn StorageBackend>,
	pub(crate) manager: Arc<BufferManager>,
	pub(crate) shape: ValueKind,
	pub(crate) instance_id: u64,
	validators: Mutex<Vec<Validator>>,
	state: Mutex<State>,
}

/// Mutable root state, all behind one lock.
///
/// `suspend` disables load/save while internal reconciliation is mutating
/// `data`, so the merge itself never cascades into further backend traffic.
pub(crate) struct State {
	pub(crate) data: Value,
	suspend: u32,
	buffer_depth: u32,
}

impl Core {
	/// Opens a root collection of the given shape, performing an initial load.
	pub(crate) fn open(
		backend: Arc<dyn StorageBackend>,
		manager: Arc<BufferManager>,
		shape: ValueKind,
		validators: Vec<Validator>,
	) -> Result<Arc<Self>> {
		let core = Arc::new(Core {
			backend,
			manager,
			shape,
			instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
			validators: Mutex::new(validators),
			state: Mutex::new(State {
				data: empty_of(shape),
				suspend: 0,
				buffer_depth: 0,
			}),
		});

		{
			let mut st = core.state.lock().unwrap();
			core.load_locked(&mut st)?;
		}
		Ok(core)
	}

	/// Runs every installed validator against candidate data.
	pub(crate) fn validate(&self, value: &Value) -> Result<()> {
		for validator in self.validators.lock().unwrap().iter() {
			validator(value)?;
		}
		Ok(())
	}

	/// Installs an additional validator. Applies to all handles sharing this
	/// root, including nested ones.
	pub(crate) fn add_validator(&self, validator: Validator) {
		self.validators.lock().unwrap().push(validator);
	}

	fn is_buffered(&self, st: &State) -> bool {
		st.buffer_depth > 0 || self.manager.is_globally_buffered()
	}

	/// Refreshes `data` from the backend (or the buffer, while buffering is
	/// active), merging via [`reconcile`] so unchanged subtrees stay put.
	fn load_locked(&self, st: &mut State) -> Result<()> {
		if st.suspend > 0 {
			return Ok(());
		}

		let fresh = if self.is_buffered(st) {
			self.manager
				.load(&self.backend, self.instance_id, st.buffer_depth > 0)?
		} else {
			self.backend.load_resource()?
		};
		// Absent resource means an empty collection, not an error.
		let fresh = fresh.unwrap_or_else(|| empty_of(self.shape));

		let actual = ValueKind::of(&fresh);
		if actual != self.shape {
			return Err(SyncError::ShapeMismatch {
				expected: self.shape,
				actual,
			});
		}

		st.suspend += 1;
		reconcile(&mut st.data, fresh);
		st.suspend -= 1;
		Ok(())
	}

	fn save_locked(&self, st: &State) -> Result<()> {
		if st.suspend > 0 {
			return Ok(());
		}
		tracing::debug!(resource = %self.backend.resource_id(), "saving collection");
		if self.is_buffered(st) {
			self.manager
				.save(&self.backend, self.instance_id, st.buffer_depth > 0, &st.data)
		} else {
			self.backend.save_resource(&st.data)
		}
	}

	/// Read path: load, resolve the handle's path, run `f` on the value.
	pub(crate) fn read<R>(&self, path: &[Seg], f: impl FnOnce(&Value) -> Result<R>) -> Result<R> {
		let mut st = self.state.lock().unwrap();
		self.load_locked(&mut st)?;
		let target = resolve_path(&st.data, path)?;
		f(target)
	}

	/// Write path: load, resolve, mutate, save. If `f` fails the save is
	/// skipped and in-memory state is left as freshly loaded, so a validator
	/// rejection inside `f` never persists a partial change.
	pub(crate) fn mutate<R>(
		&self,
		path: &[Seg],
		f: impl FnOnce(&mut Value) -> Result<R>,
	) -> Result<R> {
		let mut st = self.state.lock().unwrap();
		self.load_locked(&mut st)?;
		let target = resolve_path_mut(&mut st.data, path)?;
		let out = f(target)?;
		self.save_locked(&st)?;
		Ok(out)
	}

	pub(crate) fn enter_buffered(&self) {
		let mut st = self.state.lock().unwrap();
		st.buffer_depth += 1;
	}

	/// Leaves one level of per-instance buffering. At the outermost exit the
	/// buffer entry for this resource is released and, unless global
	/// buffering is still holding it, flushed.
	pub(crate) fn exit_buffered(&self) -> Result<()> {
		let outermost = {
			let mut st = self.state.lock().unwrap();
			st.buffer_depth = st.buffer_depth.saturating_sub(1);
			st.buffer_depth == 0
		};
		if outermost {
			self.manager
				.release(self.instance_id, &self.backend.resource_id())
		} else {
			Ok(())
		}
	}
}

/// The empty payload for a root of the given shape.
pub(crate) fn empty_of(kind: ValueKind) -> Value {
	match kind {
		ValueKind::Mapping => Value::Object(Map::new()),
		ValueKind::Sequence => Value::Array(Vec::new()),
		ValueKind::Scalar => Value::Null,
	}
}

/// Minimal-diff update: merges `fresh` into `current` in place.
///
/// Unchanged subtrees are skipped entirely (equality short-circuit), mappings
/// drop keys absent from the fresh data and recurse into survivors, sequences
/// recurse over the common prefix and truncate or append the tail. Any
/// pairing whose shape changed is replaced wholesale. Nested handles stay
/// valid across the merge because nothing that still matches is rebuilt.
pub(crate) fn reconcile(current: &mut Value, fresh: Value) {
	if *current == fresh {
		return;
	}
	match (current, fresh) {
		(Value::Object(cur), Value::Object(new)) => {
			cur.retain(|key, _| new.contains_key(key));
			for (key, value) in new {
				match cur.get_mut(&key) {
					Some(slot) => reconcile(slot, value),
					None => {
						cur.insert(key, value);
					}
				}
			}
		}
		(Value::Array(cur), Value::Array(new)) => {
			if new.len() < cur.len() {
				cur.truncate(new.len());
			}
			let mut incoming = new.into_iter();
			for slot in cur.iter_mut() {
				if let Some(value) = incoming.next() {
					reconcile(slot, value);
				}
			}
			cur.extend(incoming);
		}
		// Shape changed, or scalar position: replace wholesale.
		(slot, new) => *slot = new,
	}
}

pub(crate) fn resolve_path<'a>(data: &'a Value, path: &[Seg]) -> Result<&'a Value> {
	let mut current = data;
	for seg in path {
		let next = match (seg, current) {
			(Seg::Key(key), Value::Object(map)) => map.get(key),
			(Seg::Index(index), Value::Array(items)) => items.get(*index),
			_ => None,
		};
		current = next.ok_or_else(|| SyncError::DetachedNode {
			path: path_display(path),
		})?;
	}
	Ok(current)
}

pub(crate) fn resolve_path_mut<'a>(data: &'a mut Value, path: &[Seg]) -> Result<&'a mut Value> {
	let mut current = data;
	for seg in path {
		let next = match (seg, current) {
			(Seg::Key(key), Value::Object(map)) => map.get_mut(key),
			(Seg::Index(index), Value::Array(items)) => items.get_mut(*index),
			_ => None,
		};
		current = next.ok_or_else(|| SyncError::DetachedNode {
			path: path_display(path),
		})?;
	}
	Ok(current)
}

pub(crate) fn path_display(path: &[Seg]) -> String {
	let mut out = String::new();
	for seg in path {
		match seg {
			Seg::Key(key) => {
				let _ = write!(out, "/{}", key);
			}
			Seg::Index(index) => {
				let _ = write!(out, "/{}", index);
			}
		}
	}
	if out.is_empty() {
		out.push('/');
	}
	out
}
