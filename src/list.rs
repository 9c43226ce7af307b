use crate::buffer::{BufferGuard, BufferManager};
use crate::collection::{Core, Seg};
use crate::error::{Result, SyncError};
use crate::kind::ValueKind;
use crate::validate::{no_dotted_keys, Validator};
use crate::StorageBackend;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An ordered sequence kept consistent with a persistent backend.
///
/// The sequence counterpart of [`crate::SyncedMap`]: same load-on-read,
/// load-validate-mutate-save on write, same nested-handle model, same
/// buffering scopes.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::{FileBackend, SyncedList};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let list = SyncedList::open(FileBackend::new(dir.path().join("list.json")))?;
/// list.push(1)?;
/// list.push(json!({"nested": true}))?;
///
/// assert_eq!(list.len()?, 2);
/// assert_eq!(list.get(0)?, json!(1));
/// # Ok::<(), synced::SyncError>(())
/// ```
#[derive(Clone)]
pub struct SyncedList {
	core: Arc<Core>,
	path: Vec<Seg>,
}

fn expect_list(value: &Value) -> Result<&Vec<Value>> {
	match value {
		Value::Array(items) => Ok(items),
		other => Err(SyncError::ShapeMismatch {
			expected: ValueKind::Sequence,
			actual: ValueKind::of(other),
		}),
	}
}

fn expect_list_mut(value: &mut Value) -> Result<&mut Vec<Value>> {
	match value {
		Value::Array(items) => Ok(items),
		other => Err(SyncError::ShapeMismatch {
			expected: ValueKind::Sequence,
			actual: ValueKind::of(other),
		}),
	}
}

impl SyncedList {
	/// Opens a root sequence over `backend`, bound to the process-wide shared
	/// [`BufferManager`]. An absent resource is an empty sequence.
	pub fn open(backend: impl StorageBackend) -> Result<Self> {
		Self::with_manager(backend, Arc::clone(BufferManager::shared()))
	}

	/// Opens a root sequence bound to an explicit [`BufferManager`].
	///
	/// # Errors
	/// [`SyncError::ShapeMismatch`] if the resource exists but holds
	/// mapping- or scalar-shaped data.
	pub fn with_manager(backend: impl StorageBackend, manager: Arc<BufferManager>) -> Result<Self> {
		let core = Core::open(
			Arc::new(backend),
			manager,
			ValueKind::Sequence,
			vec![no_dotted_keys()],
		)?;
		Ok(SyncedList {
			core,
			path: Vec::new(),
		})
	}

	pub(crate) fn nested(core: Arc<Core>, path: Vec<Seg>) -> Self {
		SyncedList { core, path }
	}

	/// Installs an additional validator shared by every handle on this root.
	pub fn add_validator(&self, validator: Validator) {
		self.core.add_validator(validator);
	}

	/// Returns the element at `index`.
	pub fn get(&self, index: usize) -> Result<Value> {
		self.core.read(&self.path, |value| {
			let items = expect_list(value)?;
			items.get(index).cloned().ok_or(SyncError::IndexOutOfBounds {
				index,
				len: items.len(),
			})
		})
	}

	/// Replaces the element at `index` with `value`.
	pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.core.validate(&value)?;
		self.core.mutate(&self.path, move |target| {
			let items = expect_list_mut(target)?;
			let len = items.len();
			match items.get_mut(index) {
				Some(slot) => {
					*slot = value;
					Ok(())
				}
				None => Err(SyncError::IndexOutOfBounds { index, len }),
			}
		})
	}

	/// Appends `value` to the end of the sequence.
	pub fn push(&self, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.core.validate(&value)?;
		self.core.mutate(&self.path, move |target| {
			expect_list_mut(target)?.push(value);
			Ok(())
		})
	}

	/// Inserts `value` at `index`, shifting everything after it.
	pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
		let value = value.into();
		self.core.validate(&value)?;
		self.core.mutate(&self.path, move |target| {
			let items = expect_list_mut(target)?;
			if index > items.len() {
				return Err(SyncError::IndexOutOfBounds {
					index,
					len: items.len(),
				});
			}
			items.insert(index, value);
			Ok(())
		})
	}

	/// Removes and returns the element at `index`.
	pub fn remove(&self, index: usize) -> Result<Value> {
		self.core.mutate(&self.path, |target| {
			let items = expect_list_mut(target)?;
			if index >= items.len() {
				return Err(SyncError::IndexOutOfBounds {
					index,
					len: items.len(),
				});
			}
			Ok(items.remove(index))
		})
	}

	/// Appends every value from `values` in one write.
	pub fn extend<I>(&self, values: I) -> Result<()>
	where
		I: IntoIterator<Item = Value>,
	{
		let incoming: Vec<Value> = values.into_iter().collect();
		for value in &incoming {
			self.core.validate(value)?;
		}
		self.core.mutate(&self.path, move |target| {
			expect_list_mut(target)?.extend(incoming);
			Ok(())
		})
	}

	/// Removes every element.
	pub fn clear(&self) -> Result<()> {
		self.core.mutate(&self.path, |target| {
			expect_list_mut(target)?.clear();
			Ok(())
		})
	}

	/// Number of elements.
	pub fn len(&self) -> Result<usize> {
		self.core
			.read(&self.path, |value| Ok(expect_list(value)?.len()))
	}

	/// True if the sequence has no elements.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len()? == 0)
	}

	/// All elements as a plain vector, loaded in one round-trip. Iterate it
	/// forwards or backwards as needed.
	pub fn to_vec(&self) -> Result<Vec<Value>> {
		self.core
			.read(&self.path, |value| Ok(expect_list(value)?.clone()))
	}

	/// Replaces the entire sequence with `new_data` in one write. The data
	/// must be sequence-shaped and pass validation; otherwise nothing is
	/// touched.
	pub fn reset(&self, new_data: Value) -> Result<()> {
		let actual = ValueKind::of(&new_data);
		if actual != ValueKind::Sequence {
			return Err(SyncError::ShapeMismatch {
				expected: ValueKind::Sequence,
				actual,
			});
		}
		self.core.validate(&new_data)?;

		self.core.mutate(&self.path, move |target| {
			*target = new_data;
			Ok(())
		})
	}

	/// The sequence as a plain JSON value, freshly loaded.
	pub fn to_value(&self) -> Result<Value> {
		self.core.read(&self.path, |value| Ok(value.clone()))
	}

	/// A handle to the mapping stored at `index`.
	pub fn map_at(&self, index: usize) -> Result<crate::SyncedMap> {
		self.child_path(index, ValueKind::Mapping)?;
		let mut path = self.path.clone();
		path.push(Seg::Index(index));
		Ok(crate::SyncedMap::nested(Arc::clone(&self.core), path))
	}

	/// A handle to the sequence stored at `index`.
	pub fn list_at(&self, index: usize) -> Result<SyncedList> {
		self.child_path(index, ValueKind::Sequence)?;
		let mut path = self.path.clone();
		path.push(Seg::Index(index));
		Ok(SyncedList::nested(Arc::clone(&self.core), path))
	}

	fn child_path(&self, index: usize, expected: ValueKind) -> Result<()> {
		self.core.read(&self.path, |value| {
			let items = expect_list(value)?;
			match items.get(index) {
				Some(child) => {
					let actual = ValueKind::of(child);
					if actual == expected {
						Ok(())
					} else {
						Err(SyncError::ShapeMismatch { expected, actual })
					}
				}
				None => Err(SyncError::IndexOutOfBounds {
					index,
					len: items.len(),
				}),
			}
		})
	}

	/// Opens a per-instance buffering scope for this collection's resource.
	pub fn buffered(&self) -> BufferGuard {
		BufferGuard::new(Arc::clone(&self.core))
	}

	/// The backend resource identity this sequence is stored in.
	pub fn resource_id(&self) -> String {
		self.core.backend.resource_id()
	}
}

impl PartialEq<Value> for SyncedList {
	/// Compares by value after a best-effort load; a failed load compares
	/// unequal.
	fn eq(&self, other: &Value) -> bool {
		self.to_value().map(|value| value == *other).unwrap_or(false)
	}
}

impl fmt::Debug for SyncedList {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncedList")
			.field("resource", &self.core.backend.resource_id())
			.field("path", &crate::collection::path_display(&self.path))
			.finish()
	}
}
