use crate::error::Result;
use crate::{ResourceMeta, ResourceVersion, StorageBackend};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// JSON file backend: one resource per file, human-readable UTF-8 JSON.
///
/// Saves go through a sibling temp file followed by an atomic rename, so a
/// crash mid-write leaves either the old content or the new content, never a
/// torn file.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::{FileBackend, SyncedMap};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("state.json");
/// let doc = SyncedMap::open(FileBackend::new(&path))?;
/// doc.insert("ready", true)?;
///
/// let on_disk = std::fs::read_to_string(&path).unwrap();
/// assert_eq!(on_disk, r#"{"ready":true}"#);
/// # Ok::<(), synced::SyncError>(())
/// ```
pub struct FileBackend {
	path: PathBuf,
}

impl FileBackend {
	const TEMP_EXTENSION: &'static str = "tmp";

	/// Binds the backend to `path`. The file is not created until the first
	/// save.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		FileBackend { path: path.into() }
	}

	/// The file path this backend is bound to.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn temp_path(&self) -> PathBuf {
		let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
		name.push(".");
		name.push(Self::TEMP_EXTENSION);
		self.path.with_file_name(name)
	}
}

impl StorageBackend for FileBackend {
	fn resource_id(&self) -> String {
		format!("file://{}", self.path.display())
	}

	fn load_resource(&self) -> Result<Option<Value>> {
		match fs::read(&self.path) {
			Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err.into()),
		}
	}

	fn save_resource(&self, data: &Value) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		let temp = self.temp_path();
		{
			let mut file = fs::File::create(&temp)?;
			serde_json::to_writer(&mut file, data)?;
			file.flush()?;
		}
		fs::rename(&temp, &self.path)?;
		Ok(())
	}

	fn resource_meta(&self) -> Result<Option<ResourceMeta>> {
		match fs::metadata(&self.path) {
			Ok(meta) => {
				let modified: DateTime<Utc> = meta.modified()?.into();
				Ok(Some(ResourceMeta {
					len: meta.len(),
					version: ResourceVersion::Modified(modified),
				}))
			}
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err.into()),
		}
	}
}
