use crate::kind::ValueKind;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by synced collections and their backends.
///
/// The variants fall into three groups: configuration errors (bad keys,
/// wrong shapes, unknown backends) which indicate caller bugs, integrity
/// errors (`Conflict`, `Flush`) raised when a buffered flush detects that a
/// resource changed underneath it, and plain IO/serialization passthroughs.
#[derive(Debug, Error)]
pub enum SyncError {
	/// A validator rejected a key in candidate data.
	#[error("invalid key {key:?}: {reason}")]
	InvalidKey { key: String, reason: String },

	/// A validator rejected candidate data for a reason other than a key.
	#[error("validation failed: {0}")]
	Validation(String),

	/// Data of the wrong shape was supplied where a specific shape is required,
	/// e.g. sequence data passed to a mapping's `reset`.
	#[error("expected {expected} data, found {actual}")]
	ShapeMismatch { expected: ValueKind, actual: ValueKind },

	/// The requested key is not present in the mapping.
	#[error("key {key:?} not found")]
	KeyNotFound { key: String },

	/// The requested index is past the end of the sequence.
	#[error("index {index} out of bounds for sequence of length {len}")]
	IndexOutOfBounds { index: usize, len: usize },

	/// No backend factory is registered under the given identifier.
	#[error("no backend registered under {0:?}")]
	UnknownBackend(String),

	/// A nested handle's path no longer resolves because the surrounding
	/// structure was removed or changed shape.
	#[error("nested value at {path:?} no longer exists")]
	DetachedNode { path: String },

	/// The resource was modified by someone else while its contents were
	/// buffered. The buffered data is not written; the caller decides whether
	/// to retry or discard.
	#[error("resource {resource} was modified while buffered")]
	Conflict { resource: String },

	/// Filesystem error from a backend.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization or deserialization error.
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),

	/// One or more resources failed to flush. See [`FlushError`].
	#[error(transparent)]
	Flush(#[from] FlushError),
}

/// Aggregated result of a buffer flush that failed for one or more resources.
///
/// Flushing is a batch operation: a failure on one resource never prevents
/// the others from being attempted. Whatever failed is collected here, keyed
/// by resource identity, so the caller sees the full picture of what did and
/// did not persist.
#[derive(Debug)]
pub struct FlushError {
	/// Per-resource failure reasons, keyed by resource identity.
	pub failures: BTreeMap<String, SyncError>,
}

impl fmt::Display for FlushError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "flush failed for {} resource(s)", self.failures.len())?;
		for (resource, reason) in &self.failures {
			write!(f, "; {}: {}", resource, reason)?;
		}
		Ok(())
	}
}

impl std::error::Error for FlushError {}
