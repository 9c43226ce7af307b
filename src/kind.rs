use serde_json::Value;
use std::fmt;

/// The shape of a JSON value, as far as synced collections care.
///
/// Classification is decided once, by a single exhaustive match, at the point
/// a value enters a collection. Everything that is not a mapping or a
/// sequence is a scalar and is stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
	/// String-keyed mapping (a JSON object).
	Mapping,
	/// Ordered sequence (a JSON array).
	Sequence,
	/// Anything else: null, booleans, numbers, strings.
	Scalar,
}

impl ValueKind {
	/// Classifies a JSON value.
	///
	/// # Examples
	/// ```
	/// use serde_json::json;
	/// use synced::ValueKind;
	///
	/// assert_eq!(ValueKind::of(&json!({"a": 1})), ValueKind::Mapping);
	/// assert_eq!(ValueKind::of(&json!([1, 2])), ValueKind::Sequence);
	/// assert_eq!(ValueKind::of(&json!(42)), ValueKind::Scalar);
	/// assert_eq!(ValueKind::of(&json!(null)), ValueKind::Scalar);
	/// ```
	pub fn of(value: &Value) -> ValueKind {
		match value {
			Value::Object(_) => ValueKind::Mapping,
			Value::Array(_) => ValueKind::Sequence,
			Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => ValueKind::Scalar,
		}
	}

	/// Returns true for [`ValueKind::Mapping`].
	pub fn is_mapping(self) -> bool {
		self == ValueKind::Mapping
	}

	/// Returns true for [`ValueKind::Sequence`].
	pub fn is_sequence(self) -> bool {
		self == ValueKind::Sequence
	}

	/// Returns true for [`ValueKind::Scalar`].
	pub fn is_scalar(self) -> bool {
		self == ValueKind::Scalar
	}
}

impl fmt::Display for ValueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ValueKind::Mapping => "mapping",
			ValueKind::Sequence => "sequence",
			ValueKind::Scalar => "scalar",
		};
		f.write_str(name)
	}
}

#[cfg(test)]
mod tests {
	use super::ValueKind;
	use serde_json::json;

	#[test]
	fn test_classification_covers_all_json_types() {
		assert_eq!(ValueKind::of(&json!(null)), ValueKind::Scalar);
		assert_eq!(ValueKind::of(&json!(true)), ValueKind::Scalar);
		assert_eq!(ValueKind::of(&json!(42)), ValueKind::Scalar);
		assert_eq!(ValueKind::of(&json!(42.5)), ValueKind::Scalar);
		assert_eq!(ValueKind::of(&json!("text")), ValueKind::Scalar);
		assert_eq!(ValueKind::of(&json!([])), ValueKind::Sequence);
		assert_eq!(ValueKind::of(&json!({})), ValueKind::Mapping);
	}

	#[test]
	fn test_display_names() {
		assert_eq!(ValueKind::Mapping.to_string(), "mapping");
		assert_eq!(ValueKind::Sequence.to_string(), "sequence");
		assert_eq!(ValueKind::Scalar.to_string(), "scalar");
	}
}
