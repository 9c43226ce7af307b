use crate::error::{Result, SyncError};
use serde_json::Value;
use std::sync::Arc;

/// A check run against candidate data before a collection accepts it.
///
/// Validators are composable: a collection runs every validator it holds
/// against the *new* data of each mutating operation, before anything is
/// committed, so a rejection leaves the collection's prior state untouched.
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Builds a validator that rejects any mapping key containing `forbidden`,
/// at any nesting depth.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use synced::forbid_key_char;
///
/// let validator = forbid_key_char('/');
/// assert!(validator(&json!({"ok": 1})).is_ok());
/// assert!(validator(&json!({"nested": {"a/b": 1}})).is_err());
/// ```
pub fn forbid_key_char(forbidden: char) -> Validator {
	Arc::new(move |value| check_keys(value, forbidden))
}

/// The default key validator: rejects keys containing a dot, which collides
/// with dotted-path query syntax in downstream tooling.
pub fn no_dotted_keys() -> Validator {
	forbid_key_char('.')
}

fn check_keys(value: &Value, forbidden: char) -> Result<()> {
	match value {
		Value::Object(map) => {
			for (key, child) in map {
				if key.contains(forbidden) {
					return Err(SyncError::InvalidKey {
						key: key.clone(),
						reason: format!("keys may not contain {:?}", forbidden),
					});
				}
				check_keys(child, forbidden)?;
			}
			Ok(())
		}
		Value::Array(items) => {
			for item in items {
				check_keys(item, forbidden)?;
			}
			Ok(())
		}
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::{forbid_key_char, no_dotted_keys};
	use crate::error::SyncError;
	use serde_json::json;

	#[test]
	fn test_accepts_clean_keys() {
		let validator = no_dotted_keys();
		assert!(validator(&json!({"a": {"b": [1, 2, {"c": 3}]}})).is_ok());
		assert!(validator(&json!(42)).is_ok());
		assert!(validator(&json!([{"x": 1}, {"y": 2}])).is_ok());
	}

	#[test]
	fn test_rejects_dotted_key_at_top_level() {
		let validator = no_dotted_keys();
		let err = validator(&json!({"a.b": 1})).unwrap_err();
		match err {
			SyncError::InvalidKey { key, .. } => assert_eq!(key, "a.b"),
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn test_rejects_dotted_key_nested_in_array() {
		let validator = no_dotted_keys();
		assert!(validator(&json!({"list": [{"deep.key": 1}]})).is_err());
	}

	#[test]
	fn test_custom_separator() {
		let validator = forbid_key_char('/');
		assert!(validator(&json!({"a.b": 1})).is_ok());
		assert!(validator(&json!({"a/b": 1})).is_err());
	}
}
