//! Field-path writes against JSON documents.
//!
//! A document is a JSON object. Writes address a dotted field path inside it
//! and are applied as one batch: either every write lands or none does.
//! Every write kind is idempotent, which is what makes queue replay safe.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Error applying a write batch to a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Path was empty or had an empty segment
    InvalidPath(String),
    /// An intermediate segment exists but is not an object
    NotAnObject(String),
    /// `ArrayUnion` target exists but is not an array
    NotAnArray(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "invalid field path '{}'", path),
            Self::NotAnObject(path) => write!(f, "field '{}' is not an object", path),
            Self::NotAnArray(path) => write!(f, "field '{}' is not an array", path),
        }
    }
}

impl std::error::Error for WriteError {}

/// One field-level mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldWrite {
    /// Replace the value at `path`
    Set { path: String, value: JsonValue },
    /// Append each of `values` not already present in the array at `path`
    ArrayUnion { path: String, values: Vec<JsonValue> },
    /// Remove the key at `path` (no-op if absent)
    Delete { path: String },
}

impl FieldWrite {
    pub fn set(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn union(path: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self::ArrayUnion {
            path: path.into(),
            values,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::ArrayUnion { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// A batch of writes against one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentWrite {
    /// Document path, e.g. `sessions/abc`
    pub path: String,
    pub writes: Vec<FieldWrite>,
    /// When false, the batch is rejected if the document does not exist
    pub create_if_missing: bool,
}

/// Join segments into a dotted field path
pub fn field_path(segments: &[&str]) -> String {
    segments.join(".")
}

fn split_path(path: &str) -> Result<Vec<&str>, WriteError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(WriteError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Walk to the parent object of the last segment, creating maps on the way.
fn parent_mut<'a>(
    root: &'a mut Map<String, JsonValue>,
    segments: &[&str],
    path: &str,
) -> Result<&'a mut Map<String, JsonValue>, WriteError> {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        current = entry
            .as_object_mut()
            .ok_or_else(|| WriteError::NotAnObject(path.to_string()))?;
    }
    Ok(current)
}

fn apply_one(root: &mut Map<String, JsonValue>, write: &FieldWrite) -> Result<(), WriteError> {
    let path = write.path();
    let segments = split_path(path)?;
    let last = segments[segments.len() - 1];

    match write {
        FieldWrite::Set { value, .. } => {
            let parent = parent_mut(root, &segments, path)?;
            parent.insert(last.to_string(), value.clone());
        }
        FieldWrite::ArrayUnion { values, .. } => {
            let parent = parent_mut(root, &segments, path)?;
            let target = parent
                .entry(last.to_string())
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            let array = target
                .as_array_mut()
                .ok_or_else(|| WriteError::NotAnArray(path.to_string()))?;
            for value in values {
                if !array.contains(value) {
                    array.push(value.clone());
                }
            }
        }
        FieldWrite::Delete { .. } => {
            // Deleting under a missing parent is a no-op, so don't create maps.
            let mut current = &mut *root;
            for segment in &segments[..segments.len() - 1] {
                match current.get_mut(*segment).and_then(JsonValue::as_object_mut) {
                    Some(next) => current = next,
                    None => return Ok(()),
                }
            }
            current.remove(last);
        }
    }
    Ok(())
}

/// Apply `writes` to `doc` atomically.
///
/// `doc` is replaced by an empty object if it is not one already.
pub fn apply_writes(doc: &mut JsonValue, writes: &[FieldWrite]) -> Result<(), WriteError> {
    let mut staged = match doc {
        JsonValue::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for write in writes {
        apply_one(&mut staged, write)?;
    }
    *doc = JsonValue::Object(staged);
    Ok(())
}

/// Read the value at a dotted field path
pub fn get_field<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(doc, |value, segment| value.get(segment))
}

/// Precondition on one field: the value at `path` must equal `expected`,
/// or be absent when `expected` is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub path: String,
    pub expected: Option<JsonValue>,
}

impl FieldCondition {
    pub fn equals(path: impl Into<String>, expected: impl Into<JsonValue>) -> Self {
        Self {
            path: path.into(),
            expected: Some(expected.into()),
        }
    }

    /// Require exactly what `doc` holds at `path` right now
    pub fn unchanged(doc: &JsonValue, path: impl Into<String>) -> Self {
        let path = path.into();
        let expected = get_field(doc, &path).cloned();
        Self { path, expected }
    }

    pub fn holds(&self, doc: &JsonValue) -> bool {
        get_field(doc, &self.path) == self.expected.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut doc = json!({});
        apply_writes(
            &mut doc,
            &[FieldWrite::set("connectedStudents.s1.currentSlideIndex", 3)],
        )
        .unwrap();
        assert_eq!(doc, json!({"connectedStudents": {"s1": {"currentSlideIndex": 3}}}));
    }

    #[test]
    fn test_union_is_idempotent() {
        let mut doc = json!({"unlockedSlideIndices": [0]});
        let writes = vec![FieldWrite::union("unlockedSlideIndices", vec![json!(2), json!(0)])];

        apply_writes(&mut doc, &writes).unwrap();
        let once = doc.clone();
        apply_writes(&mut doc, &writes).unwrap();

        assert_eq!(doc, once);
        assert_eq!(doc["unlockedSlideIndices"], json!([0, 2]));
    }

    #[test]
    fn test_batch_is_atomic() {
        let mut doc = json!({"status": "active", "isLocked": 5});
        let result = apply_writes(
            &mut doc,
            &[
                FieldWrite::set("status", "ended"),
                FieldWrite::union("isLocked", vec![json!(1)]),
            ],
        );
        assert_eq!(result, Err(WriteError::NotAnArray("isLocked".to_string())));
        assert_eq!(doc["status"], json!("active"));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut doc = json!({"connectedStudents": {"s1": {}}});
        apply_writes(&mut doc, &[FieldWrite::delete("connectedStudents.s2")]).unwrap();
        apply_writes(&mut doc, &[FieldWrite::delete("nothing.here")]).unwrap();
        assert_eq!(doc, json!({"connectedStudents": {"s1": {}}}));

        apply_writes(&mut doc, &[FieldWrite::delete("connectedStudents.s1")]).unwrap();
        assert_eq!(doc, json!({"connectedStudents": {}}));
    }

    #[test]
    fn test_rejects_empty_segments() {
        let mut doc = json!({});
        let result = apply_writes(&mut doc, &[FieldWrite::set("a..b", 1)]);
        assert!(matches!(result, Err(WriteError::InvalidPath(_))));
    }

    #[test]
    fn test_get_field() {
        let doc = json!({"studentProgress": {"s1": {"totalTime": 42}}});
        assert_eq!(get_field(&doc, "studentProgress.s1.totalTime"), Some(&json!(42)));
        assert_eq!(get_field(&doc, "studentProgress.s2"), None);
    }

    #[test]
    fn test_field_condition() {
        let doc = json!({"status": "online", "lastSeen": "2026-03-02T09:00:00Z"});
        assert!(FieldCondition::equals("status", "online").holds(&doc));
        assert!(!FieldCondition::equals("status", "offline").holds(&doc));
        assert!(FieldCondition::unchanged(&doc, "lastSeen").holds(&doc));

        let missing = FieldCondition::unchanged(&doc, "connectedStudents.s1");
        assert_eq!(missing.expected, None);
        assert!(missing.holds(&doc));
        assert!(!missing.holds(&json!({"connectedStudents": {"s1": {}}})));
    }
}
