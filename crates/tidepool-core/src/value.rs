//! Document payloads and merge-patch semantics.

use serde_json::Value;

/// The JSON-shaped payload of a document: object, array, scalar, or null.
pub type Payload = Value;

/// Apply a JSON merge patch (RFC 7386) to `target` in place.
///
/// Object patches merge key-wise and recurse; a `null` value removes the
/// key. Any non-object patch replaces the target wholesale.
pub fn merge_patch(target: &mut Payload, patch: &Payload) {
  match patch {
    Value::Object(entries) => {
      if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
      }
      let fields = target.as_object_mut().expect("target forced to object");
      for (key, value) in entries {
        if value.is_null() {
          fields.remove(key);
        } else {
          merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
        }
      }
    }
    other => *target = other.clone(),
  }
}
