//! Structural diff between row images.

use serde_json::{Map, Value};

/// Compute the fields of `after` that are new or changed relative to `before`.
///
/// A field of `after` is kept when it is absent from `before` or differs by
/// deep comparison. When both sides hold an object the result holds only the
/// nested sub-diff, and an empty sub-diff is dropped. Arrays and scalars are
/// compared as whole values. Fields present only in `before` never appear.
///
/// `diff(x, x)` is `{}` for any `x`.
#[must_use]
pub fn diff(before: Option<&Value>, after: &Value) -> Value {
    match (before, after) {
        (Some(Value::Object(b)), Value::Object(a)) => Value::Object(diff_objects(b, a)),
        (None, Value::Object(a)) => Value::Object(a.clone()),
        (Some(b), a) if b == a => Value::Object(Map::new()),
        (_, a) => a.clone(),
    }
}

fn diff_objects(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, new_value) in after {
        match before.get(key) {
            None => {
                out.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old)) if new_value.is_object() => {
                if let Value::Object(new) = new_value {
                    let nested = diff_objects(old, new);
                    if !nested.is_empty() {
                        out.insert(key.clone(), Value::Object(nested));
                    }
                }
            }
            Some(_) => {
                out.insert(key.clone(), new_value.clone());
            }
        }
    }

    out
}
