use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use relay_core::diff;
use serde_json::{json, Map, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-3i64..=3).prop_map(|n| json!(n)),
        "[a-c]{0,2}".prop_map(Value::String),
    ]
}

/// Arbitrary JSON with a narrow key alphabet so before and after share fields.
fn json_value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(4, 48, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            object_of(inner),
        ]
    })
}

fn object_of(inner: impl Strategy<Value = Value>) -> impl Strategy<Value = Value> {
    btree_map("[a-d]", inner, 0..5).prop_map(|m| Value::Object(m.into_iter().collect()))
}

fn json_object() -> impl Strategy<Value = Value> {
    object_of(json_value())
}

/// Every field of `delta` exists in `after` and carries its new value, or a
/// nested delta when both images hold objects there.
fn assert_delta_within(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    delta: &Map<String, Value>,
) {
    for (key, value) in delta {
        let new_value = after
            .get(key)
            .unwrap_or_else(|| panic!("field {key:?} is not in the after image"));
        match (before.get(key), new_value, value) {
            (Some(Value::Object(old)), Value::Object(new), Value::Object(nested)) if old != new => {
                assert!(!nested.is_empty(), "empty nested delta kept for {key:?}");
                assert_delta_within(old, new, nested);
            }
            (old, new, value) => {
                assert_eq!(value, new, "field {key:?} does not carry the after value");
                assert_ne!(old, Some(new), "unchanged field {key:?} kept");
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn test_diff_of_identical_images_is_empty(value in json_value()) {
        prop_assert_eq!(diff(Some(&value), &value), json!({}));
    }

    #[test]
    fn test_diff_never_reports_fields_absent_from_after(
        before in json_object(),
        after in json_object(),
    ) {
        let delta = diff(Some(&before), &after);
        let (Value::Object(b), Value::Object(a), Value::Object(d)) = (&before, &after, &delta) else {
            panic!("object images produce an object delta, got {delta}");
        };
        assert_delta_within(b, a, d);
    }

    #[test]
    fn test_diff_without_before_is_the_after_image(after in json_object()) {
        prop_assert_eq!(diff(None, &after), after);
    }

    #[test]
    fn test_diff_keeps_new_fields_verbatim(
        before in json_object(),
        after in json_object(),
    ) {
        let delta = diff(Some(&before), &after);
        let (Value::Object(b), Value::Object(a), Value::Object(d)) = (&before, &after, &delta) else {
            panic!("object images produce an object delta, got {delta}");
        };
        for (key, value) in a.iter().filter(|(key, _)| !b.contains_key(*key)) {
            prop_assert_eq!(d.get(key), Some(value));
        }
    }
}

#[test]
fn test_diff_handles_scalar_and_array_boundaries() {
    assert_eq!(diff(Some(&json!([1, 2])), &json!([1, 2])), json!({}));
    assert_eq!(diff(Some(&json!([1, 2])), &json!([2, 1])), json!([2, 1]));
    assert_eq!(diff(Some(&json!({"a": 1})), &json!(5)), json!(5));
    assert_eq!(diff(None, &json!(null)), json!(null));
}
