//! Asymmetric deep merge of JSON records.
//!
//! For each key in the overlay: a nested mapping recurses only when the base
//! already holds a non-empty mapping at that key, otherwise it replaces the
//! base value; any other overlay value overwrites. A non-mapping overlay at
//! the top level leaves the base untouched, and a non-mapping base is
//! replaced outright by a mapping overlay.
//!
//! The merge is idempotent: merging the same overlay twice gives the same
//! record as merging it once.

use serde_json::Value;

pub fn deep_merge(mut base: Value, overlay: &Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

pub fn merge_into(base: &mut Value, overlay: &Value) {
    let Value::Object(incoming) = overlay else {
        return;
    };
    let Value::Object(target) = base else {
        *base = overlay.clone();
        return;
    };

    for (key, value) in incoming {
        let recurse = value.is_object()
            && target
                .get(key)
                .and_then(Value::as_object)
                .is_some_and(|m| !m.is_empty());
        match target.get_mut(key) {
            Some(existing) if recurse => merge_into(existing, value),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_maps_merge_and_scalars_overwrite() {
        let base = json!({"a": 1, "plan": {"name": "Gold", "tier": 1}});
        let overlay = json!({"a": 2, "plan": {"tier": 2, "copay": 20}});
        assert_eq!(
            deep_merge(base, &overlay),
            json!({"a": 2, "plan": {"name": "Gold", "tier": 2, "copay": 20}})
        );
    }

    #[test]
    fn empty_or_scalar_base_is_replaced_by_mapping() {
        let base = json!({"x": {}, "y": "n/a"});
        let overlay = json!({"x": {"k": 1}, "y": {"k": 2}});
        assert_eq!(deep_merge(base, &overlay), json!({"x": {"k": 1}, "y": {"k": 2}}));
    }

    #[test]
    fn top_level_edge_cases() {
        let base = json!({"keep": true});
        assert_eq!(deep_merge(base.clone(), &json!([1, 2])), base);
        assert_eq!(deep_merge(base.clone(), &Value::Null), base);
        assert_eq!(deep_merge(json!("text"), &json!({"k": 1})), json!({"k": 1}));
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let cases = [
            (json!({}), json!({"a": {"b": 1}})),
            (json!({"a": {"b": 1, "c": [1]}}), json!({"a": {"c": [], "d": null}})),
            (json!({"a": {}}), json!({"a": {"x": {"y": 1}}, "z": "s"})),
            (json!(3), json!({"n": 1})),
        ];
        for (base, overlay) in cases {
            let once = deep_merge(base, &overlay);
            let twice = deep_merge(once.clone(), &overlay);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn key_order_of_base_is_preserved() {
        let merged = deep_merge(json!({"b": 1, "a": 2}), &json!({"c": 3, "b": 4}));
        let keys: Vec<&String> = merged.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
