//! JSON document merging for layered settings.

use serde_json::Value;

/// Merge `overlay` into `base`, last writer wins.
///
/// Objects merge recursively; any other value (including arrays) replaces the
/// base wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay) => *base_slot = overlay,
    }
}

/// Fold layers in order into one document. `None` layers are skipped.
pub fn merge_layers(layers: Vec<Option<Value>>) -> Value {
    let mut merged = Value::Object(serde_json::Map::new());
    for layer in layers.into_iter().flatten() {
        deep_merge(&mut merged, layer);
    }
    merged
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn later_layers_override() {
        let merged = merge_layers(vec![
            Some(json!({"model": "a", "permissions": {"allow": ["x"]}})),
            None,
            Some(json!({"model": "b"})),
        ]);
        assert_eq!(merged["model"], "b");
        assert_eq!(merged["permissions"]["allow"][0], "x");
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let mut base = json!({"env": {"A": "1", "B": "2"}});
        deep_merge(&mut base, json!({"env": {"B": "3", "C": "4"}}));
        assert_eq!(base, json!({"env": {"A": "1", "B": "3", "C": "4"}}));
    }

    #[test]
    fn arrays_replace_wholesale() {
        let mut base = json!({"allow": ["a", "b"]});
        deep_merge(&mut base, json!({"allow": ["c"]}));
        assert_eq!(base, json!({"allow": ["c"]}));
    }

    #[test]
    fn empty_layer_list_is_empty_object() {
        assert_eq!(merge_layers(vec![]), json!({}));
    }
}
