//! Layered-defaults resolution.
//!
//! Layers are always given highest precedence first. A lower layer only ever
//! fills gaps left by the layers above it; it never overwrites a value that a
//! higher layer already carries.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// Resolve a list of JSON layers (highest precedence first) into one value.
///
/// Objects are merged key by key, recursively. For every other shape the
/// first non-null layer wins.
pub fn resolve(layers: &[Value]) -> Value {
    let mut merged = Value::Null;
    for layer in layers {
        merge_under(&mut merged, layer);
    }
    merged
}

/// Typed convenience over [`resolve`]: serialize each layer, resolve once,
/// deserialize the result.
pub fn resolve_as<T>(layers: &[&T]) -> Result<T, serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    let values = layers
        .iter()
        .map(|layer| serde_json::to_value(layer))
        .collect::<Result<Vec<_>, _>>()?;
    serde_json::from_value(resolve(&values))
}

/// Merge `lower` into `target` without replacing anything `target` already has.
pub fn merge_under(target: &mut Value, lower: &Value) {
    if target.is_null() {
        *target = lower.clone();
        return;
    }
    if let (Value::Object(existing), Value::Object(lower)) = (target, lower) {
        merge_maps_under(existing, lower);
    }
}

/// Object flavour of [`merge_under`].
pub fn merge_maps_under(target: &mut Map<String, Value>, lower: &Map<String, Value>) {
    for (key, value) in lower {
        match target.get_mut(key) {
            Some(existing) => merge_under(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn higher_layer_wins_on_conflict() {
        let merged = resolve(&[
            json!({"useLambdaProxy": false}),
            json!({"useLambdaProxy": true, "defaultHeaders": {"a": 1}}),
        ]);
        assert_eq!(merged, json!({"useLambdaProxy": false, "defaultHeaders": {"a": 1}}));
    }

    #[test]
    fn nested_objects_are_filled_not_replaced() {
        let merged = resolve(&[
            json!({"stageHandling": {"envStageName": "ENV"}}),
            json!({"stageHandling": {"envStageName": "STAGE", "extractInCase": "lower"}}),
            json!({"stageHandling": {"defaultStage": "dev"}}),
        ]);
        assert_eq!(
            merged,
            json!({"stageHandling": {
                "envStageName": "ENV",
                "extractInCase": "lower",
                "defaultStage": "dev"
            }})
        );
    }

    #[test]
    fn nulls_do_not_block_lower_layers() {
        let merged = resolve(&[json!({"a": null}), json!({"a": 2}), Value::Null]);
        assert_eq!(merged, json!({"a": 2}));
    }

    #[test]
    fn empty_layers_resolve_to_null() {
        assert_eq!(resolve(&[]), Value::Null);
    }

    #[test]
    fn inputs_are_left_untouched() {
        let settings = json!({"custom": {"x": 1}});
        let options = json!({"custom": {"y": 2}});
        let _ = resolve(&[settings.clone(), options.clone()]);
        assert_eq!(settings, json!({"custom": {"x": 1}}));
        assert_eq!(options, json!({"custom": {"y": 2}}));
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Flags {
        #[serde(skip_serializing_if = "Option::is_none")]
        use_lambda_proxy: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_retries: Option<u32>,
    }

    #[test]
    fn typed_layers_keep_explicit_false() {
        let settings = Flags { use_lambda_proxy: Some(false), max_retries: None };
        let options = Flags { use_lambda_proxy: Some(true), max_retries: Some(3) };
        let legacy = Flags { use_lambda_proxy: Some(true), max_retries: Some(9) };

        let resolved = resolve_as(&[&settings, &options, &legacy]).unwrap();
        assert_eq!(resolved, Flags { use_lambda_proxy: Some(false), max_retries: Some(3) });
    }
}
