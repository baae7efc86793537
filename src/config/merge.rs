//! Configuration merge logic
//!
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::{Map, Value};

/// Deep merge two JSON values.
///
/// Merge semantics:
/// - Objects: deep-merge by key (recursive)
/// - Arrays: REPLACE (second wins entirely), so a repo can swap a whole
///   command template
/// - Scalars: override (second wins)
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        (Value::Array(_), overlay @ Value::Array(_)) => overlay,

        (_, overlay) => overlay,
    }
}

/// Merge multiple config layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

/// Set a dot-separated key, creating intermediate objects
///
/// Used to turn individual CLI flags into an override layer.
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };

    match path.split_once('.') {
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(child, rest, value);
        }
        None => {
            map.insert(path.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let base = json!({"jobs": 0});
        let overlay = json!({"jobs": 4});
        let result = deep_merge(base, overlay);
        assert_eq!(result["jobs"], 4);
    }

    #[test]
    fn test_object_deep_merge() {
        let base = json!({
            "timeouts": {
                "tool_seconds": 600,
                "grace_seconds": 5
            }
        });
        let overlay = json!({
            "timeouts": {
                "tool_seconds": 120
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["timeouts"]["tool_seconds"], 120);
        assert_eq!(result["timeouts"]["grace_seconds"], 5);
    }

    #[test]
    fn test_command_template_replaced_not_concatenated() {
        let base = json!({
            "yamllint": {"command": ["yamllint", "-f", "parsable", "-d", "{config}", "."]}
        });
        let overlay = json!({
            "yamllint": {"command": ["yamllint", "."]}
        });
        let result = deep_merge(base, overlay);

        let command = result["yamllint"]["command"].as_array().unwrap();
        assert_eq!(command.len(), 2);
        assert_eq!(command[0], "yamllint");
        assert_eq!(command[1], ".");
    }

    #[test]
    fn test_add_new_key() {
        let base = json!({"root": "."});
        let overlay = json!({"tools": {"kustomize": "/opt/bin/kustomize"}});
        let result = deep_merge(base, overlay);

        assert_eq!(result["root"], ".");
        assert_eq!(result["tools"]["kustomize"], "/opt/bin/kustomize");
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({
            "jobs": 0,
            "secret_scan": {"policy": "report", "commit_range": "HEAD~10..HEAD"}
        });
        let repo = json!({
            "jobs": 2,
            "secret_scan": {"policy": "enforce"}
        });
        let cli = json!({"jobs": 8});

        let result = merge_layers(vec![builtin, repo, cli]);

        assert_eq!(result["jobs"], 8);
        assert_eq!(result["secret_scan"]["policy"], "enforce");
        assert_eq!(result["secret_scan"]["commit_range"], "HEAD~10..HEAD");
    }

    #[test]
    fn test_set_path_creates_objects() {
        let mut layer = Value::Null;
        set_path(&mut layer, "timeouts.tool_seconds", json!(30));
        set_path(&mut layer, "timeouts.grace_seconds", json!(2));
        set_path(&mut layer, "jobs", json!(4));

        assert_eq!(layer, json!({"timeouts": {"tool_seconds": 30, "grace_seconds": 2}, "jobs": 4}));
    }

    #[test]
    fn test_set_path_replaces_scalar_parent() {
        let mut layer = json!({"changelog": "off"});
        set_path(&mut layer, "changelog.enabled", json!(false));
        assert_eq!(layer["changelog"]["enabled"], false);
    }
}
