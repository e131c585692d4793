//! Layer merge
//!
//! Later layers win. Tables merge key by key, arrays and scalars replace,
//! and an explicit `null` removes the key so a lower layer's value (for
//! example a token from the user file) can be cleared from the command line.

use serde_json::{Map, Value};

/// Merge `overlay` on top of `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => Value::Object(merge_tables(base_map, overlay_map)),
        (_, overlay) => overlay,
    }
}

fn merge_tables(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        if value.is_null() {
            base.remove(&key);
            continue;
        }
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        base.insert(key, merged);
    }
    base
}

/// Merge layers lowest precedence first.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers
        .into_iter()
        .reduce(deep_merge)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(json!({"retry_delay_ms": 100}), json!({"retry_delay_ms": 200}));
        assert_eq!(result["retry_delay_ms"], 200);
    }

    #[test]
    fn test_table_merges_by_key() {
        let base = json!({"headers": {"user_agent": "headless-logs", "accept": "text/json"}});
        let overlay = json!({"headers": {"user_agent": "custom"}});
        let result = deep_merge(base, overlay);

        assert_eq!(result["headers"]["user_agent"], "custom");
        assert_eq!(result["headers"]["accept"], "text/json");
    }

    #[test]
    fn test_array_replaced() {
        let result = deep_merge(json!({"terminals": ["0", "1", "2"]}), json!({"terminals": ["3"]}));
        assert_eq!(result["terminals"], json!(["3"]));
    }

    #[test]
    fn test_null_clears_key() {
        let result = deep_merge(json!({"token": "abc", "resume": true}), json!({"token": null}));

        assert!(result.get("token").is_none());
        assert_eq!(result["resume"], true);
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({
            "retry_delay_ms": 2000,
            "server_url": "http://127.0.0.1:8420",
            "resume": true
        });
        let user = json!({"retry_delay_ms": 500, "server_url": "https://logs.example.com"});
        let cli = json!({"retry_delay_ms": 50});

        let result = merge_layers(vec![builtin, user, cli]);

        assert_eq!(result["retry_delay_ms"], 50);
        assert_eq!(result["server_url"], "https://logs.example.com");
        assert_eq!(result["resume"], true);
    }

    #[test]
    fn test_merge_no_layers() {
        assert_eq!(merge_layers(Vec::new()), json!({}));
    }
}
