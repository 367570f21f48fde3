//! Server-side value placeholders.
//!
//! A client cannot know the store clock, so it writes a placeholder object
//! which the store replaces with its own timestamp when the write commits.

use serde_json::json;

use super::Value;

const SERVER_VALUE_KEY: &str = ".sv";
const TIMESTAMP: &str = "timestamp";

/// Placeholder replaced by the store clock (Unix milliseconds) on write.
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: TIMESTAMP })
}

fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(SERVER_VALUE_KEY) == Some(&json!(TIMESTAMP)))
}

/// Replace every placeholder in `value` with `now_millis`.
pub fn resolve_server_values(value: &mut Value, now_millis: i64) {
    if is_server_timestamp(value) {
        *value = json!(now_millis);
        return;
    }

    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|child| resolve_server_values(child, now_millis)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| resolve_server_values(child, now_millis)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_top_level_placeholder() {
        // テスト項目: トップレベルのプレースホルダがタイムスタンプに置換される
        // given (前提条件):
        let mut value = server_timestamp();

        // when (操作):
        resolve_server_values(&mut value, 1_700_000_000_000);

        // then (期待する結果):
        assert_eq!(value, json!(1_700_000_000_000i64));
    }

    #[test]
    fn test_resolve_nested_placeholders() {
        // テスト項目: ネストしたプレースホルダも置換され、他の値は変わらない
        // given (前提条件):
        let mut value = json!({
            "active": true,
            "createdAt": server_timestamp(),
            "meta": { "endedAt": server_timestamp(), "note": "x" },
        });

        // when (操作):
        resolve_server_values(&mut value, 42);

        // then (期待する結果):
        assert_eq!(
            value,
            json!({
                "active": true,
                "createdAt": 42,
                "meta": { "endedAt": 42, "note": "x" },
            })
        );
    }

    #[test]
    fn test_object_with_extra_keys_is_not_placeholder() {
        // テスト項目: 余分なキーを持つオブジェクトはプレースホルダとみなされない
        // given (前提条件):
        let mut value = json!({ ".sv": "timestamp", "other": 1 });
        let original = value.clone();

        // when (操作):
        resolve_server_values(&mut value, 42);

        // then (期待する結果):
        assert_eq!(value, original);
    }
}
