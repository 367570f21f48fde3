//! Pure operations on the JSON tree.
//!
//! Empty objects and `null` are never stored: a node holding nothing does not
//! exist, which is what subscribers observe as `None`.

use serde_json::Map;

use super::{StorePath, Value};

/// Value stored at `path`, if any.
pub fn value_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
        .filter(|value| !value.is_null())
}

/// Drop `null` members and empty objects, recursively.
///
/// Returns `None` when nothing is left.
pub fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| prune(child).map(|child| (key, child)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        other => Some(other),
    }
}

/// Write `value` at `path` (`None` removes), creating or pruning parents as needed.
pub fn write_at(root: &mut Value, path: &StorePath, value: Option<Value>) {
    let value = value.and_then(prune);
    write_segments(root, path.segments(), value);
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
}

fn write_segments(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.unwrap_or(Value::Null);
        return;
    };

    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(value) => {
                map.insert(head.clone(), value);
            }
            None => {
                map.remove(head);
            }
        }
        return;
    }

    let removing = value.is_none();
    if removing && !map.contains_key(head) {
        return;
    }
    let child = map.entry(head.clone()).or_insert(Value::Null);
    write_segments(child, rest, value);

    let child_is_empty = match child {
        Value::Null => true,
        Value::Object(child_map) => child_map.is_empty(),
        _ => false,
    };
    if child_is_empty {
        map.remove(head);
    }
}

/// Keys of the direct children of the node at `path`.
pub fn child_entries<'a>(root: &'a Value, path: &StorePath) -> Vec<(&'a String, &'a Value)> {
    value_at(root, path)
        .and_then(Value::as_object)
        .map(|map| map.iter().collect())
        .unwrap_or_default()
}
