//! Cycle-safe JSON rendering of record graphs

use crate::record::{Value, read_lock};
use serde_json::{Map, Value as Json};
use std::sync::Arc;

/// Placeholder written wherever a value refers back to one of its ancestors.
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Render a value to compact JSON text. Never fails.
pub fn stringify(value: &Value) -> String {
    sanitize(value).to_string()
}

/// Convert a possibly cyclic value into an acyclic `serde_json::Value`.
///
/// Containers are tracked by handle identity along the current path only, so
/// a value shared by two siblings is rendered twice, while a value that
/// contains itself is cut with [`CIRCULAR_MARKER`].
pub fn sanitize(value: &Value) -> Json {
    let mut ancestors = Vec::new();
    walk(value, &mut ancestors)
}

fn walk(value: &Value, ancestors: &mut Vec<*const ()>) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => {
            let id = Arc::as_ptr(items) as *const ();
            if ancestors.contains(&id) {
                return Json::String(CIRCULAR_MARKER.to_string());
            }

            ancestors.push(id);
            let rendered = read_lock(items)
                .iter()
                .map(|item| walk(item, ancestors))
                .collect();
            ancestors.pop();

            Json::Array(rendered)
        }
        Value::Object(map) => {
            let id = Arc::as_ptr(map) as *const ();
            if ancestors.contains(&id) {
                return Json::String(CIRCULAR_MARKER.to_string());
            }

            ancestors.push(id);
            let rendered: Map<String, Json> = read_lock(map)
                .iter()
                .map(|(key, item)| (key.clone(), walk(item, ancestors)))
                .collect();
            ancestors.pop();

            Json::Object(rendered)
        }
    }
}
