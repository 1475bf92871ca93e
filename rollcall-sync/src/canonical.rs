//! Canonical form used to decide whether a refresh changed anything
//!
//! Remote rows and cached records reach us in arbitrary order and with
//! optional fields either omitted or spelled out as `null`/`false`. Both
//! sides are normalized before comparison so that equal content never
//! triggers a rewrite or a change notification.

use crate::error::SyncResult;
use crate::model::Record;
use serde_json::{Map, Value};

/// Canonical JSON for a set of records
pub fn canonicalize<T: Record>(records: &[T]) -> SyncResult<Value> {
    let mut keyed = records
        .iter()
        .map(|record| Ok((record.record_id(), normalize(serde_json::to_value(record)?))))
        .collect::<SyncResult<Vec<(String, Value)>>>()?;

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Value::Array(keyed.into_iter().map(|(_, value)| value).collect()))
}

/// Whether two record sets carry the same content
pub fn same_content<T: Record>(left: &[T], right: &[T]) -> SyncResult<bool> {
    Ok(canonicalize(left)? == canonicalize(right)?)
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let normalized: Map<String, Value> = fields
                .into_iter()
                .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)))
                .map(|(k, v)| (k, normalize(v)))
                .collect();
            Value::Object(normalized)
        }
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(normalize).collect();
            if let Some(field) = nested_sort_field(&items) {
                items.sort_by(|a, b| sort_key(a, field).cmp(&sort_key(b, field)));
            }
            Value::Array(items)
        }
        other => other,
    }
}

/// Nested record arrays are keyed by `id`, or by `date` for marks
fn nested_sort_field(items: &[Value]) -> Option<&'static str> {
    ["id", "date"]
        .into_iter()
        .find(|field| !items.is_empty() && items.iter().all(|item| item.get(*field).is_some()))
}

fn sort_key(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
